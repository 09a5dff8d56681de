//! Line executor
//!
//! Turns one input line into executed work:
//! 1. history (interactive lines only)
//! 2. command substitution and variable expansion
//! 3. alias replacement of the first word
//! 4. lexing and parsing (with filesystem globbing)
//! 5. the sequence: pipelines gated by `;`, `&&`, `||`, or backgrounded with `&`
//!
//! Within a pipeline each segment's stdout becomes the next segment's stdin.
//! The first non-zero exit ends the pipeline. The last segment's stdout goes
//! to the output redirect or to the sink.

use super::context::{CommandContext, CommandOutput, Effect, ExecOptions};
use super::error::{EXIT_CANCELLED, EXIT_SYNTAX, ExecError};
use super::expand::{self, Piece};
use super::flags::{Flags, parse_flags};
use super::io::OutputClass;
use super::lexer::LexError;
use super::parser::{GlobExpander, Joiner, Pipeline, Segment, Sequence, parse_line};
use super::registry::Handler;
use super::script::{ScriptOptions, run_script};
use crate::kernel::Deps;
use crate::kernel::signal::JobControl;
use crate::vfs::{Access, FsError, Vfs, glob};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

/// Globs against the live filesystem
struct FsGlob<'a> {
    fs: &'a Vfs,
    access: &'a Access,
}

impl GlobExpander for FsGlob<'_> {
    fn expand(&self, pattern: &str) -> Vec<String> {
        glob::expand(self.fs, pattern, self.access)
    }
}

/// Run one line and return its exit code. Sets `$?` unless run as a job.
pub fn run_line(deps: Deps, line: String, opts: ExecOptions) -> LocalBoxFuture<'static, i32> {
    async move {
        let code = execute_line(&deps, &line, &opts).await;
        if opts.job.is_none() {
            deps.sessions.borrow_mut().current_mut().set_last_status(code);
        }
        code
    }
    .boxed_local()
}

/// Run `command` as a subshell and return its stdout without trailing newlines
pub async fn capture(deps: &Deps, command: &str, opts: &ExecOptions) -> String {
    let sub = opts.capturing();
    let buffer = sub.capture.clone();
    run_line(deps.clone(), command.to_string(), sub).await;
    let text = buffer.map(|b| b.take().join("\n")).unwrap_or_default();
    text.trim_end_matches('\n').to_string()
}

/// Print `<name>: <message>` and the suggestion, if any
pub fn report(deps: &Deps, name: &str, err: &ExecError) {
    if err.is_cancelled() {
        return;
    }
    deps.sink.stderr(&format!("{}: {}", name, err.message));
    if let Some(suggestion) = &err.suggestion {
        deps.sink.stderr(suggestion);
    }
}

async fn execute_line(deps: &Deps, line: &str, opts: &ExecOptions) -> i32 {
    let line = line.trim();
    if line.is_empty() {
        return deps.sessions.borrow().current().last_status();
    }
    log::debug!("line: {}", line);

    if opts.interactive {
        let limit = deps.config.history_limit;
        deps.sessions.borrow_mut().current_mut().record(line, limit);
    }

    let expanded = match expand_line(deps, line, opts).await {
        Ok(expanded) => expanded,
        Err(e) => {
            deps.sink.stderr(&format!("websh: {}", e));
            return EXIT_SYNTAX;
        }
    };
    if opts.control.is_cancelled() {
        return EXIT_CANCELLED;
    }

    let aliased = {
        let sessions = deps.sessions.borrow();
        let session = sessions.current();
        expand::expand_alias(&expanded, &|name| session.alias(name).map(str::to_string))
    };

    let access = match deps.access() {
        Ok(access) => access,
        Err(e) => {
            report(deps, "websh", &e);
            return e.exit_code();
        }
    };
    let parsed = {
        let fs = deps.fs.borrow();
        parse_line(&aliased, &FsGlob { fs: &fs, access: &access })
    };

    match parsed {
        Ok(sequence) => run_sequence(deps, sequence, opts).await,
        Err(e) => {
            deps.sink.stderr(&format!("websh: {}", e));
            EXIT_SYNTAX
        }
    }
}

async fn expand_line(deps: &Deps, line: &str, opts: &ExecOptions) -> Result<String, LexError> {
    if !expand::needs_expansion(line) {
        return Ok(line.to_string());
    }
    let mut out = String::with_capacity(line.len());
    for piece in expand::scan(line)? {
        match piece {
            Piece::Text(text) => out.push_str(&text),
            Piece::Var { name, quoted } => {
                out.push_str(&expand::escape(&lookup_var(deps, &name, opts), quoted));
            }
            Piece::Subst { command, quoted } => {
                let value = capture(deps, &command, opts).await;
                out.push_str(&expand::escape(&value, quoted));
            }
        }
    }
    Ok(out)
}

/// Undefined names expand to the empty string
fn lookup_var(deps: &Deps, name: &str, opts: &ExecOptions) -> String {
    let positional = name.chars().all(|c| c.is_ascii_digit()) || name == "#" || name == "@";
    if positional {
        if let Some(value) = opts.frame.as_ref().and_then(|f| f.param(name)) {
            return value;
        }
        return match name {
            "0" => "websh".to_string(),
            "#" => "0".to_string(),
            _ => String::new(),
        };
    }
    let sessions = deps.sessions.borrow();
    let session = sessions.current();
    match name {
        "?" => session.last_status().to_string(),
        _ => session.var(name).unwrap_or_default().to_string(),
    }
}

async fn run_sequence(deps: &Deps, sequence: Sequence, opts: &ExecOptions) -> i32 {
    let mut code = deps.sessions.borrow().current().last_status();
    let mut skip = false;
    for item in sequence.items {
        if !skip {
            code = if item.pipeline.background {
                spawn_background(deps, item.pipeline, opts)
            } else {
                run_pipeline(deps, &item.pipeline, opts).await
            };
        }
        if opts.control.is_cancelled() {
            return EXIT_CANCELLED;
        }
        skip = match item.joiner {
            Some(Joiner::And) => code != 0,
            Some(Joiner::Or) => code == 0,
            Some(Joiner::Semi | Joiner::Background) | None => false,
        };
    }
    code
}

/// Schedule a pipeline as a job and return immediately
fn spawn_background(deps: &Deps, mut pipeline: Pipeline, opts: &ExecOptions) -> i32 {
    let control = JobControl::new();
    let owner = deps.current_user();
    let id = deps
        .jobs
        .borrow_mut()
        .insert(&pipeline.text, &owner, control.clone());
    pipeline.job_id = Some(id);
    if !opts.suppress_output {
        deps.sink.stdout(&format!("[{}] {}", id, id), Some(OutputClass::Info));
    }

    let child = ExecOptions {
        interactive: false,
        suppress_output: opts.suppress_output,
        stdin: None,
        control: control.clone(),
        job: Some(id),
        frame: opts.frame.clone(),
        depth: opts.depth,
        capture: None,
    };
    let deps = deps.clone();
    let spawner = deps.spawner.clone();
    spawner.spawn(async move {
        let code = run_pipeline(&deps, &pipeline, &child).await;
        let code = if control.is_cancelled() { EXIT_CANCELLED } else { code };
        deps.jobs.borrow_mut().finish(id, code);
        if !child.suppress_output {
            deps.sink
                .stdout(&format!("[{}] Done {}", id, pipeline.text), Some(OutputClass::Info));
        }
    });
    0
}

async fn run_pipeline(deps: &Deps, pipeline: &Pipeline, opts: &ExecOptions) -> i32 {
    let Some(first) = pipeline.segments.first() else {
        return 0;
    };
    let last_name = pipeline
        .segments
        .last()
        .map_or(first.name.as_str(), |s| s.name.as_str());

    let mut stdin = match &pipeline.input {
        Some(path) => {
            let read = deps
                .access()
                .and_then(|access| Ok(deps.fs.borrow().read_file(path, &access)?));
            match read {
                Ok(content) => Some(content),
                Err(e) => {
                    report(deps, &first.name, &e);
                    return e.exit_code();
                }
            }
        }
        None => opts.stdin.clone(),
    };

    let count = pipeline.segments.len();
    let mut output = CommandOutput::empty();
    for (i, segment) in pipeline.segments.iter().enumerate() {
        if opts.control.checkpoint().await.is_err() {
            return EXIT_CANCELLED;
        }
        log::trace!("segment {}/{}: {} {:?}", i + 1, count, segment.name, segment.args);

        let out = match run_segment(deps, segment, stdin.take(), opts).await {
            Ok(out) => out,
            Err(e) => {
                report(deps, &segment.name, &e);
                return e.exit_code();
            }
        };
        if out.state_modified {
            deps.request_save();
        }
        if i + 1 < count {
            if out.code != 0 {
                return out.code;
            }
            stdin = Some(out.stdout);
        } else {
            output = out;
        }
    }

    let code = output.code;
    match &pipeline.output {
        Some(redirect) => {
            let mut content = output.stdout;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            let written = deps.access().and_then(|access| {
                deps.fs
                    .borrow_mut()
                    .write_file(&redirect.path, &content, redirect.mode, &access)
                    .map_err(|e| match e {
                        FsError::IsADirectory { .. } => ExecError::io(e.to_string()),
                        other => other.into(),
                    })
            });
            if let Err(e) = written {
                report(deps, last_name, &e);
                return e.exit_code();
            }
        }
        None => emit(deps, output, opts),
    }
    code
}

fn emit(deps: &Deps, output: CommandOutput, opts: &ExecOptions) {
    if let Some(buffer) = &opts.capture {
        if !output.stdout.is_empty() {
            buffer.borrow_mut().push(output.stdout);
        }
        return;
    }
    if opts.suppress_output {
        return;
    }
    if output.effect == Some(Effect::ClearScreen) {
        deps.sink.clear();
    }
    let text = output.stdout.trim_end_matches('\n');
    if !text.is_empty() {
        deps.sink.stdout(text, output.class);
    }
}

async fn run_segment(
    deps: &Deps,
    segment: &Segment,
    stdin: Option<String>,
    opts: &ExecOptions,
) -> Result<CommandOutput, ExecError> {
    // A path runs as a script
    if segment.name.contains('/') {
        let script = ScriptOptions {
            strict: false,
            require_execute: true,
        };
        return run_script(deps, &segment.name, segment.args.clone(), script, opts).await;
    }

    let spec = deps
        .registry
        .get(&segment.name)
        .ok_or_else(ExecError::not_found)?;
    let usage = || format!("Usage: {}", spec.usage);

    let (flags, args) = if spec.raw_args {
        (Flags::default(), segment.args.clone())
    } else {
        if segment.args.iter().any(|a| a == "--help") {
            return Ok(CommandOutput::text(spec.help_text()));
        }
        parse_flags(&segment.args, &spec.flags)
            .map_err(|e| ExecError::bad_args(e.to_string()).with_suggestion(usage()))?
    };
    if args.len() < spec.min_args {
        return Err(ExecError::bad_args("missing operand").with_suggestion(usage()));
    }
    if let Some(max) = spec.max_args
        && args.len() > max
    {
        return Err(ExecError::bad_args("too many arguments").with_suggestion(usage()));
    }

    let access = deps.access()?;
    let mut paths = BTreeMap::new();
    {
        let fs = deps.fs.borrow();
        for rule in &spec.paths {
            for (i, arg) in args.iter().enumerate() {
                if rule.args.contains(i, args.len()) {
                    paths.insert(i, fs.resolve(arg, &access, &rule.options)?);
                }
            }
        }
    }

    let mut ctx = CommandContext {
        name: spec.name.to_string(),
        args,
        flags,
        user: access.cred.user.clone(),
        paths,
        deps: deps.clone(),
        options: ExecOptions {
            stdin,
            interactive: false,
            capture: None,
            ..opts.clone()
        },
    };

    let panicked = || ExecError::io("internal error in command");
    match spec.handler {
        Handler::Sync(handler) => std::panic::catch_unwind(AssertUnwindSafe(|| handler(&mut ctx)))
            .unwrap_or_else(|_| Err(panicked())),
        Handler::Async(handler) => AssertUnwindSafe(handler(&mut ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(panicked())),
    }
}
