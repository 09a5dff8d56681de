//! Shell builtins: output, navigation, environment, aliases, history, scripts

use super::finish;
use crate::shell::context::{CommandContext, CommandOutput, CommandResult, Effect};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::registry::{CommandSpec, CompletionKind, Handler};
use crate::shell::script::{ScriptOptions, run_script};
use crate::vfs::{NodeKind, Permission, ResolveOptions};
use futures::FutureExt;
use futures::future::LocalBoxFuture;

pub fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("echo", "print arguments", Handler::Sync(echo))
            .usage("echo [ARG]...")
            .raw(),
        CommandSpec::new("true", "succeed", Handler::Sync(|_| Ok(CommandOutput::empty()))).raw(),
        CommandSpec::new("false", "fail", Handler::Sync(|_| Ok(CommandOutput::empty().with_code(1)))).raw(),
        CommandSpec::new("pwd", "print the working directory", Handler::Sync(pwd)).args(0, Some(0)),
        CommandSpec::new("cd", "change the working directory", Handler::Sync(cd))
            .usage("cd [DIR]")
            .args(0, Some(1))
            .complete(CompletionKind::Paths),
        CommandSpec::new("export", "set environment variables", Handler::Sync(export))
            .usage("export [NAME[=VALUE]]...")
            .raw(),
        CommandSpec::new("unset", "remove environment variables", Handler::Sync(unset))
            .usage("unset NAME...")
            .args(1, None),
        CommandSpec::new("env", "print the environment", Handler::Sync(env)).args(0, Some(0)),
        CommandSpec::new("alias", "define or show aliases", Handler::Sync(alias))
            .usage("alias [NAME[=BODY]]...")
            .complete(CompletionKind::Aliases)
            .raw(),
        CommandSpec::new("unalias", "remove aliases", Handler::Sync(unalias))
            .usage("unalias [-a] NAME...")
            .flags([FlagDef::switch("all", Some('a'))])
            .complete(CompletionKind::Aliases),
        CommandSpec::new("history", "show or clear command history", Handler::Sync(history))
            .usage("history [-c] [N]")
            .flags([FlagDef::switch("clear", Some('c'))])
            .args(0, Some(1)),
        CommandSpec::new("help", "list commands or describe one", Handler::Sync(help))
            .usage("help [COMMAND]")
            .args(0, Some(1))
            .complete(CompletionKind::Commands),
        CommandSpec::new("clear", "clear the screen", Handler::Sync(|_| {
            Ok(CommandOutput::empty().with_effect(Effect::ClearScreen))
        }))
        .args(0, Some(0)),
        CommandSpec::new("run", "run a script file", Handler::Async(run))
            .usage("run [-e] FILE [ARG]...")
            .args(1, None)
            .complete(CompletionKind::Paths)
            .raw(),
    ]
}

fn echo(ctx: &mut CommandContext) -> CommandResult {
    Ok(CommandOutput::text(ctx.args.join(" ")))
}

fn pwd(ctx: &mut CommandContext) -> CommandResult {
    Ok(CommandOutput::text(ctx.deps.cwd()))
}

fn cd(ctx: &mut CommandContext) -> CommandResult {
    let (home, oldpwd) = {
        let sessions = ctx.deps.sessions.borrow();
        let current = sessions.current();
        (current.home().to_string(), current.var("OLDPWD").map(str::to_string))
    };
    let target = match ctx.args.first().map(String::as_str) {
        None | Some("~") => home,
        Some("-") => oldpwd.ok_or_else(|| ExecError::bad_args("OLDPWD not set"))?,
        Some(arg) => match arg.strip_prefix("~/") {
            Some(rest) => format!("{}/{}", home, rest),
            None => arg.to_string(),
        },
    };

    let access = ctx.access()?;
    let opts = ResolveOptions::new()
        .follow()
        .expect(NodeKind::Directory)
        .require(Permission::Execute);
    let resolved = ctx.deps.fs.borrow().resolve(&target, &access, &opts)?;
    ctx.deps.sessions.borrow_mut().current_mut().set_cwd(&resolved.path);
    Ok(CommandOutput::empty())
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn export(ctx: &mut CommandContext) -> CommandResult {
    if ctx.args.is_empty() {
        return env(ctx);
    }
    let mut sessions = ctx.deps.sessions.borrow_mut();
    let session = sessions.current_mut();
    for arg in &ctx.args {
        let (name, value) = match arg.split_once('=') {
            Some((n, v)) => (n, Some(v)),
            None => (arg.as_str(), None),
        };
        if !is_identifier(name) {
            return Err(ExecError::bad_args(format!("'{}': not a valid identifier", arg)));
        }
        match value {
            Some(v) => session.set_var(name, v),
            None if session.var(name).is_none() => session.set_var(name, ""),
            None => {}
        }
    }
    Ok(CommandOutput::empty().modified())
}

fn unset(ctx: &mut CommandContext) -> CommandResult {
    let mut sessions = ctx.deps.sessions.borrow_mut();
    for name in &ctx.args {
        sessions.current_mut().unset_var(name);
    }
    Ok(CommandOutput::empty().modified())
}

fn env(ctx: &mut CommandContext) -> CommandResult {
    let sessions = ctx.deps.sessions.borrow();
    let lines: Vec<String> = sessions
        .current()
        .vars()
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    Ok(CommandOutput::text(lines.join("\n")))
}

fn alias(ctx: &mut CommandContext) -> CommandResult {
    let mut sessions = ctx.deps.sessions.borrow_mut();
    let session = sessions.current_mut();
    if ctx.args.is_empty() {
        let lines: Vec<String> = session
            .aliases()
            .iter()
            .map(|(name, body)| format!("alias {}='{}'", name, body))
            .collect();
        return Ok(CommandOutput::text(lines.join("\n")));
    }

    let mut shown = Vec::new();
    let mut failed = false;
    let mut modified = false;
    for arg in &ctx.args {
        match arg.split_once('=') {
            Some((name, body)) if !name.is_empty() && !name.contains(char::is_whitespace) => {
                session.set_alias(name, body);
                modified = true;
            }
            Some(_) => {
                ctx.warn(format!("'{}': invalid alias name", arg));
                failed = true;
            }
            None => match session.alias(arg) {
                Some(body) => shown.push(format!("alias {}='{}'", arg, body)),
                None => {
                    ctx.warn(format!("{}: not found", arg));
                    failed = true;
                }
            },
        }
    }
    let out = finish(shown.join("\n"), failed);
    Ok(if modified { out.modified() } else { out })
}

fn unalias(ctx: &mut CommandContext) -> CommandResult {
    let mut sessions = ctx.deps.sessions.borrow_mut();
    let session = sessions.current_mut();
    if ctx.flag("all") {
        session.clear_aliases();
        return Ok(CommandOutput::empty().modified());
    }
    if ctx.args.is_empty() {
        return Err(ExecError::bad_args("missing operand").with_suggestion("Usage: unalias [-a] NAME..."));
    }
    let mut failed = false;
    for name in &ctx.args {
        if !session.remove_alias(name) {
            ctx.warn(format!("{}: not found", name));
            failed = true;
        }
    }
    Ok(finish(String::new(), failed).modified())
}

fn history(ctx: &mut CommandContext) -> CommandResult {
    let mut sessions = ctx.deps.sessions.borrow_mut();
    let session = sessions.current_mut();
    if ctx.flag("clear") {
        session.clear_history();
        return Ok(CommandOutput::empty().modified());
    }
    let entries = session.history();
    let skip = match ctx.args.first() {
        Some(n) => {
            let n: usize = n
                .parse()
                .map_err(|_| ExecError::bad_args(format!("{}: numeric argument required", n)))?;
            entries.len().saturating_sub(n)
        }
        None => 0,
    };
    let lines: Vec<String> = entries
        .iter()
        .enumerate()
        .skip(skip)
        .map(|(i, line)| format!("{:5}  {}", i + 1, line))
        .collect();
    Ok(CommandOutput::text(lines.join("\n")))
}

fn help(ctx: &mut CommandContext) -> CommandResult {
    let registry = &ctx.deps.registry;
    if let Some(name) = ctx.args.first() {
        let spec = registry
            .get(name)
            .ok_or_else(|| ExecError::bad_args(format!("no help topics match '{}'", name)))?;
        return Ok(CommandOutput::text(spec.help_text()));
    }
    let names = registry.list();
    let width = names.iter().map(String::len).max().unwrap_or(0);
    let lines: Vec<String> = names
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|spec| format!("{:width$}  {}", spec.name, spec.summary, width = width))
        .collect();
    Ok(CommandOutput::text(lines.join("\n")))
}

fn run(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let (strict, rest) = match ctx.args.split_first() {
            Some((flag, rest)) if flag == "-e" => (true, rest.to_vec()),
            _ => (false, ctx.args.clone()),
        };
        let Some((file, args)) = rest.split_first() else {
            return Err(ExecError::bad_args("missing operand").with_suggestion("Usage: run [-e] FILE [ARG]..."));
        };
        let script = ScriptOptions {
            strict,
            require_execute: false,
        };
        run_script(&ctx.deps, file, args.to_vec(), script, &ctx.options).await
    }
    .boxed_local()
}
