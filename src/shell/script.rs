//! Script runner
//!
//! A script is a file of command lines. Blank lines and lines starting with
//! `#` are skipped. `$0` is the script name and `$1..$9`, `$#`, `$@` its
//! arguments. In strict mode the first non-zero exit stops the script.

use super::context::{CommandOutput, ExecOptions};
use super::error::{ExecError, ExecErrorKind};
use super::executor::run_line;
use crate::kernel::Deps;
use crate::vfs::{NodeKind, Permission, ResolveOptions};
use std::cell::RefCell;
use std::rc::Rc;

/// Positional parameters of a running script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFrame {
    pub name: String,
    pub args: Vec<String>,
}

impl ScriptFrame {
    /// Value of `$0`..`$9`, `$#` or `$@`
    pub fn param(&self, name: &str) -> Option<String> {
        match name {
            "0" => Some(self.name.clone()),
            "#" => Some(self.args.len().to_string()),
            "@" => Some(self.args.join(" ")),
            _ => {
                let n: usize = name.parse().ok()?;
                Some(self.args.get(n.checked_sub(1)?).cloned().unwrap_or_default())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    pub strict: bool,
    /// Running a path directly needs execute permission; `run FILE` does not
    pub require_execute: bool,
}

/// Lines the runner executes, in order
pub fn script_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Run a script file. The output carries everything the script printed and
/// the exit code of the last line run.
pub async fn run_script(
    deps: &Deps,
    path: &str,
    args: Vec<String>,
    script: ScriptOptions,
    opts: &ExecOptions,
) -> Result<CommandOutput, ExecError> {
    if opts.depth >= deps.config.max_script_depth {
        return Err(ExecError::script(format!(
            "{}: maximum script depth ({}) exceeded",
            path, deps.config.max_script_depth
        )));
    }

    let access = deps.access()?;
    let content = {
        let fs = deps.fs.borrow();
        let mut check = ResolveOptions::new()
            .follow()
            .expect(NodeKind::File)
            .require(Permission::Read);
        if script.require_execute {
            check = check.require(Permission::Execute);
        }
        match fs.resolve(path, &access, &check) {
            Ok(_) => {}
            Err(e) if e.is_permission() && script.require_execute => {
                return Err(ExecError::new(ExecErrorKind::NotExecutable, e.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        fs.read_file(path, &access)?
    };

    let frame = Rc::new(ScriptFrame {
        name: path.to_string(),
        args,
    });
    let captured = Rc::new(RefCell::new(Vec::new()));
    let child = ExecOptions {
        interactive: false,
        suppress_output: opts.suppress_output,
        stdin: None,
        control: opts.control.clone(),
        job: opts.job,
        frame: Some(frame),
        depth: opts.depth + 1,
        capture: Some(captured.clone()),
    };

    log::debug!("running script {} (depth {})", path, child.depth);
    let mut yielder = crate::kernel::signal::Yielder::new(deps.config.yield_interval);
    let mut code = 0;
    for line in script_lines(&content) {
        yielder.step(&opts.control).await?;
        code = run_line(deps.clone(), line.to_string(), child.clone()).await;
        if opts.control.is_cancelled() {
            return Err(ExecError::cancelled());
        }
        if script.strict && code != 0 {
            log::debug!("script {} stopped on exit code {}", path, code);
            break;
        }
    }
    let stdout = captured.take().join("\n");
    Ok(CommandOutput::text(stdout).with_code(code))
}
