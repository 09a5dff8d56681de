//! Built-in commands
//!
//! Each module returns its [`CommandSpec`]s; [`register_all`] installs them.
//! The text filters and `fsck` are registered lazily and load on first use.

use super::context::{CommandContext, CommandOutput};
use super::error::ExecError;
use super::registry::CommandRegistry;
use crate::kernel::users::ROOT;

pub mod fs;
pub mod perms;
pub mod process;
pub mod shell;
pub mod system;
pub mod text;
pub mod user;

/// Install every built-in command
pub fn register_all(registry: &CommandRegistry) {
    let eager = shell::commands()
        .into_iter()
        .chain(fs::commands())
        .chain(perms::commands())
        .chain(process::commands())
        .chain(user::commands())
        .chain(system::commands());
    for spec in eager {
        registry.register(spec);
    }
    registry.register_lazy(text::NAMES, text::commands);
    registry.register_lazy(&["fsck"], system::fsck_commands);
}

// ============ Shared Utilities ============

/// Account administration is root only
pub(crate) fn require_root(ctx: &CommandContext) -> Result<(), ExecError> {
    if ctx.user == ROOT {
        Ok(())
    } else {
        Err(ExecError::bad_args("Permission denied").with_suggestion(format!("Run '{}' as root (su root)", ctx.name)))
    }
}

/// Numeric value of a flag, or `default` when absent
pub(crate) fn count_flag(ctx: &CommandContext, name: &str, default: usize) -> Result<usize, ExecError> {
    match ctx.flags.value(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ExecError::bad_args(format!("invalid number: '{}'", raw))),
        None => Ok(default),
    }
}

/// Output for commands that report failures per argument and keep going
pub(crate) fn finish(stdout: String, failed: bool) -> CommandOutput {
    CommandOutput::text(stdout).with_code(if failed { 1 } else { 0 })
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::ShellConfig;
    use crate::kernel::Kernel;
    use crate::kernel::storage::MemoryStorage;
    use crate::shell::io::BufferSink;
    use crate::shell::modal::ScriptedModal;
    use futures::executor::block_on;
    use std::rc::Rc;

    pub struct Harness {
        pub kernel: Kernel,
        pub sink: Rc<BufferSink>,
        pub modal: Rc<ScriptedModal>,
        pub storage: Rc<MemoryStorage>,
    }

    impl Harness {
        /// Run a line and return its stdout
        pub fn out(&mut self, line: &str) -> String {
            self.sink.reset();
            self.kernel.run_line(line);
            self.sink.stdout_text()
        }

        /// Run a line and return (exit code, stderr)
        pub fn err(&mut self, line: &str) -> (i32, String) {
            self.sink.reset();
            let code = self.kernel.run_line(line);
            (code, self.sink.stderr_text())
        }

        pub fn code(&mut self, line: &str) -> i32 {
            self.kernel.run_line(line)
        }
    }

    pub fn harness() -> Harness {
        let sink = Rc::new(BufferSink::new());
        let modal = Rc::new(ScriptedModal::new());
        let storage = Rc::new(MemoryStorage::new());
        let kernel = block_on(Kernel::boot(
            ShellConfig::default(),
            storage.clone(),
            sink.clone(),
            modal.clone(),
        ))
        .expect("boot");
        Harness {
            kernel,
            sink,
            modal,
            storage,
        }
    }
}
