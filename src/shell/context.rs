//! Command execution context
//!
//! Each command receives a [`CommandContext`]: its arguments after flag
//! extraction, the flag map, the current user, the paths its validators
//! already resolved, the dependency bundle, and the run options (stdin,
//! output suppression, cancel signal).

use super::error::ExecError;
use super::flags::Flags;
use super::io::OutputClass;
use super::script::ScriptFrame;
use crate::kernel::Deps;
use crate::kernel::jobs::JobId;
use crate::kernel::signal::{JobControl, Yielder};
use crate::vfs::{Access, Resolved};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Side effect for the host to apply after the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ClearScreen,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    /// Exit code for commands that fail without an error message (`grep` with no match)
    pub code: i32,
    /// Persistent state changed; request a save after the line
    pub state_modified: bool,
    pub effect: Option<Effect>,
    pub class: Option<OutputClass>,
}

impl CommandOutput {
    pub fn text(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn modified(mut self) -> Self {
        self.state_modified = true;
        self
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_class(mut self, class: OutputClass) -> Self {
        self.class = Some(class);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

pub type CommandResult = Result<CommandOutput, ExecError>;

/// How a line (or a single pipeline) runs
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Typed at the prompt: recorded in history
    pub interactive: bool,
    /// Subshell capture: stdout is collected instead of shown
    pub suppress_output: bool,
    pub stdin: Option<String>,
    pub control: JobControl,
    /// Set inside a background job
    pub job: Option<JobId>,
    /// Positional parameters of the enclosing script
    pub frame: Option<Rc<ScriptFrame>>,
    /// Script nesting level
    pub depth: usize,
    /// Receives pipeline stdout when capturing
    pub capture: Option<Rc<RefCell<Vec<String>>>>,
}

impl ExecOptions {
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            ..Default::default()
        }
    }

    /// Options for a `$(...)` run
    pub fn capturing(&self) -> Self {
        Self {
            interactive: false,
            suppress_output: true,
            stdin: None,
            control: self.control.clone(),
            job: self.job,
            frame: self.frame.clone(),
            depth: self.depth,
            capture: Some(Rc::new(RefCell::new(Vec::new()))),
        }
    }
}

/// One item of a command's input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    pub success: bool,
    /// File content, or the error message when `success` is false
    pub content: String,
    pub source_name: String,
}

pub const STDIN_NAME: &str = "(standard input)";

/// Stdin, or each file argument in turn, read on demand
pub struct InputStream {
    deps: Deps,
    access: Access,
    stdin: Option<String>,
    files: std::vec::IntoIter<String>,
    stdin_only: bool,
}

impl Iterator for InputStream {
    type Item = InputItem;

    fn next(&mut self) -> Option<InputItem> {
        if self.stdin_only {
            self.stdin_only = false;
            return Some(InputItem {
                success: true,
                content: self.stdin.take().unwrap_or_default(),
                source_name: STDIN_NAME.to_string(),
            });
        }
        let file = self.files.next()?;
        if file == "-" {
            return Some(InputItem {
                success: true,
                content: self.stdin.take().unwrap_or_default(),
                source_name: STDIN_NAME.to_string(),
            });
        }
        let read = self.deps.fs.borrow().read_file(&file, &self.access);
        Some(match read {
            Ok(content) => InputItem {
                success: true,
                content,
                source_name: file,
            },
            Err(e) => InputItem {
                success: false,
                content: e.to_string(),
                source_name: file,
            },
        })
    }
}

pub struct CommandContext {
    pub name: String,
    pub args: Vec<String>,
    pub flags: Flags,
    pub user: String,
    /// Paths resolved by the command's validators, by argument index
    pub paths: BTreeMap<usize, Resolved>,
    pub deps: Deps,
    pub options: ExecOptions,
}

impl CommandContext {
    pub fn stdin(&self) -> Option<&str> {
        self.options.stdin.as_deref()
    }

    pub fn access(&self) -> Result<Access, ExecError> {
        self.deps.access()
    }

    pub fn control(&self) -> &JobControl {
        &self.options.control
    }

    pub fn yielder(&self) -> Yielder {
        Yielder::new(self.deps.config.yield_interval)
    }

    /// Canonical path a validator resolved for argument `index`
    pub fn path(&self, index: usize) -> Option<&str> {
        self.paths.get(&index).map(|r| r.path.as_str())
    }

    pub fn flag(&self, name: &str) -> bool {
        self.flags.has(name)
    }

    /// Stdin when there are no file arguments past `skip`, else each file
    pub fn input_stream(&mut self, skip: usize) -> Result<InputStream, ExecError> {
        let files: Vec<String> = self.args.iter().skip(skip).cloned().collect();
        Ok(InputStream {
            deps: self.deps.clone(),
            access: self.access()?,
            stdin: self.options.stdin.take(),
            stdin_only: files.is_empty(),
            files: files.into_iter(),
        })
    }

    /// Non-fatal diagnostic: `<name>: <message>` on stderr
    pub fn warn(&self, message: impl std::fmt::Display) {
        self.deps
            .sink
            .stderr(&format!("{}: {}", self.name, message));
    }
}
