//! Command execution errors
//!
//! Every failure a command or the executor reports ends up as an
//! [`ExecError`]: a kind (which decides the exit code), a terse message
//! shown as `<command>: <message>`, and an optional suggestion line.

use crate::kernel::signal::Cancelled;
use crate::kernel::users::SessionError;
use crate::vfs::{FsError, ResolveError};
use thiserror::Error;

/// Exit codes
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_SYNTAX: i32 = 2;
pub const EXIT_NOT_EXECUTABLE: i32 = 126;
pub const EXIT_NOT_FOUND: i32 = 127;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecErrorKind {
    CommandNotFound,
    BadArguments,
    TypeMismatch,
    IOError,
    Cancelled,
    ScriptError,
    /// A script could not be executed for lack of permission
    NotExecutable,
    Resolve(ResolveError),
    Fs(FsError),
    Session(SessionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            suggestion: None,
        }
    }

    /// Reported as `<name>: command not found`
    pub fn not_found() -> Self {
        Self::new(ExecErrorKind::CommandNotFound, "command not found")
            .with_suggestion("Type 'help' to see available commands")
    }

    pub fn bad_args(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::BadArguments, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::TypeMismatch, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::IOError, message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::ScriptError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ExecErrorKind::Cancelled, "Cancelled")
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ExecErrorKind::Cancelled
    }

    pub fn is_permission(&self) -> bool {
        match &self.kind {
            ExecErrorKind::Resolve(e) => e.is_permission(),
            ExecErrorKind::Fs(e) => e.is_permission(),
            ExecErrorKind::NotExecutable => true,
            _ => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.kind {
            ExecErrorKind::CommandNotFound => EXIT_NOT_FOUND,
            ExecErrorKind::Cancelled => EXIT_CANCELLED,
            ExecErrorKind::NotExecutable => EXIT_NOT_EXECUTABLE,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<ResolveError> for ExecError {
    fn from(e: ResolveError) -> Self {
        let message = e.to_string();
        Self::new(ExecErrorKind::Resolve(e), message)
    }
}

impl From<FsError> for ExecError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::Resolve(inner) => inner.into(),
            other => {
                let message = other.to_string();
                Self::new(ExecErrorKind::Fs(other), message)
            }
        }
    }
}

impl From<SessionError> for ExecError {
    fn from(e: SessionError) -> Self {
        let message = e.to_string();
        Self::new(ExecErrorKind::Session(e), message)
    }
}

impl From<Cancelled> for ExecError {
    fn from(_: Cancelled) -> Self {
        Self::cancelled()
    }
}
