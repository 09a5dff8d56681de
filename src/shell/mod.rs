//! Shell - command-line interpreter
//!
//! A line goes through [`lexer`] and [`expand`] into [`parser`], and the
//! resulting sequence is run by [`executor`] against commands from the
//! [`registry`]. Commands see a [`context::CommandContext`], write to an
//! [`io::OutputSink`], ask questions through a [`modal::ModalChannel`] and
//! fail with [`error::ExecError`].

pub mod completion;
pub mod context;
pub mod error;
pub mod executor;
pub mod expand;
pub mod flags;
pub mod io;
pub mod lexer;
pub mod modal;
pub mod parser;
pub mod programs;
pub mod registry;
pub mod script;

pub use completion::{Completer, Completion};
pub use context::{CommandContext, CommandOutput, CommandResult, ExecOptions};
pub use error::{ExecError, ExecErrorKind};
pub use io::{BufferSink, NullSink, OutputClass, OutputSink};
pub use modal::{HostModal, ModalAnswer, ModalChannel, ModalRequest, ScriptedModal};
pub use parser::{Pipeline, Sequence, parse_line};
pub use registry::{CommandRegistry, CommandSpec, Handler};
