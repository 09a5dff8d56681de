//! websh - the shell core of a browser-resident simulated OS
//!
//! A line of text goes through a lexer and parser into pipelines, which the
//! executor runs against a virtual filesystem with users, groups and
//! permissions. State persists through a host key/value store.
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): `localStorage`, JS output callback
//! - Native CLI: JSON state file, stdin/stdout
//!
//! Layout:
//! - [`shell`]: lexer, parser, executor, command registry and built-in programs
//! - [`vfs`]: the filesystem tree, path resolution, permissions, fsck, persistence
//! - [`kernel`]: boot, task executor, timers, jobs, message bus, users and sessions
//! - [`platform`]: host implementations of storage, output and modal prompts

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod config;
pub mod kernel;
pub mod platform;
pub mod shell;
pub mod vfs;

pub use config::ShellConfig;
pub use kernel::Kernel;

/// Initialize panic hook for better error messages in browser console
#[cfg(target_arch = "wasm32")]
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WASM entry point. The page then calls `WebShell.boot`.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    init_panic_hook();
    #[cfg(target_os = "unknown")]
    platform::web::init_logging(log::LevelFilter::Info);
    log::info!("websh {} loaded", env!("CARGO_PKG_VERSION"));
}
