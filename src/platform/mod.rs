//! Platform layer
//!
//! The kernel and shell never touch the host directly. A platform supplies
//! the three seams they consume:
//!
//! - [`Storage`](crate::kernel::storage::Storage) for persisted state
//! - [`OutputSink`](crate::shell::io::OutputSink) for command output and the prompt
//! - [`ModalChannel`](crate::shell::modal::ModalChannel) for confirmations and passwords
//!
//! Browser (wasm32-unknown-unknown): `localStorage`, a JS output callback and
//! parked modal requests, driven by `requestAnimationFrame` ticks.
//! Native: a JSON state file, stdout/stderr and prompts read from stdin.

#[cfg(target_arch = "wasm32")]
#[cfg(target_os = "unknown")] // Browser WASM (no WASI)
pub mod web;

#[cfg(not(target_arch = "wasm32"))]
pub mod native;
