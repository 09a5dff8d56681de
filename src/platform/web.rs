//! Browser Platform Implementation
//!
//! - `localStorage` for persistence
//! - a JS callback `(kind, text, class)` for output
//! - modal requests parked until the page answers them
//! - `console.*` for log records
//!
//! The page drives the kernel from `requestAnimationFrame`: `submit` a line,
//! then `tick(performance.now())` each frame until it reports an exit code.

use crate::config::ShellConfig;
use crate::kernel::Kernel;
use crate::kernel::storage::{Storage, StorageError};
use crate::shell::io::{OutputClass, OutputSink};
use crate::shell::modal::{HostModal, ModalAnswer, ModalKind};
use async_trait::async_trait;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::rc::Rc;
use wasm_bindgen::prelude::*;

// ============ Logging ============

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[{} {}] {}", record.level(), record.target(), record.args()));
        match record.level() {
            Level::Error => web_sys::console::error_1(&line),
            Level::Warn => web_sys::console::warn_1(&line),
            Level::Info => web_sys::console::info_1(&line),
            Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

/// Route `log` records to the browser console. Safe to call twice.
pub fn init_logging(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// ============ Storage ============

/// `window.localStorage`
#[derive(Debug)]
pub struct LocalStorage {
    inner: web_sys::Storage,
}

impl LocalStorage {
    pub fn open() -> Result<Self, StorageError> {
        let window = web_sys::window().ok_or_else(|| StorageError::Unavailable("no window object".to_string()))?;
        let inner = window
            .local_storage()
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StorageError::Unavailable("localStorage is disabled".to_string()))?;
        Ok(Self { inner })
    }
}

#[async_trait(?Send)]
impl Storage for LocalStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner
            .get_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // setItem only throws on QuotaExceededError
        self.inner
            .set_item(key, value)
            .map_err(|_| StorageError::QuotaExceeded { key: key.to_string() })
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner
            .remove_item(key)
            .map_err(|e| StorageError::Unavailable(format!("{:?}", e)))
    }
}

// ============ Output ============

/// Forwards every sink event to one JS function
pub struct JsSink {
    callback: js_sys::Function,
}

impl JsSink {
    pub fn new(callback: js_sys::Function) -> Self {
        Self { callback }
    }

    fn emit(&self, kind: &str, text: &str, class: Option<OutputClass>) {
        let class = class.map_or(JsValue::NULL, |c| JsValue::from_str(c.as_str()));
        if let Err(e) = self
            .callback
            .call3(&JsValue::NULL, &JsValue::from_str(kind), &JsValue::from_str(text), &class)
        {
            log::error!("output callback threw: {:?}", e);
        }
    }
}

impl OutputSink for JsSink {
    fn stdout(&self, text: &str, class: Option<OutputClass>) {
        self.emit("stdout", text, class);
    }

    fn stderr(&self, text: &str) {
        self.emit("stderr", text, None);
    }

    fn suggestions(&self, text: &str) {
        self.emit("suggestions", text, None);
    }

    fn set_prompt(&self, text: &str) {
        self.emit("prompt", text, None);
    }

    fn clear(&self) {
        self.emit("clear", "", None);
    }
}

// ============ Page Handle ============

/// The shell as seen from JavaScript
#[wasm_bindgen]
pub struct WebShell {
    kernel: Kernel,
    modal: Rc<HostModal>,
}

#[wasm_bindgen]
impl WebShell {
    /// Boot from `localStorage`. `config` is optional camelCase JSON.
    pub async fn boot(config: Option<String>, on_output: js_sys::Function) -> Result<WebShell, JsValue> {
        let config = match config {
            Some(json) => ShellConfig::from_json(&json).map_err(|e| JsValue::from_str(&e.to_string()))?,
            None => ShellConfig::default(),
        };
        let storage = Rc::new(LocalStorage::open().map_err(|e| JsValue::from_str(&e.to_string()))?);
        let sink = Rc::new(JsSink::new(on_output));
        let modal = Rc::new(HostModal::new());
        let kernel = Kernel::boot(config, storage, sink, modal.clone())
            .await
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(WebShell { kernel, modal })
    }

    /// Start a line; false while another is still running
    pub fn submit(&mut self, line: &str) -> bool {
        self.kernel.submit(line)
    }

    /// Advance to `now_ms` and run ready work. Returns the foreground exit code once it finishes.
    pub fn tick(&mut self, now_ms: f64) -> Option<i32> {
        self.kernel.tick(now_ms)
    }

    /// Ctrl+C
    pub fn interrupt(&mut self) -> bool {
        self.kernel.interrupt()
    }

    #[wasm_bindgen(js_name = isBusy)]
    pub fn is_busy(&self) -> bool {
        self.kernel.is_busy()
    }

    pub fn prompt(&self) -> String {
        self.kernel.prompt()
    }

    /// Tab: returns `[line, cursor]`
    pub fn complete(&mut self, input: &str, cursor: usize) -> js_sys::Array {
        let done = self.kernel.complete(input, cursor);
        js_sys::Array::of2(&JsValue::from_str(&done.line), &JsValue::from(done.cursor as u32))
    }

    /// `"confirm"`, `"input"` or `"obscured"` while a command waits on the user
    #[wasm_bindgen(js_name = modalKind)]
    pub fn modal_kind(&self) -> Option<String> {
        self.modal.pending().map(|req| {
            match req.kind {
                ModalKind::Confirm => "confirm",
                ModalKind::Input => "input",
                ModalKind::Obscured => "obscured",
            }
            .to_string()
        })
    }

    #[wasm_bindgen(js_name = modalText)]
    pub fn modal_text(&self) -> Option<String> {
        self.modal.pending().map(|req| req.lines.join("\n"))
    }

    /// Answer the waiting modal; `undefined` cancels it
    #[wasm_bindgen(js_name = modalRespond)]
    pub fn modal_respond(&self, value: Option<String>) -> bool {
        let confirm = self
            .modal
            .pending()
            .is_some_and(|req| req.kind == ModalKind::Confirm);
        let answer = match value {
            None => ModalAnswer::Cancelled,
            Some(_) if confirm => ModalAnswer::Confirmed,
            Some(v) => ModalAnswer::Value(v),
        };
        self.modal.respond(answer)
    }

    /// Flush state now, e.g. from `beforeunload`
    pub fn save(&mut self) -> Result<(), JsValue> {
        self.kernel
            .save()
            .map(|_| ())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
