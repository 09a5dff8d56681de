//! Native host
//!
//! - a JSON object file holding every storage key
//! - stdout/stderr for output, ANSI colors when stdout is a terminal
//! - modal prompts answered on stdin

use crate::kernel::Kernel;
use crate::kernel::storage::{Storage, StorageError};
use crate::shell::io::{OutputClass, OutputSink};
use crate::shell::modal::{ModalAnswer, ModalChannel, ModalKind, ModalRequest};
use async_trait::async_trait;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// State file path (relative to the working directory)
pub const STATE_FILE: &str = ".websh/state.json";

fn unavailable(e: io::Error) -> StorageError {
    StorageError::Unavailable(e.to_string())
}

/// All keys in one JSON file, rewritten on every change
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open `path`; a missing file is an empty store
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| StorageError::corrupt(&path.display().to_string(), e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(unavailable(e)),
        };
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Written to a temp file, then renamed over the state file
    fn flush(&self) -> Result<(), StorageError> {
        let data = serde_json::to_string_pretty(&*self.entries.borrow())
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(unavailable)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(unavailable)?;
        std::fs::rename(&tmp, &self.path).map_err(unavailable)
    }
}

#[async_trait(?Send)]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        self.flush()
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = self.entries.borrow_mut().remove(key).is_some();
        if removed {
            self.flush()?;
        }
        Ok(())
    }
}

/// Prints to the process's stdout and stderr
#[derive(Debug)]
pub struct TerminalSink {
    prompt: RefCell<String>,
    color: bool,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self {
            prompt: RefCell::new(String::new()),
            color: io::stdout().is_terminal(),
        }
    }

    pub fn prompt(&self) -> String {
        self.prompt.borrow().clone()
    }
}

impl Default for TerminalSink {
    fn default() -> Self {
        Self::new()
    }
}

fn ansi(class: OutputClass) -> &'static str {
    match class {
        OutputClass::Info => "36",
        OutputClass::Success => "32",
        OutputClass::Warning => "33",
        OutputClass::Directory => "34",
    }
}

impl OutputSink for TerminalSink {
    fn stdout(&self, text: &str, class: Option<OutputClass>) {
        match class {
            Some(class) if self.color => println!("\x1b[{}m{}\x1b[0m", ansi(class), text),
            _ => println!("{}", text),
        }
    }

    fn stderr(&self, text: &str) {
        if self.color {
            eprintln!("\x1b[31m{}\x1b[0m", text);
        } else {
            eprintln!("{}", text);
        }
    }

    fn suggestions(&self, text: &str) {
        println!("{}", text);
    }

    fn set_prompt(&self, text: &str) {
        *self.prompt.borrow_mut() = text.to_string();
    }

    fn clear(&self) {
        print!("\x1b[2J\x1b[H");
        let _ = io::stdout().flush();
    }
}

fn read_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
    }
}

/// Answers modal requests from stdin; EOF cancels
#[derive(Debug, Default)]
pub struct StdinModal;

#[async_trait(?Send)]
impl ModalChannel for StdinModal {
    async fn prompt(&self, request: ModalRequest) -> ModalAnswer {
        let Some((last, before)) = request.lines.split_last() else {
            return ModalAnswer::Cancelled;
        };
        for line in before {
            println!("{}", line);
        }
        match request.kind {
            ModalKind::Confirm => print!("{} [y/N] ", last),
            ModalKind::Input | ModalKind::Obscured => print!("{} ", last),
        }
        let _ = io::stdout().flush();

        match (request.kind, read_line()) {
            (_, None) => ModalAnswer::Cancelled,
            (ModalKind::Confirm, Some(answer)) => {
                if matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes") {
                    ModalAnswer::Confirmed
                } else {
                    ModalAnswer::Cancelled
                }
            }
            (_, Some(value)) => ModalAnswer::Value(value),
        }
    }
}

/// Read-eval loop until EOF or `exit`
///
/// Background jobs advance on wall-clock time between lines.
pub fn run_repl(kernel: &mut Kernel, sink: &TerminalSink) {
    let started = Instant::now();
    loop {
        kernel.tick(started.elapsed().as_secs_f64() * 1000.0);
        print!("{}", sink.prompt());
        let _ = io::stdout().flush();

        let Some(line) = read_line() else {
            println!();
            break;
        };
        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            _ => {
                kernel.run_line(&line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("websh-test-{}-{}", std::process::id(), name))
            .join("state.json")
    }

    #[test]
    fn test_file_storage_persists_across_opens() {
        let path = temp_path("persist");
        let store = FileStorage::open(&path).expect("open");
        block_on(store.set("websh_fs_data", "{}")).expect("set");
        block_on(store.set("websh_history", "[]")).expect("set");
        block_on(store.remove("websh_history")).expect("remove");

        let reopened = FileStorage::open(&path).expect("reopen");
        assert_eq!(
            block_on(reopened.get("websh_fs_data")).expect("get"),
            Some("{}".to_string())
        );
        assert_eq!(block_on(reopened.get("websh_history")).expect("get"), None);
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let store = FileStorage::open(temp_path("missing")).expect("open");
        assert_eq!(block_on(store.get("anything")).expect("get"), None);
    }

    #[test]
    fn test_file_storage_rejects_garbage() {
        let path = temp_path("garbage");
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(
            FileStorage::open(&path),
            Err(StorageError::Corrupt { .. })
        ));
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[test]
    fn test_terminal_sink_keeps_prompt() {
        let sink = TerminalSink::new();
        sink.set_prompt("Guest@websh:~$ ");
        assert_eq!(sink.prompt(), "Guest@websh:~$ ");
    }
}
