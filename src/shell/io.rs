//! Output and prompt sinks
//!
//! The shell never renders anything itself. It appends to an [`OutputSink`]
//! implemented by the host (DOM terminal, native stdout, a test buffer).

use std::cell::RefCell;

/// Style hint for stdout text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputClass {
    Info,
    Success,
    Warning,
    Directory,
}

impl OutputClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputClass::Info => "info",
            OutputClass::Success => "success",
            OutputClass::Warning => "warning",
            OutputClass::Directory => "directory",
        }
    }
}

pub trait OutputSink {
    fn stdout(&self, text: &str, class: Option<OutputClass>);
    fn stderr(&self, text: &str);
    /// Completion candidates, shown apart from command output
    fn suggestions(&self, text: &str);
    fn set_prompt(&self, text: &str);
    fn clear(&self);
}

/// Everything a [`BufferSink`] received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Stdout { text: String, class: Option<OutputClass> },
    Stderr(String),
    Suggestions(String),
    Prompt(String),
    Clear,
}

/// Records output in memory
#[derive(Debug, Default)]
pub struct BufferSink {
    events: RefCell<Vec<SinkEvent>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<SinkEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// All stdout chunks, one per line
    pub fn stdout_text(&self) -> String {
        self.collect(|e| match e {
            SinkEvent::Stdout { text, .. } => Some(text),
            _ => None,
        })
    }

    pub fn stderr_text(&self) -> String {
        self.collect(|e| match e {
            SinkEvent::Stderr(text) => Some(text),
            _ => None,
        })
    }

    pub fn suggestion_text(&self) -> String {
        self.collect(|e| match e {
            SinkEvent::Suggestions(text) => Some(text),
            _ => None,
        })
    }

    pub fn prompt(&self) -> Option<String> {
        self.events.borrow().iter().rev().find_map(|e| match e {
            SinkEvent::Prompt(p) => Some(p.clone()),
            _ => None,
        })
    }

    pub fn reset(&self) {
        self.events.borrow_mut().clear();
    }

    fn collect(&self, pick: impl Fn(&SinkEvent) -> Option<&String>) -> String {
        let events = self.events.borrow();
        let chunks: Vec<&str> = events.iter().filter_map(&pick).map(String::as_str).collect();
        chunks.join("\n")
    }

    fn push(&self, event: SinkEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl OutputSink for BufferSink {
    fn stdout(&self, text: &str, class: Option<OutputClass>) {
        self.push(SinkEvent::Stdout {
            text: text.to_string(),
            class,
        });
    }

    fn stderr(&self, text: &str) {
        self.push(SinkEvent::Stderr(text.to_string()));
    }

    fn suggestions(&self, text: &str) {
        self.push(SinkEvent::Suggestions(text.to_string()));
    }

    fn set_prompt(&self, text: &str) {
        self.push(SinkEvent::Prompt(text.to_string()));
    }

    fn clear(&self) {
        self.push(SinkEvent::Clear);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn stdout(&self, _text: &str, _class: Option<OutputClass>) {}
    fn stderr(&self, _text: &str) {}
    fn suggestions(&self, _text: &str) {}
    fn set_prompt(&self, _text: &str) {}
    fn clear(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_sink_records_in_order() {
        let sink = BufferSink::new();
        sink.stdout("one", None);
        sink.stderr("oops");
        sink.stdout("two", Some(OutputClass::Info));
        sink.set_prompt("$ ");
        sink.clear();

        assert_eq!(sink.stdout_text(), "one\ntwo");
        assert_eq!(sink.stderr_text(), "oops");
        assert_eq!(sink.prompt().as_deref(), Some("$ "));
        assert_eq!(sink.events().last(), Some(&SinkEvent::Clear));
        assert_eq!(sink.take_events().len(), 5);
        assert!(sink.events().is_empty());
    }
}
