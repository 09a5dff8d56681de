//! Modal prompts
//!
//! Commands that need a confirmation or a typed answer (passwords, `rm -i`)
//! await [`ModalChannel::prompt`]. The host resolves the request; until then
//! the command is suspended.

use async_trait::async_trait;
use futures::channel::oneshot;
use std::cell::RefCell;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalKind {
    /// Yes/no
    Confirm,
    /// Free text
    Input,
    /// Free text, not echoed (passwords)
    Obscured,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalRequest {
    pub kind: ModalKind,
    pub lines: Vec<String>,
}

impl ModalRequest {
    pub fn confirm(line: impl Into<String>) -> Self {
        Self {
            kind: ModalKind::Confirm,
            lines: vec![line.into()],
        }
    }

    pub fn input(line: impl Into<String>) -> Self {
        Self {
            kind: ModalKind::Input,
            lines: vec![line.into()],
        }
    }

    pub fn obscured(line: impl Into<String>) -> Self {
        Self {
            kind: ModalKind::Obscured,
            lines: vec![line.into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalAnswer {
    /// Confirm accepted
    Confirmed,
    /// Input or obscured value
    Value(String),
    Cancelled,
}

impl ModalAnswer {
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, ModalAnswer::Cancelled)
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            ModalAnswer::Value(v) => Some(v),
            ModalAnswer::Confirmed => Some(""),
            ModalAnswer::Cancelled => None,
        }
    }
}

#[async_trait(?Send)]
pub trait ModalChannel {
    async fn prompt(&self, request: ModalRequest) -> ModalAnswer;
}

/// Answers from a queue; cancels once the queue is empty
#[derive(Debug, Default)]
pub struct ScriptedModal {
    answers: RefCell<VecDeque<ModalAnswer>>,
    requests: RefCell<Vec<ModalRequest>>,
}

impl ScriptedModal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answers(answers: impl IntoIterator<Item = ModalAnswer>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, answer: ModalAnswer) {
        self.answers.borrow_mut().push_back(answer);
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ModalRequest> {
        self.requests.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ModalChannel for ScriptedModal {
    async fn prompt(&self, request: ModalRequest) -> ModalAnswer {
        self.requests.borrow_mut().push(request);
        self.answers
            .borrow_mut()
            .pop_front()
            .unwrap_or(ModalAnswer::Cancelled)
    }
}

/// Parks each request until the host calls [`HostModal::respond`]
#[derive(Debug, Default)]
pub struct HostModal {
    pending: RefCell<Option<(ModalRequest, oneshot::Sender<ModalAnswer>)>>,
}

impl HostModal {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request currently waiting for an answer
    pub fn pending(&self) -> Option<ModalRequest> {
        self.pending.borrow().as_ref().map(|(req, _)| req.clone())
    }

    /// Resolve the waiting request. Returns false if nothing was waiting.
    pub fn respond(&self, answer: ModalAnswer) -> bool {
        match self.pending.borrow_mut().take() {
            Some((_, tx)) => tx.send(answer).is_ok(),
            None => false,
        }
    }
}

#[async_trait(?Send)]
impl ModalChannel for HostModal {
    async fn prompt(&self, request: ModalRequest) -> ModalAnswer {
        let (tx, rx) = oneshot::channel();
        // A newer request replaces (and thereby cancels) an older one
        if self.pending.borrow_mut().replace((request, tx)).is_some() {
            log::debug!("modal request superseded");
        }
        rx.await.unwrap_or(ModalAnswer::Cancelled)
    }
}
