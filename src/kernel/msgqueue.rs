//! Message bus
//!
//! Process-wide mailboxes keyed by job id or by a well-known name. Each
//! mailbox is a FIFO of opaque text payloads; reads are destructive.
//! A job can also await the next message, which is one of the runtime's
//! suspension points.

use super::jobs::JobId;
use slab::Slab;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use thiserror::Error;

/// Default mailbox capacity
pub const MAX_MESSAGES: usize = 1024;

/// Mailbox address: a job id or a named channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailboxKey {
    Job(JobId),
    Named(String),
}

impl MailboxKey {
    /// All-digit strings address jobs, anything else is a name
    pub fn parse(s: &str) -> Self {
        match s.parse::<JobId>() {
            Ok(id) if !s.starts_with('+') => MailboxKey::Job(id),
            _ => MailboxKey::Named(s.to_string()),
        }
    }
}

impl std::fmt::Display for MailboxKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxKey::Job(id) => write!(f, "{}", id),
            MailboxKey::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("mailbox name cannot be empty")]
    EmptyName,
    #[error("mailbox {0} is full")]
    MailboxFull(MailboxKey),
}

#[derive(Debug, Default)]
struct Mailbox {
    messages: VecDeque<String>,
    sent: u64,
    received: u64,
}

/// Mailbox counters, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    pub queued: usize,
    pub sent: u64,
    pub received: u64,
}

#[derive(Debug)]
struct Waiter {
    key: MailboxKey,
    waker: Waker,
}

#[derive(Debug)]
pub struct MessageBus {
    boxes: HashMap<MailboxKey, Mailbox>,
    waiters: Slab<Waiter>,
    capacity: usize,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(MAX_MESSAGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            boxes: HashMap::new(),
            waiters: Slab::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a payload and wake anyone waiting on the mailbox
    pub fn post(&mut self, key: MailboxKey, payload: impl Into<String>) -> Result<(), BusError> {
        if matches!(&key, MailboxKey::Named(n) if n.is_empty()) {
            return Err(BusError::EmptyName);
        }
        let mailbox = self.boxes.entry(key.clone()).or_default();
        if mailbox.messages.len() >= self.capacity {
            return Err(BusError::MailboxFull(key));
        }
        mailbox.messages.push_back(payload.into());
        mailbox.sent += 1;
        log::trace!("bus: posted to {}", key);

        for (_, waiter) in self.waiters.iter() {
            if waiter.key == key {
                waiter.waker.wake_by_ref();
            }
        }
        Ok(())
    }

    /// Take the oldest payload
    pub fn try_read(&mut self, key: &MailboxKey) -> Option<String> {
        let mailbox = self.boxes.get_mut(key)?;
        let msg = mailbox.messages.pop_front()?;
        mailbox.received += 1;
        Some(msg)
    }

    /// Drain the mailbox in FIFO order
    pub fn read_all(&mut self, key: &MailboxKey) -> Vec<String> {
        match self.boxes.get_mut(key) {
            Some(mailbox) => {
                let drained: Vec<String> = mailbox.messages.drain(..).collect();
                mailbox.received += drained.len() as u64;
                drained
            }
            None => Vec::new(),
        }
    }

    pub fn pending(&self, key: &MailboxKey) -> usize {
        self.boxes.get(key).map_or(0, |m| m.messages.len())
    }

    pub fn stats(&self, key: &MailboxKey) -> Option<MailboxStats> {
        self.boxes.get(key).map(|m| MailboxStats {
            queued: m.messages.len(),
            sent: m.sent,
            received: m.received,
        })
    }

    /// Drop a mailbox and whatever it still holds
    pub fn remove(&mut self, key: &MailboxKey) -> usize {
        self.boxes.remove(key).map_or(0, |m| m.messages.len())
    }

    /// Mailboxes that currently hold messages, in display order
    pub fn keys(&self) -> Vec<MailboxKey> {
        let mut keys: Vec<MailboxKey> = self
            .boxes
            .iter()
            .filter(|(_, m)| !m.messages.is_empty())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_by_key(|k| k.to_string());
        keys
    }
}

/// Await the next payload on `key`
pub fn recv(bus: &Rc<RefCell<MessageBus>>, key: MailboxKey) -> Recv {
    Recv {
        bus: bus.clone(),
        key,
        slot: None,
    }
}

/// Future returned by [`recv`]
pub struct Recv {
    bus: Rc<RefCell<MessageBus>>,
    key: MailboxKey,
    slot: Option<usize>,
}

impl Future for Recv {
    type Output = String;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<String> {
        let this = &mut *self;
        let mut bus = this.bus.borrow_mut();
        if let Some(msg) = bus.try_read(&this.key) {
            if let Some(slot) = this.slot.take() {
                bus.waiters.try_remove(slot);
            }
            return Poll::Ready(msg);
        }
        match this.slot.and_then(|slot| bus.waiters.get_mut(slot)) {
            Some(waiter) => waiter.waker = cx.waker().clone(),
            None => {
                let slot = bus.waiters.insert(Waiter {
                    key: this.key.clone(),
                    waker: cx.waker().clone(),
                });
                this.slot = Some(slot);
            }
        }
        Poll::Pending
    }
}

impl Drop for Recv {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take()
            && let Ok(mut bus) = self.bus.try_borrow_mut()
        {
            bus.waiters.try_remove(slot);
        }
    }
}
