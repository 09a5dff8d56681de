//! Key/value storage
//!
//! The host provides a string→string store (browser `localStorage`, a JSON
//! file for the CLI, memory for tests). Access is async so a backend may
//! suspend; every write replaces a single key atomically.

use async_trait::async_trait;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },
    #[error("corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn corrupt(key: &str, reason: impl std::fmt::Display) -> Self {
        StorageError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait(?Send)]
pub trait Storage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Storage keys, all under one prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    prefix: String,
}

impl StorageKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    pub fn credentials(&self) -> String {
        self.key("user_credentials")
    }

    pub fn groups(&self) -> String {
        self.key("user_groups")
    }

    pub fn fs_data(&self) -> String {
        self.key("fs_data")
    }

    pub fn aliases(&self) -> String {
        self.key("aliases")
    }

    pub fn environment(&self) -> String {
        self.key("environment")
    }

    pub fn history(&self) -> String {
        self.key("history")
    }

    /// Owned by the AI client; the core never reads or writes it
    pub fn ai_config(&self) -> String {
        self.key("ai_config")
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    map: RefCell<BTreeMap<String, String>>,
    writes: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without counting it as a write
    pub fn insert(&self, key: &str, value: &str) {
        self.map.borrow_mut().insert(key.to_string(), value.to_string());
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.map.borrow().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.map.borrow().clone()
    }

    pub fn from_snapshot(map: BTreeMap<String, String>) -> Self {
        Self {
            map: RefCell::new(map),
            writes: Cell::new(0),
        }
    }

    /// Number of `set` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }
}

#[async_trait(?Send)]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.borrow().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.writes.set(self.writes.get() + 1);
        self.map.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.map.borrow_mut().remove(key);
        Ok(())
    }
}
