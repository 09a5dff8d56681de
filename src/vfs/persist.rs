//! Persistence
//!
//! The whole tree serializes to one JSON document stored under a single key,
//! so a save is atomic at tree granularity.
//!
//! Saves coalesce: a request made while a save is in flight does not start a
//! second writer, it marks one follow-up save which re-snapshots the state
//! once the current write finishes.

use super::{FsError, FsResult, Node, Vfs};
use crate::kernel::storage::{Storage, StorageError};
use std::cell::Cell;

impl Vfs {
    /// Serialize the tree
    pub fn to_json(&self) -> FsResult<String> {
        serde_json::to_string(self.root()).map_err(|e| FsError::Corrupt(e.to_string()))
    }

    /// Rebuild a tree from [`Vfs::to_json`] output
    pub fn from_json(data: &str) -> FsResult<Self> {
        let root: Node = serde_json::from_str(data).map_err(|e| FsError::Corrupt(e.to_string()))?;
        Vfs::from_root(root)
    }
}

/// What a save request turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This call wrote the state (including any follow-ups queued meanwhile)
    Saved,
    /// Another save is running; it will write once more after finishing
    Queued,
}

/// Coalescing saver
#[derive(Debug, Default)]
pub struct Persister {
    in_flight: Cell<bool>,
    queued: Cell<bool>,
    completed: Cell<u64>,
}

impl Persister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.get()
    }

    /// Number of full snapshot writes performed
    pub fn completed(&self) -> u64 {
        self.completed.get()
    }

    /// Write the key/value pairs produced by `snapshot`.
    ///
    /// `snapshot` is called again for every queued follow-up, so the final
    /// write always reflects the latest state.
    pub async fn save<F>(&self, storage: &dyn Storage, mut snapshot: F) -> Result<SaveOutcome, StorageError>
    where
        F: FnMut() -> Result<Vec<(String, String)>, StorageError>,
    {
        if self.in_flight.get() {
            self.queued.set(true);
            log::debug!("save already in flight, queued a follow-up");
            return Ok(SaveOutcome::Queued);
        }

        self.in_flight.set(true);
        let result = self.write_until_settled(storage, &mut snapshot).await;
        self.in_flight.set(false);

        if let Err(e) = &result {
            log::warn!("save failed: {}", e);
        }
        result
    }

    async fn write_until_settled<F>(&self, storage: &dyn Storage, snapshot: &mut F) -> Result<SaveOutcome, StorageError>
    where
        F: FnMut() -> Result<Vec<(String, String)>, StorageError>,
    {
        loop {
            self.queued.set(false);
            for (key, value) in snapshot()? {
                storage.set(&key, &value).await?;
            }
            self.completed.set(self.completed.get() + 1);
            if !self.queued.get() {
                return Ok(SaveOutcome::Saved);
            }
        }
    }
}
