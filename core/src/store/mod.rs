//! Key/value store capability
//!
//! The write lock and retry counter keep their state in a [`Store`]. Callers
//! pass a handle in; nothing here reaches for a process-wide instance.

pub mod scoped;

pub use scoped::{Scope, ScopedStore};

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Get/set/delete over JSON values, with no transactional guarantees
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>>;
    fn set(&self, key: &str, value: JsonValue) -> StoreResult<()>;
    fn del(&self, key: &str) -> StoreResult<()>;
}

/// In-process store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of all keys, sorted
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<JsonValue>> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn del(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}
