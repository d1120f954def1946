//! Global write lock kept in a [`Store`]
//!
//! The lock is a single well-known key holding `1`. Waiting is a poll loop;
//! there is no fairness and no lease expiry.

use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::LockConfig;
use crate::store::{Store, StoreError};

/// Key holding the global write lock
pub const GLOBAL_WRITE_KEY: &str = "agent-lock-global-write";

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Global write is locked")]
    Timeout { waited: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LockError {
    /// Status code reported to callers of the host runtime
    pub fn code(&self) -> u16 {
        match self {
            LockError::Timeout { .. } => 429,
            LockError::Store(_) => 500,
        }
    }
}

pub struct WriteLock {
    store: Arc<dyn Store>,
    max_wait: Duration,
    poll_interval: Duration,
}

impl WriteLock {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, &LockConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: &LockConfig) -> Self {
        Self {
            store,
            max_wait: Duration::from_millis(config.max_wait_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn lock(&self) -> Result<(), LockError> {
        self.store.set(GLOBAL_WRITE_KEY, json!(1))?;
        Ok(())
    }

    pub fn unlock(&self) -> Result<(), LockError> {
        self.store.del(GLOBAL_WRITE_KEY)?;
        Ok(())
    }

    pub fn is_locked(&self) -> Result<bool, LockError> {
        let value = self.store.get(GLOBAL_WRITE_KEY)?;
        Ok(value.as_ref().and_then(JsonValue::as_i64) == Some(1))
    }

    /// Wait for the lock to clear, then run `f`.
    ///
    /// The lock is taken and released again before `f` runs, so `f` itself
    /// executes unlocked.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Result<T, LockError> {
        let start = Instant::now();
        while self.is_locked()? {
            let waited = start.elapsed();
            if waited > self.max_wait {
                debug!(waited_ms = waited.as_millis() as u64, "Gave up waiting for global write lock");
                return Err(LockError::Timeout { waited });
            }
            std::thread::sleep(self.poll_interval);
        }

        self.lock()?;
        self.unlock()?;
        Ok(f())
    }
}
