//! Last-known flag cache.
//!
//! The controller keeps a single string-keyed entry holding a JSON-encoded
//! flag set. Hosts use it for development overrides; a valid entry wins over
//! the remote endpoint.

mod redb_cache;

pub use redb_cache::RedbFlagCache;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

/// Failures surfaced by cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// String-keyed persistent storage, modelled after browser local storage.
pub trait FlagCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache; nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryFlagCache {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryFlagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry, convenient for development overrides.
    pub fn with_entry(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.write().insert(key.into(), value.into());
        self
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlagCache for MemoryFlagCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.write().remove(key);
        Ok(())
    }
}
