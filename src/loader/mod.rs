//! Flag set resolution.
//!
//! The loader tries the local cache first and only consults the remote
//! source when the cached entry is missing or invalid. Every failure is
//! recovered; callers always receive a [`LoadOutcome`] describing what
//! happened and decide how to report it.

mod reqwest_source;

pub use reqwest_source::ReqwestConfigSource;

use async_trait::async_trait;
use thiserror::Error;

use crate::flags::{FlagSet, FlagSetError};
use crate::storage::{CacheError, FlagCache};

/// Remote configuration provider.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Human readable location, reported in `LoadFailed` events.
    fn describe(&self) -> String;

    /// Single fetch attempt; no retries.
    async fn fetch(&self) -> Result<FlagSet, FetchError>;
}

/// Failures while obtaining the remote flag set.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint answered with status {0}")]
    Status(u16),
    #[error("invalid payload: {0}")]
    Payload(#[from] FlagSetError),
    /// For custom sources whose backend cannot be reached at all (no
    /// connection, offline host); the reqwest source reports `Http` instead.
    #[error("config source unavailable: {0}")]
    Unavailable(String),
}

/// Why the cached entry was not used.
#[derive(Debug, Error)]
pub enum CacheMiss {
    #[error("no cached entry")]
    Absent,
    #[error("cached entry is invalid: {0}")]
    Corrupt(#[from] FlagSetError),
    #[error("cache read failed: {0}")]
    Unreadable(#[from] CacheError),
}

/// Where the effective flag set came from.
#[derive(Debug)]
pub enum LoadOutcome {
    Cache(FlagSet),
    Remote { flags: FlagSet, cache_miss: CacheMiss },
    /// Both sources failed; the controller keeps the flags it already holds.
    Fallback { cache_miss: CacheMiss, error: FetchError },
}

impl LoadOutcome {
    pub fn flags(&self) -> Option<&FlagSet> {
        match self {
            LoadOutcome::Cache(flags) | LoadOutcome::Remote { flags, .. } => Some(flags),
            LoadOutcome::Fallback { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoadOutcome::Cache(_) => "cache",
            LoadOutcome::Remote { .. } => "remote",
            LoadOutcome::Fallback { .. } => "fallback",
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, LoadOutcome::Fallback { .. })
    }
}

/// Read and validate the cached entry stored under `key`.
pub fn read_cached(cache: &dyn FlagCache, key: &str) -> Result<FlagSet, CacheMiss> {
    let raw = cache.get(key)?.ok_or(CacheMiss::Absent)?;
    Ok(FlagSet::from_json(&raw)?)
}

/// Resolve the flag set: cache, then remote, then fallback.
pub async fn resolve(cache: &dyn FlagCache, key: &str, source: &dyn ConfigSource) -> LoadOutcome {
    let cache_miss = match read_cached(cache, key) {
        Ok(flags) => return LoadOutcome::Cache(flags),
        Err(miss) => miss,
    };

    match source.fetch().await {
        Ok(flags) => LoadOutcome::Remote { flags, cache_miss },
        Err(error) => LoadOutcome::Fallback { cache_miss, error },
    }
}
