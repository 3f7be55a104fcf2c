//! Local snapshot cache.
//!
//! A persistent string-keyed store holding the last good snapshot of each
//! collection, the offline write queue and a few session values.

mod memory;
mod snapshot;
mod sqlite;

#[cfg(test)]
pub(crate) mod flaky;

pub use memory::MemoryKeyValueStore;
pub use snapshot::*;
pub use sqlite::SqliteKeyValueStore;

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Local database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Local storage is full ({needed} bytes needed, quota {quota})")]
    QuotaExceeded { needed: usize, quota: usize },
}

/// String-keyed persisted store. Values are JSON text.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}
