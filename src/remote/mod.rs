//! Remote data client contract.
//!
//! The remote store is an opaque collection CRUD service. Calls return
//! `Result`s and never panic; callers decide which errors to absorb.

mod error;
mod http;

#[cfg(test)]
pub(crate) mod fake;

pub use error::RemoteError;
pub use http::HttpRemoteClient;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Collection, MatchKey, RemoteQuery};

/// Collection-scoped CRUD operations against the remote store.
#[async_trait]
pub trait RemoteDataClient: Send + Sync {
    /// Read rows matching the query.
    async fn select(
        &self,
        collection: Collection,
        query: &RemoteQuery,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Insert a new row. Fails with [`RemoteError::Conflict`] when the id exists.
    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError>;

    /// Merge `patch` into every row matching `key`, returning the updated rows.
    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        key: &MatchKey,
    ) -> Result<Vec<Value>, RemoteError>;

    /// Insert or replace the row with the same id.
    async fn upsert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError>;

    /// Delete every row matching `key`, returning how many were removed.
    async fn delete(&self, collection: Collection, key: &MatchKey) -> Result<usize, RemoteError>;

    /// Cheap reachability check used by the connectivity probe.
    async fn ping(&self) -> Result<(), RemoteError>;
}
