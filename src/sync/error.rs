//! Errors surfaced by sync manager intents.

use thiserror::Error;

use crate::cache::CacheError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The offline write could not be persisted locally
    #[error("Could not save offline: {0}")]
    Storage(#[source] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The operation needs the remote store
    #[error("Operation requires a connection")]
    Offline,

    #[error("Demand {0} not found")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),
}
