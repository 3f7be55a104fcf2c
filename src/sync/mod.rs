//! Offline sync manager.
//!
//! Loads data from the remote store or falls back to the local snapshot cache,
//! queues creations while offline and drains the queue on reconnect.

mod error;
mod manager;
mod report;
mod session;

pub use error::SyncError;
pub use manager::{SyncManager, SyncState};
pub use report::{FailedWrite, SyncReport};
pub use session::SyncSession;
