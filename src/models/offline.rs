//! Persisted records of writes that could not reach the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Demand;

/// A queued demand whose remote insert failed during a drain.
///
/// Dead letters stay persisted until they are retried or explicitly discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub demand: Demand,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(demand: Demand, reason: impl Into<String>) -> Self {
        Self {
            demand,
            reason: reason.into(),
            failed_at: Utc::now(),
        }
    }
}
