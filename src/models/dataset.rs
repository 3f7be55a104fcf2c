//! The merged view handed to callers: remote or cached snapshot plus queued writes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::{Contact, DeadLetter, Demand, DemandStats, Interaction, User};

/// A demand as seen by the caller: waiting in the offline queue, confirmed by
/// the remote store, or rejected during a drain and waiting for a manual retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "record", rename_all = "snake_case")]
pub enum RecordEntry {
    Pending(Demand),
    Confirmed(Demand),
    Failed(DeadLetter),
}

impl RecordEntry {
    pub fn demand(&self) -> &Demand {
        match self {
            RecordEntry::Pending(d) | RecordEntry::Confirmed(d) => d,
            RecordEntry::Failed(letter) => &letter.demand,
        }
    }

    pub fn into_demand(self) -> Demand {
        match self {
            RecordEntry::Pending(d) | RecordEntry::Confirmed(d) => d,
            RecordEntry::Failed(letter) => letter.demand,
        }
    }

    pub fn id(&self) -> &str {
        &self.demand().id
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordEntry::Pending(_))
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, RecordEntry::Confirmed(_))
    }

    /// Reason of the last failed sync attempt, for failed entries.
    pub fn failure(&self) -> Option<&str> {
        match self {
            RecordEntry::Failed(letter) => Some(&letter.reason),
            _ => None,
        }
    }
}

/// Where the non-queued part of a dataset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    Cache,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub records: Vec<RecordEntry>,
    pub contacts: Vec<Contact>,
    pub users: Vec<User>,
    pub interactions: Vec<Interaction>,
    pub dashboard_config: Option<Value>,
    pub role_permissions: Option<Value>,
    pub stats: Option<DemandStats>,
    pub source: DataSource,
    pub fetched_at: DateTime<Utc>,
}

impl Dataset {
    pub fn empty(source: DataSource) -> Self {
        Self {
            records: Vec::new(),
            contacts: Vec::new(),
            users: Vec::new(),
            interactions: Vec::new(),
            dashboard_config: None,
            role_permissions: None,
            stats: None,
            source,
            fetched_at: Utc::now(),
        }
    }

    pub fn demands(&self) -> impl Iterator<Item = &Demand> {
        self.records.iter().map(RecordEntry::demand)
    }

    pub fn find_record(&self, id: &str) -> Option<&RecordEntry> {
        self.records.iter().find(|entry| entry.id() == id)
    }
}
