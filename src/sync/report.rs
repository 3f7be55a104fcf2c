//! Outcome of one pass over the offline write queue.

use serde::Serialize;

/// A queued write the remote did not accept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedWrite {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Number of queued writes attempted in this pass.
    pub attempted: usize,
    pub succeeded: Vec<String>,
    /// Failed writes were moved to the dead-letter list.
    pub failed: Vec<FailedWrite>,
    /// Another drain was already running, nothing was attempted.
    pub skipped: bool,
}

impl SyncReport {
    pub(crate) fn already_running() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn synced_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human-readable result, e.g. "2 of 3 synced, items r7 require manual retry".
    pub fn summary(&self) -> String {
        if self.skipped {
            return "Sync already in progress".to_string();
        }
        if self.attempted == 0 {
            return "Nothing to sync".to_string();
        }

        let mut summary = format!("{} of {} synced", self.synced_count(), self.attempted);
        if !self.failed.is_empty() {
            let ids: Vec<&str> = self.failed.iter().map(|f| f.id.as_str()).collect();
            summary.push_str(&format!(", items {} require manual retry", ids.join(", ")));
        }
        summary
    }
}
