//! Demand model: a citizen request tracked through the status pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Position of a demand in the status pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DemandStatus {
    Pending,
    InProgress,
    Completed,
}

impl DemandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DemandStatus::Pending => "pending",
            DemandStatus::InProgress => "in_progress",
            DemandStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DemandStatus::Pending),
            "in_progress" => Some(DemandStatus::InProgress),
            "completed" => Some(DemandStatus::Completed),
            _ => None,
        }
    }

    /// The next step in the pipeline, `None` once completed.
    pub fn next(&self) -> Option<Self> {
        match self {
            DemandStatus::Pending => Some(DemandStatus::InProgress),
            DemandStatus::InProgress => Some(DemandStatus::Completed),
            DemandStatus::Completed => None,
        }
    }
}

/// Demand priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Ordering weight, higher is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }
}

/// A demand filed by or on behalf of a citizen.
///
/// The identifier is generated on the client and never remapped, so a demand
/// created offline keeps the same id once it reaches the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Demand {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub classification: String,
    pub status: DemandStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "type", default)]
    pub demand_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deadline: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<GeoPoint>,
}

impl Demand {
    /// Build a new pending demand from a draft, assigning a fresh id.
    pub fn from_draft(draft: NewDemand) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: draft.title.trim().to_string(),
            description: draft.description,
            classification: draft.classification,
            status: DemandStatus::Pending,
            priority: draft.priority,
            demand_type: draft.demand_type,
            deadline: draft.deadline,
            contact_id: draft.contact_id,
            created_at: Utc::now(),
            tags: draft.tags,
            location: draft.location,
        }
    }

    /// Past its deadline and not yet completed.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        self.status != DemandStatus::Completed && self.deadline.is_some_and(|d| d < today)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags
            .as_ref()
            .is_some_and(|tags| tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
    }
}

/// Submission payload for a new demand.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDemand {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub classification: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "type", default)]
    pub demand_type: String,
    #[serde(default)]
    pub deadline: Option<NaiveDate>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}
