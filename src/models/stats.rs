//! Precomputed dashboard counters over demands.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Demand, DemandStatus, Priority};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DemandStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub low_priority: usize,
    pub medium_priority: usize,
    pub high_priority: usize,
    pub overdue: usize,
}

impl DemandStats {
    pub fn from_demands<'a>(demands: impl IntoIterator<Item = &'a Demand>, today: NaiveDate) -> Self {
        let mut stats = Self::default();
        for demand in demands {
            stats.total += 1;
            match demand.status {
                DemandStatus::Pending => stats.pending += 1,
                DemandStatus::InProgress => stats.in_progress += 1,
                DemandStatus::Completed => stats.completed += 1,
            }
            match demand.priority {
                Priority::Low => stats.low_priority += 1,
                Priority::Medium => stats.medium_priority += 1,
                Priority::High => stats.high_priority += 1,
            }
            if demand.is_overdue(today) {
                stats.overdue += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDemand;

    #[test]
    fn test_counts() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut late = Demand::from_draft(NewDemand {
            title: "late".to_string(),
            priority: Priority::High,
            deadline: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        });
        late.status = DemandStatus::InProgress;
        let mut done = Demand::from_draft(NewDemand {
            title: "done".to_string(),
            priority: Priority::Low,
            deadline: NaiveDate::from_ymd_opt(2024, 2, 1),
            ..Default::default()
        });
        done.status = DemandStatus::Completed;
        let fresh = Demand::from_draft(NewDemand {
            title: "fresh".to_string(),
            ..Default::default()
        });

        let stats = DemandStats::from_demands([&late, &done, &fresh], today);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.high_priority, 1);
        assert_eq!(stats.medium_priority, 1);
        assert_eq!(stats.low_priority, 1);
        assert_eq!(stats.overdue, 1);
    }
}
