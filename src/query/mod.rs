//! Filtering, sorting and pagination over the merged record list.

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{DemandStatus, Priority, RecordEntry};

/// Criteria for narrowing the record list. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordFilter {
    pub statuses: Vec<DemandStatus>,
    pub priority: Option<Priority>,
    #[serde(rename = "type")]
    pub demand_type: Option<String>,
    pub tag: Option<String>,
    pub contact_id: Option<String>,
    /// Case-insensitive substring over title, description and tags.
    pub text: Option<String>,
    pub created_from: Option<NaiveDate>,
    pub created_to: Option<NaiveDate>,
    pub pending_only: bool,
}

impl RecordFilter {
    pub fn matches(&self, entry: &RecordEntry) -> bool {
        if self.pending_only && !entry.is_pending() {
            return false;
        }

        let demand = entry.demand();
        if !self.statuses.is_empty() && !self.statuses.contains(&demand.status) {
            return false;
        }
        if self.priority.is_some_and(|p| p != demand.priority) {
            return false;
        }
        if let Some(demand_type) = &self.demand_type {
            if !demand.demand_type.eq_ignore_ascii_case(demand_type) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !demand.has_tag(tag) {
                return false;
            }
        }
        if let Some(contact_id) = &self.contact_id {
            if demand.contact_id.as_deref() != Some(contact_id.as_str()) {
                return false;
            }
        }

        let created = demand.created_at.date_naive();
        if self.created_from.is_some_and(|from| created < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| created > to) {
            return false;
        }

        match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let needle = text.to_lowercase();
                demand.title.to_lowercase().contains(&needle)
                    || demand.description.to_lowercase().contains(&needle)
                    || demand
                        .tags
                        .iter()
                        .flatten()
                        .any(|t| t.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Created,
    Deadline,
    Priority,
    Title,
}

/// Defaults to newest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for RecordSort {
    fn default() -> Self {
        Self {
            field: SortField::Created,
            descending: true,
        }
    }
}

impl RecordSort {
    pub fn new(field: SortField, descending: bool) -> Self {
        Self { field, descending }
    }

    fn compare(&self, a: &RecordEntry, b: &RecordEntry) -> Ordering {
        let (a, b) = (a.demand(), b.demand());
        let ordering = match self.field {
            SortField::Created => a.created_at.cmp(&b.created_at),
            SortField::Priority => a.priority.rank().cmp(&b.priority.rank()),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::Deadline => {
                // No deadline sorts last in either direction.
                return match (a.deadline, b.deadline) {
                    (Some(x), Some(y)) if self.descending => y.cmp(&x),
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
            }
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// One-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: usize,
    pub per_page: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl Page {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.max(1),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub items: Vec<RecordEntry>,
    /// Matches across all pages.
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

pub fn apply(entries: &[RecordEntry], filter: &RecordFilter, sort: RecordSort, page: Page) -> PageResult {
    let page = Page::new(page.page, page.per_page);

    let mut matched: Vec<&RecordEntry> = entries.iter().filter(|e| filter.matches(e)).collect();
    matched.sort_by(|a, b| sort.compare(a, b));

    let total = matched.len();
    let total_pages = total.div_ceil(page.per_page);
    let items = matched
        .into_iter()
        .skip((page.page - 1) * page.per_page)
        .take(page.per_page)
        .cloned()
        .collect();

    PageResult {
        items,
        total,
        page: page.page,
        total_pages,
    }
}
