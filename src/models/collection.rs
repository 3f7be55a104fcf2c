//! Collection names and the generic query shape shared by the remote client and the store.
//!
//! Rows are opaque JSON objects. Queries are equality filters on top-level fields,
//! an optional single-field order, a limit and a column projection.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

/// Id of the dashboard configuration document in the `settings` collection.
pub const DASHBOARD_CONFIG_ID: &str = "dashboard_config";
/// Id of the role permission matrix document in the `settings` collection.
pub const ROLE_PERMISSIONS_ID: &str = "role_permissions";

const PARAM_SELECT: &str = "select";
const PARAM_ORDER: &str = "order";
const PARAM_LIMIT: &str = "limit";

/// Remote collections known to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Demands,
    Contacts,
    Users,
    Interactions,
    Settings,
    /// Read-only projection computed from `demands`.
    DemandStats,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Demands,
        Collection::Contacts,
        Collection::Users,
        Collection::Interactions,
        Collection::Settings,
        Collection::DemandStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Demands => "demands",
            Collection::Contacts => "contacts",
            Collection::Users => "users",
            Collection::Interactions => "interactions",
            Collection::Settings => "settings",
            Collection::DemandStats => "demand_stats",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Collection::DemandStats)
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort instruction for a select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// Select parameters: projection, equality filters, order and limit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteQuery {
    pub columns: Option<Vec<String>>,
    pub filters: Vec<(String, String)>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl RemoteQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn eq(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order = Some(Order {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Encode as URL query pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(columns) = &self.columns {
            params.push((PARAM_SELECT.to_string(), columns.join(",")));
        }
        if let Some(order) = &self.order {
            let value = if order.descending {
                format!("{}.desc", order.field)
            } else {
                order.field.clone()
            };
            params.push((PARAM_ORDER.to_string(), value));
        }
        if let Some(limit) = self.limit {
            params.push((PARAM_LIMIT.to_string(), limit.to_string()));
        }
        params.extend(self.filters.iter().cloned());
        params
    }

    /// Decode from URL query pairs. Every non-reserved key is an equality filter.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let mut query = Self::default();

        for (key, value) in params {
            match key.as_str() {
                PARAM_SELECT => {
                    let columns: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect();
                    if !columns.is_empty() {
                        query.columns = Some(columns);
                    }
                }
                PARAM_ORDER => {
                    let (field, descending) = match value.strip_suffix(".desc") {
                        Some(field) => (field, true),
                        None => (value.strip_suffix(".asc").unwrap_or(value), false),
                    };
                    if field.is_empty() {
                        return Err("order requires a field name".to_string());
                    }
                    query.order = Some(Order {
                        field: field.to_string(),
                        descending,
                    });
                }
                PARAM_LIMIT => {
                    let limit = value
                        .parse()
                        .map_err(|_| format!("Invalid limit: {}", value))?;
                    query.limit = Some(limit);
                }
                _ => query.filters.push((key.clone(), value.clone())),
            }
        }

        // Deterministic filter order regardless of map iteration.
        query.filters.sort();
        Ok(query)
    }

    /// Apply filters, order, limit and projection to a set of rows.
    pub fn apply(&self, rows: Vec<Value>) -> Vec<Value> {
        let mut rows: Vec<Value> = rows
            .into_iter()
            .filter(|row| {
                self.filters
                    .iter()
                    .all(|(field, expected)| field_matches(row, field, expected))
            })
            .collect();

        if let Some(order) = &self.order {
            // Stable sort keeps insertion order among equal keys.
            rows.sort_by(|a, b| {
                let ordering = compare_values(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }

        match &self.columns {
            Some(columns) => rows.into_iter().map(|row| project(row, columns)).collect(),
            None => rows,
        }
    }
}

/// Single-field equality used to target updates and deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub field: String,
    pub value: String,
}

impl MatchKey {
    pub fn new(field: &str, value: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self::new("id", id)
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![(self.field.clone(), self.value.clone())]
    }

    /// Decode from URL query pairs; exactly one pair is required.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let mut pairs = params.iter();
        match (pairs.next(), pairs.next()) {
            (Some((field, value)), None) => Ok(Self::new(field, value.clone())),
            (None, _) => Err("A match filter is required (e.g. ?id=...)".to_string()),
            (Some(_), Some(_)) => Err("Exactly one match filter is allowed".to_string()),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        field_matches(row, &self.field, &self.value)
    }
}

/// Strings compare by content, `null` and missing fields match "null",
/// everything else compares by its JSON text.
fn field_matches(row: &Value, field: &str, expected: &str) -> bool {
    match row.get(field) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => expected == "null",
        Some(other) => other.to_string() == expected,
    }
}

/// Missing and null values sort after everything else in ascending order.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn project(row: Value, columns: &[String]) -> Value {
    match row {
        Value::Object(mut map) => {
            map.retain(|key, _| columns.iter().any(|c| c == key));
            Value::Object(map)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Value> {
        vec![
            json!({"id": "a", "status": "pending", "score": 3, "createdAt": "2024-01-02"}),
            json!({"id": "b", "status": "completed", "score": 10, "createdAt": "2024-01-03"}),
            json!({"id": "c", "status": "pending", "score": null, "createdAt": "2024-01-01"}),
        ]
    }

    fn ids(rows: &[Value]) -> Vec<&str> {
        rows.iter().map(|r| r["id"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_filter_order_limit() {
        let query = RemoteQuery::all()
            .eq("status", "pending")
            .order_by("createdAt", true)
            .limit(1);
        assert_eq!(ids(&query.apply(rows())), vec!["a"]);
    }

    #[test]
    fn test_numeric_order_puts_missing_last() {
        let asc = RemoteQuery::all().order_by("score", false).apply(rows());
        assert_eq!(ids(&asc), vec!["a", "b", "c"]);

        let desc = RemoteQuery::all().order_by("score", true).apply(rows());
        assert_eq!(ids(&desc), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_projection() {
        let projected = RemoteQuery::all()
            .eq("id", "b")
            .select(&["id", "status"])
            .apply(rows());
        assert_eq!(projected, vec![json!({"id": "b", "status": "completed"})]);
    }

    #[test]
    fn test_non_string_filter_uses_json_text() {
        let matched = RemoteQuery::all().eq("score", "10").apply(rows());
        assert_eq!(ids(&matched), vec!["b"]);

        let nulls = RemoteQuery::all().eq("score", "null").apply(rows());
        assert_eq!(ids(&nulls), vec!["c"]);
    }

    #[test]
    fn test_params_round_trip() {
        let query = RemoteQuery::all()
            .select(&["id", "title"])
            .eq("status", "pending")
            .order_by("createdAt", true)
            .limit(25);

        let params: HashMap<String, String> = query.to_params().into_iter().collect();
        assert_eq!(params["order"], "createdAt.desc");
        assert_eq!(RemoteQuery::from_params(&params).unwrap(), query);
    }

    #[test]
    fn test_params_reject_bad_limit() {
        let params = HashMap::from([("limit".to_string(), "many".to_string())]);
        assert!(RemoteQuery::from_params(&params).is_err());
    }

    #[test]
    fn test_match_key_requires_exactly_one_pair() {
        assert!(MatchKey::from_params(&HashMap::new()).is_err());

        let one = HashMap::from([("id".to_string(), "x".to_string())]);
        assert_eq!(MatchKey::from_params(&one).unwrap(), MatchKey::id("x"));

        let two = HashMap::from([
            ("id".to_string(), "x".to_string()),
            ("status".to_string(), "pending".to_string()),
        ]);
        assert!(MatchKey::from_params(&two).is_err());
    }

    #[test]
    fn test_collection_names() {
        for collection in Collection::ALL {
            assert_eq!(Collection::parse(collection.as_str()), Some(collection));
        }
        assert_eq!(Collection::parse("topics"), None);
        assert!(Collection::DemandStats.is_read_only());
        assert!(!Collection::Demands.is_read_only());
    }
}
