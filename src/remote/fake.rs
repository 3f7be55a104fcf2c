//! In-memory remote used by sync tests, with switches for outages and per-row failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteDataClient, RemoteError};
use crate::models::{Collection, MatchKey, RemoteQuery};

#[derive(Default)]
pub(crate) struct FakeRemote {
    rows: Mutex<HashMap<Collection, Vec<Value>>>,
    unreachable: AtomicBool,
    rejected_ids: Mutex<HashSet<String>>,
    insert_log: Mutex<Vec<String>>,
    insert_delay_ms: AtomicUsize,
    select_delay_ms: AtomicUsize,
}

impl FakeRemote {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seed(&self, collection: Collection, rows: Vec<Value>) {
        self.rows.lock().unwrap().insert(collection, rows);
    }

    pub(crate) fn rows(&self, collection: Collection) -> Vec<Value> {
        self.rows
            .lock()
            .unwrap()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn ids(&self, collection: Collection) -> Vec<String> {
        self.rows(collection)
            .iter()
            .filter_map(|r| r["id"].as_str().map(str::to_string))
            .collect()
    }

    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Inserts of this id fail with a validation error.
    pub(crate) fn reject_id(&self, id: &str) {
        self.rejected_ids.lock().unwrap().insert(id.to_string());
    }

    pub(crate) fn clear_rejections(&self) {
        self.rejected_ids.lock().unwrap().clear();
    }

    /// Ids in the order inserts were attempted, including failed attempts.
    pub(crate) fn insert_log(&self) -> Vec<String> {
        self.insert_log.lock().unwrap().clone()
    }

    pub(crate) fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub(crate) fn set_select_delay(&self, delay: Duration) {
        self.select_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), RemoteError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn row_id(row: &Value) -> String {
    row["id"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl RemoteDataClient for FakeRemote {
    async fn select(
        &self,
        collection: Collection,
        query: &RemoteQuery,
    ) -> Result<Vec<Value>, RemoteError> {
        let delay = self.select_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        self.check_reachable()?;
        Ok(query.apply(self.rows(collection)))
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError> {
        let id = row_id(&row);
        self.insert_log.lock().unwrap().push(id.clone());

        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        self.check_reachable()?;
        if self.rejected_ids.lock().unwrap().contains(&id) {
            return Err(RemoteError::api(400, "VALIDATION_ERROR", "rejected by remote"));
        }

        let mut rows = self.rows.lock().unwrap();
        let entries = rows.entry(collection).or_default();
        if entries.iter().any(|r| row_id(r) == id) {
            return Err(RemoteError::Conflict(format!("Document {} already exists", id)));
        }
        entries.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        collection: Collection,
        patch: Value,
        key: &MatchKey,
    ) -> Result<Vec<Value>, RemoteError> {
        self.check_reachable()?;
        let mut rows = self.rows.lock().unwrap();
        let mut updated = Vec::new();
        for row in rows.entry(collection).or_default().iter_mut() {
            if !key.matches(row) {
                continue;
            }
            if let (Value::Object(target), Value::Object(changes)) = (&mut *row, &patch) {
                for (k, v) in changes {
                    target.insert(k.clone(), v.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn upsert(&self, collection: Collection, row: Value) -> Result<Value, RemoteError> {
        self.check_reachable()?;
        let id = row_id(&row);
        let mut rows = self.rows.lock().unwrap();
        let entries = rows.entry(collection).or_default();
        match entries.iter_mut().find(|r| row_id(r) == id) {
            Some(existing) => *existing = row.clone(),
            None => entries.push(row.clone()),
        }
        Ok(row)
    }

    async fn delete(&self, collection: Collection, key: &MatchKey) -> Result<usize, RemoteError> {
        self.check_reachable()?;
        let mut rows = self.rows.lock().unwrap();
        let entries = rows.entry(collection).or_default();
        let before = entries.len();
        entries.retain(|r| !key.matches(r));
        Ok(before - entries.len())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        self.check_reachable()
    }
}
