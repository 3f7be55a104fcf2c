//! Typed helpers over the key-value store.
//!
//! Display reads are parse-guarded: an unreadable or corrupt entry is logged
//! and treated as absent. Read-modify-write cycles on the queue and dead
//! letters fail instead when the store cannot be read, so a transient error
//! never overwrites queued writes. Every write replaces the whole value.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use super::{CacheError, KeyValueStore};
use crate::models::{Collection, DeadLetter, Demand, DemandStats, GeoPoint, User};

pub const MAP_COORDINATES_KEY: &str = "map_coordinates";
pub const SESSION_USER_KEY: &str = "session_user";
pub const ONBOARDING_COMPLETED_KEY: &str = "onboarding_completed";

/// `cache_<collection>`
pub fn snapshot_key(collection: Collection) -> String {
    format!("cache_{}", collection)
}

/// `offline_<collection>_queue`
pub fn queue_key(collection: Collection) -> String {
    format!("offline_{}_queue", collection)
}

/// `offline_<collection>_dead_letter`
pub fn dead_letter_key(collection: Collection) -> String {
    format!("offline_{}_dead_letter", collection)
}

fn setting_key(id: &str) -> String {
    format!("settings_{}", id)
}

/// Normalized geocoding cache key.
fn address_key(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Snapshot, queue and session storage for one device.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn KeyValueStore>,
    /// Serializes read-modify-write cycles on the queue and dead-letter entries.
    queue_lock: Arc<Mutex<()>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            queue_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store errors propagate; a corrupt entry is logged and read as absent.
    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Corrupt cache entry {}, treating as empty: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.load_json(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to read cache entry {}, treating as empty: {}", key, e);
                None
            }
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw).await
    }

    // ==================== SNAPSHOTS ====================

    /// Last good snapshot of a collection, empty when none was ever stored.
    pub async fn read_snapshot<T: DeserializeOwned>(&self, collection: Collection) -> Vec<T> {
        self.read_json(&snapshot_key(collection))
            .await
            .unwrap_or_default()
    }

    pub async fn write_snapshot<T: Serialize>(
        &self,
        collection: Collection,
        rows: &[T],
    ) -> Result<(), CacheError> {
        self.write_json(&snapshot_key(collection), rows).await
    }

    pub async fn read_stats(&self) -> Option<DemandStats> {
        self.read_json(&snapshot_key(Collection::DemandStats)).await
    }

    pub async fn write_stats(&self, stats: &DemandStats) -> Result<(), CacheError> {
        self.write_json(&snapshot_key(Collection::DemandStats), stats)
            .await
    }

    pub async fn read_setting(&self, id: &str) -> Option<Value> {
        self.read_json(&setting_key(id)).await
    }

    pub async fn write_setting(&self, id: &str, value: &Value) -> Result<(), CacheError> {
        self.write_json(&setting_key(id), value).await
    }

    // ==================== WRITE QUEUE ====================

    /// Queued demands, oldest first.
    pub async fn read_queue(&self) -> Vec<Demand> {
        self.read_json(&queue_key(Collection::Demands))
            .await
            .unwrap_or_default()
    }

    /// Queued demands, failing when the store cannot be read.
    pub async fn load_queue(&self) -> Result<Vec<Demand>, CacheError> {
        Ok(self
            .load_json(&queue_key(Collection::Demands))
            .await?
            .unwrap_or_default())
    }

    /// Append demands to the queue, skipping ids that are already queued.
    /// Returns the queue length after the write.
    pub async fn append_to_queue(&self, demands: &[Demand]) -> Result<usize, CacheError> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;
        for demand in demands {
            if !queue.iter().any(|q| q.id == demand.id) {
                queue.push(demand.clone());
            }
        }
        self.write_json(&queue_key(Collection::Demands), &queue)
            .await?;
        Ok(queue.len())
    }

    /// Drop the given ids from the queue, keeping anything appended meanwhile.
    /// The key is removed once the queue is empty. Returns the remaining length.
    pub async fn remove_from_queue(&self, ids: &HashSet<String>) -> Result<usize, CacheError> {
        let _guard = self.queue_lock.lock().await;
        let mut queue = self.load_queue().await?;
        queue.retain(|d| !ids.contains(&d.id));

        if queue.is_empty() {
            self.store.remove(&queue_key(Collection::Demands)).await?;
        } else {
            self.write_json(&queue_key(Collection::Demands), &queue)
                .await?;
        }
        Ok(queue.len())
    }

    // ==================== DEAD LETTERS ====================

    pub async fn read_dead_letters(&self) -> Vec<DeadLetter> {
        self.read_json(&dead_letter_key(Collection::Demands))
            .await
            .unwrap_or_default()
    }

    pub async fn load_dead_letters(&self) -> Result<Vec<DeadLetter>, CacheError> {
        Ok(self
            .load_json(&dead_letter_key(Collection::Demands))
            .await?
            .unwrap_or_default())
    }

    /// Record failed writes. A newer failure for the same id replaces the older one.
    pub async fn append_dead_letters(&self, letters: &[DeadLetter]) -> Result<(), CacheError> {
        let _guard = self.queue_lock.lock().await;
        let mut existing = self.load_dead_letters().await?;
        for letter in letters {
            existing.retain(|l| l.demand.id != letter.demand.id);
            existing.push(letter.clone());
        }
        self.write_json(&dead_letter_key(Collection::Demands), &existing)
            .await
    }

    /// Move every dead letter back onto the write queue. Returns how many moved.
    pub async fn requeue_dead_letters(&self) -> Result<usize, CacheError> {
        let _guard = self.queue_lock.lock().await;
        let letters = self.load_dead_letters().await?;
        if letters.is_empty() {
            return Ok(0);
        }

        let mut queue = self.load_queue().await?;
        for letter in &letters {
            if !queue.iter().any(|q| q.id == letter.demand.id) {
                queue.push(letter.demand.clone());
            }
        }
        self.write_json(&queue_key(Collection::Demands), &queue)
            .await?;
        self.store
            .remove(&dead_letter_key(Collection::Demands))
            .await?;
        Ok(letters.len())
    }

    /// Drop one dead letter after operator acknowledgment.
    pub async fn discard_dead_letter(&self, id: &str) -> Result<bool, CacheError> {
        let _guard = self.queue_lock.lock().await;
        let mut letters = self.load_dead_letters().await?;
        let before = letters.len();
        letters.retain(|l| l.demand.id != id);
        if letters.len() == before {
            return Ok(false);
        }

        if letters.is_empty() {
            self.store
                .remove(&dead_letter_key(Collection::Demands))
                .await?;
        } else {
            self.write_json(&dead_letter_key(Collection::Demands), &letters)
                .await?;
        }
        Ok(true)
    }

    // ==================== SESSION VALUES ====================

    pub async fn cached_coordinates(&self, address: &str) -> Option<GeoPoint> {
        let coordinates: HashMap<String, GeoPoint> = self.read_json(MAP_COORDINATES_KEY).await?;
        coordinates.get(&address_key(address)).copied()
    }

    pub async fn remember_coordinates(
        &self,
        address: &str,
        point: GeoPoint,
    ) -> Result<(), CacheError> {
        let mut coordinates: HashMap<String, GeoPoint> = self
            .read_json(MAP_COORDINATES_KEY)
            .await
            .unwrap_or_default();
        coordinates.insert(address_key(address), point);
        self.write_json(MAP_COORDINATES_KEY, &coordinates).await
    }

    pub async fn session_user(&self) -> Option<User> {
        self.read_json(SESSION_USER_KEY).await
    }

    pub async fn set_session_user(&self, user: &User) -> Result<(), CacheError> {
        self.write_json(SESSION_USER_KEY, user).await
    }

    pub async fn clear_session_user(&self) -> Result<(), CacheError> {
        self.store.remove(SESSION_USER_KEY).await
    }

    pub async fn onboarding_completed(&self) -> bool {
        self.read_json(ONBOARDING_COMPLETED_KEY)
            .await
            .unwrap_or(false)
    }

    pub async fn mark_onboarding_completed(&self) -> Result<(), CacheError> {
        self.write_json(ONBOARDING_COMPLETED_KEY, &true).await
    }
}
