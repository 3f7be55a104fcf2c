//! Sync manager state machine and operations.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::{FailedWrite, SyncError, SyncReport};
use crate::cache::{CacheError, SnapshotCache, SqliteKeyValueStore};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::models::{
    Collection, Contact, DataSource, Dataset, DeadLetter, Demand, DemandStats, DemandStatus,
    Interaction, MatchKey, NewDemand, RecordEntry, RemoteQuery, User, DASHBOARD_CONFIG_ID,
    ROLE_PERMISSIONS_ID,
};
use crate::query::{self, Page, PageResult, RecordFilter, RecordSort};
use crate::remote::{HttpRemoteClient, RemoteDataClient, RemoteError};

/// Session-level sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    OnlineSynced,
    /// Queue drain or refresh in progress.
    OnlineSyncing,
    Offline,
}

/// Collections as loaded from the remote or the cache, before the queue overlay.
#[derive(Default)]
struct Snapshot {
    demands: Vec<Demand>,
    contacts: Vec<Contact>,
    users: Vec<User>,
    interactions: Vec<Interaction>,
    dashboard_config: Option<Value>,
    role_permissions: Option<Value>,
    stats: Option<DemandStats>,
}

/// Clears the in-flight flag when a drain ends, including on early return.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps a client working offline and reconciles queued writes on reconnect.
///
/// The manager owns the write queue lifecycle. Callers read the merged view
/// through [`SyncManager::fetch_all`] or [`SyncManager::records`] and issue intents.
pub struct SyncManager {
    remote: Arc<dyn RemoteDataClient>,
    cache: SnapshotCache,
    connectivity: Connectivity,
    state: watch::Sender<SyncState>,
    view: RwLock<Dataset>,
    drain_in_flight: AtomicBool,
}

impl SyncManager {
    /// The initial state follows the current connectivity value.
    pub fn new(
        remote: Arc<dyn RemoteDataClient>,
        cache: SnapshotCache,
        connectivity: Connectivity,
    ) -> Self {
        let initial = if connectivity.is_online() {
            SyncState::OnlineSynced
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial);

        Self {
            remote,
            cache,
            connectivity,
            state,
            view: RwLock::new(Dataset::empty(DataSource::Cache)),
            drain_in_flight: AtomicBool::new(false),
        }
    }

    /// Build an HTTP-backed manager with a SQLite cache. Initial connectivity
    /// comes from one health check against the remote.
    pub async fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let remote = Arc::new(HttpRemoteClient::new(
            config.remote_url.clone(),
            config.api_key.clone(),
            config.remote_timeout,
        )?);
        let store = SqliteKeyValueStore::open(&config.cache_path)
            .await
            .map_err(SyncError::Storage)?;

        let online = remote.ping().await.is_ok();
        info!(
            "Sync manager for {} starting {}",
            config.remote_url,
            if online { "online" } else { "offline" }
        );

        Ok(Self::new(
            remote,
            SnapshotCache::new(Arc::new(store)),
            Connectivity::new(online),
        ))
    }

    pub fn remote(&self) -> Arc<dyn RemoteDataClient> {
        self.remote.clone()
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SyncState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Sync state {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    fn settle_state(&self) {
        if self.connectivity.is_online() {
            self.set_state(SyncState::OnlineSynced);
        } else {
            self.set_state(SyncState::Offline);
        }
    }

    // ==================== READS ====================

    /// Load every collection from the remote, falling back to the cached
    /// snapshot when offline or when any remote read fails. Queued writes are
    /// prepended as pending entries. Never fails.
    pub async fn fetch_all(&self) -> Dataset {
        let (snapshot, source) = if self.connectivity.is_online() {
            match self.load_from_remote().await {
                Ok(snapshot) => {
                    if let Err(e) = self.store_snapshot(&snapshot).await {
                        warn!("Failed to refresh offline cache: {}", e);
                    }
                    (snapshot, DataSource::Remote)
                }
                Err(e) => {
                    warn!("Remote fetch failed, serving cached snapshot: {}", e);
                    (self.load_from_cache().await, DataSource::Cache)
                }
            }
        } else {
            debug!("Offline, serving cached snapshot");
            (self.load_from_cache().await, DataSource::Cache)
        };

        // The queue is read under the view lock so a concurrent enqueue either
        // lands in this merge or is prepended after it.
        let mut view = self.view.write().await;
        let queue = self.cache.read_queue().await;
        let dead_letters = self.cache.read_dead_letters().await;
        let dataset = merge(snapshot, queue, dead_letters, source);
        *view = dataset.clone();
        dataset
    }

    /// Manual refresh. Always permitted. When online it passes through
    /// `OnlineSyncing` and drains anything still queued before reloading.
    pub async fn refresh(&self) -> Dataset {
        if self.connectivity.is_online() {
            self.set_state(SyncState::OnlineSyncing);
            let report = self.drain_queue().await;
            if report.attempted > 0 {
                debug!("Refresh drained queue: {}", report.summary());
            }
        }
        let dataset = self.fetch_all().await;
        self.settle_state();
        dataset
    }

    async fn load_from_remote(&self) -> Result<Snapshot, RemoteError> {
        let demands_query = RemoteQuery::all().order_by("createdAt", true);
        let contacts_query = RemoteQuery::all().order_by("name", false);
        let users_query = RemoteQuery::all().order_by("name", false);
        let interactions_query = RemoteQuery::all().order_by("createdAt", true);
        let dashboard_query = RemoteQuery::all().eq("id", DASHBOARD_CONFIG_ID).limit(1);
        let permissions_query = RemoteQuery::all().eq("id", ROLE_PERMISSIONS_ID).limit(1);
        let stats_query = RemoteQuery::all().limit(1);

        let (demands, contacts, users, interactions, dashboard, permissions, stats) = tokio::try_join!(
            self.remote.select(Collection::Demands, &demands_query),
            self.remote.select(Collection::Contacts, &contacts_query),
            self.remote.select(Collection::Users, &users_query),
            self.remote.select(Collection::Interactions, &interactions_query),
            self.remote.select(Collection::Settings, &dashboard_query),
            self.remote.select(Collection::Settings, &permissions_query),
            self.remote.select(Collection::DemandStats, &stats_query),
        )?;

        Ok(Snapshot {
            demands: decode_rows(Collection::Demands, demands),
            contacts: decode_rows(Collection::Contacts, contacts),
            users: decode_rows(Collection::Users, users),
            interactions: decode_rows(Collection::Interactions, interactions),
            dashboard_config: setting_value(dashboard),
            role_permissions: setting_value(permissions),
            stats: stats
                .into_iter()
                .next()
                .and_then(|row| decode_row(Collection::DemandStats, row)),
        })
    }

    async fn load_from_cache(&self) -> Snapshot {
        Snapshot {
            demands: self.cache.read_snapshot(Collection::Demands).await,
            contacts: self.cache.read_snapshot(Collection::Contacts).await,
            users: self.cache.read_snapshot(Collection::Users).await,
            interactions: self.cache.read_snapshot(Collection::Interactions).await,
            dashboard_config: self.cache.read_setting(DASHBOARD_CONFIG_ID).await,
            role_permissions: self.cache.read_setting(ROLE_PERMISSIONS_ID).await,
            stats: self.cache.read_stats().await,
        }
    }

    /// Replace each cached collection with the fresh remote copy.
    async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<(), CacheError> {
        self.cache
            .write_snapshot(Collection::Demands, &snapshot.demands)
            .await?;
        self.cache
            .write_snapshot(Collection::Contacts, &snapshot.contacts)
            .await?;
        self.cache
            .write_snapshot(Collection::Users, &snapshot.users)
            .await?;
        self.cache
            .write_snapshot(Collection::Interactions, &snapshot.interactions)
            .await?;
        if let Some(config) = &snapshot.dashboard_config {
            self.cache.write_setting(DASHBOARD_CONFIG_ID, config).await?;
        }
        if let Some(permissions) = &snapshot.role_permissions {
            self.cache
                .write_setting(ROLE_PERMISSIONS_ID, permissions)
                .await?;
        }
        if let Some(stats) = &snapshot.stats {
            self.cache.write_stats(stats).await?;
        }
        Ok(())
    }

    /// The current merged record list, newest pending first.
    pub async fn records(&self) -> Vec<RecordEntry> {
        self.view.read().await.records.clone()
    }

    /// A copy of the last merged view.
    pub async fn snapshot(&self) -> Dataset {
        self.view.read().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.view
            .read()
            .await
            .records
            .iter()
            .filter(|e| e.is_pending())
            .count()
    }

    /// Filter, sort and paginate the merged record list.
    pub async fn query_records(
        &self,
        filter: &RecordFilter,
        sort: RecordSort,
        page: Page,
    ) -> PageResult {
        let view = self.view.read().await;
        query::apply(&view.records, filter, sort, page)
    }

    pub async fn find_contact_by_phone(&self, phone: &str) -> Option<Contact> {
        self.view
            .read()
            .await
            .contacts
            .iter()
            .find(|c| c.matches_phone(phone))
            .cloned()
    }

    pub async fn find_contacts_by_name(&self, name: &str) -> Vec<Contact> {
        self.view
            .read()
            .await
            .contacts
            .iter()
            .filter(|c| c.matches_name(name))
            .cloned()
            .collect()
    }

    // ==================== WRITES ====================

    /// Persist a demand to the offline queue and surface it at the head of the
    /// in-memory list. Fails only when the local store rejects the write.
    pub async fn enqueue_write(&self, demand: Demand) -> Result<RecordEntry, SyncError> {
        let queued = self
            .cache
            .append_to_queue(std::slice::from_ref(&demand))
            .await
            .map_err(|e| {
                error!("Could not save demand {} offline: {}", demand.id, e);
                SyncError::Storage(e)
            })?;
        info!(
            "Saved demand {} offline, will sync on reconnect ({} queued)",
            demand.id, queued
        );

        let entry = RecordEntry::Pending(demand);
        let mut view = self.view.write().await;
        view.records.retain(|e| e.id() != entry.id());
        view.records.insert(0, entry.clone());
        Ok(entry)
    }

    /// Creation intent: insert remotely when online, queue otherwise.
    ///
    /// A transport failure while online also falls back to the queue; the id is
    /// kept, so a write that did land is recognized on drain.
    pub async fn create_demand(&self, draft: NewDemand) -> Result<RecordEntry, SyncError> {
        if draft.title.trim().is_empty() {
            return Err(SyncError::Validation("Title is required".to_string()));
        }
        let demand = Demand::from_draft(draft);

        if !self.connectivity.is_online() {
            return self.enqueue_write(demand).await;
        }

        let payload = serde_json::to_value(&demand).map_err(RemoteError::from)?;
        match self.remote.insert(Collection::Demands, payload).await {
            Ok(row) => {
                let confirmed = serde_json::from_value(row).unwrap_or(demand);
                info!("Created demand {}", confirmed.id);
                let entry = RecordEntry::Confirmed(confirmed);
                self.view.write().await.records.insert(0, entry.clone());
                Ok(entry)
            }
            Err(e) if e.is_transient() => {
                warn!(
                    "Remote insert of demand {} failed, queueing offline: {}",
                    demand.id, e
                );
                self.enqueue_write(demand).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move a confirmed demand to `status`. Requires a connection.
    pub async fn update_status(&self, id: &str, status: DemandStatus) -> Result<Demand, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        if self
            .view
            .read()
            .await
            .find_record(id)
            .is_some_and(|e| !e.is_confirmed())
        {
            return Err(SyncError::Validation(format!(
                "Demand {} is still waiting to sync",
                id
            )));
        }

        let rows = self
            .remote
            .update(
                Collection::Demands,
                json!({ "status": status }),
                &MatchKey::id(id),
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let updated: Demand = serde_json::from_value(row).map_err(RemoteError::from)?;

        let mut view = self.view.write().await;
        if let Some(entry) = view.records.iter_mut().find(|e| e.id() == id) {
            *entry = RecordEntry::Confirmed(updated.clone());
        }
        info!("Demand {} moved to {}", id, status.as_str());
        Ok(updated)
    }

    /// Move a demand one step along the status pipeline.
    pub async fn advance_status(&self, id: &str) -> Result<Demand, SyncError> {
        let current = self
            .view
            .read()
            .await
            .find_record(id)
            .map(|e| e.demand().status)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        let next = current
            .next()
            .ok_or_else(|| SyncError::Validation(format!("Demand {} is already completed", id)))?;
        self.update_status(id, next).await
    }

    // ==================== QUEUE DRAIN ====================

    /// Attempt every queued write once, oldest first, then refresh from the
    /// remote if anything was attempted.
    ///
    /// Writes the remote rejects are moved to the dead-letter list and listed
    /// in the report. Returns immediately if a drain is already running.
    pub async fn process_offline_queue(&self) -> SyncReport {
        let report = self.drain_queue().await;
        if report.attempted > 0 {
            self.fetch_all().await;
        }
        report
    }

    async fn drain_queue(&self) -> SyncReport {
        if self
            .drain_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Offline queue drain already running");
            return SyncReport::already_running();
        }
        let _guard = DrainGuard(&self.drain_in_flight);

        if !self.connectivity.is_online() {
            debug!("Offline, leaving queue in place");
            return SyncReport::default();
        }

        let queue = match self.cache.load_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                error!("Could not read the offline queue, leaving it in place: {}", e);
                return SyncReport::default();
            }
        };
        if queue.is_empty() {
            return SyncReport::default();
        }

        info!("Draining offline queue: {} item(s)", queue.len());
        let mut report = SyncReport {
            attempted: queue.len(),
            ..SyncReport::default()
        };
        let mut dead_letters = Vec::new();

        for demand in &queue {
            let outcome = match serde_json::to_value(demand) {
                Ok(payload) => self
                    .remote
                    .insert(Collection::Demands, payload)
                    .await
                    .map(|_| ()),
                Err(e) => Err(RemoteError::from(e)),
            };

            match outcome {
                Ok(()) => {
                    info!("Synced queued demand {}", demand.id);
                    report.succeeded.push(demand.id.clone());
                }
                Err(e) if e.is_conflict() => {
                    info!("Queued demand {} already present remotely", demand.id);
                    report.succeeded.push(demand.id.clone());
                }
                Err(e) => {
                    warn!("Failed to sync queued demand {}: {}", demand.id, e);
                    report.failed.push(FailedWrite {
                        id: demand.id.clone(),
                        reason: e.to_string(),
                    });
                    dead_letters.push(DeadLetter::new(demand.clone(), e.to_string()));
                }
            }
        }

        let mut drained: HashSet<String> = queue.iter().map(|d| d.id.clone()).collect();
        if !dead_letters.is_empty() {
            if let Err(e) = self.cache.append_dead_letters(&dead_letters).await {
                error!("Could not record failed writes, leaving them queued: {}", e);
                for letter in &dead_letters {
                    drained.remove(&letter.demand.id);
                }
            }
        }
        if let Err(e) = self.cache.remove_from_queue(&drained).await {
            error!("Could not clear drained writes from the offline queue: {}", e);
        }

        {
            let succeeded: HashSet<&str> = report.succeeded.iter().map(String::as_str).collect();
            let mut view = self.view.write().await;
            for entry in view.records.iter_mut() {
                if !entry.is_pending() {
                    continue;
                }
                if succeeded.contains(entry.id()) {
                    *entry = RecordEntry::Confirmed(entry.demand().clone());
                } else if let Some(letter) =
                    dead_letters.iter().find(|l| l.demand.id == entry.id())
                {
                    *entry = RecordEntry::Failed(letter.clone());
                }
            }
        }

        if report.is_clean() {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
        }
        report
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.cache.read_dead_letters().await
    }

    /// Put every dead letter back on the queue and drain again.
    pub async fn retry_dead_letters(&self) -> Result<SyncReport, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        let moved = self
            .cache
            .requeue_dead_letters()
            .await
            .map_err(SyncError::Storage)?;
        info!("Requeued {} failed write(s) for retry", moved);
        Ok(self.process_offline_queue().await)
    }

    /// Drop a failed write once an operator has acknowledged it.
    pub async fn discard_dead_letter(&self, id: &str) -> Result<bool, SyncError> {
        let removed = self
            .cache
            .discard_dead_letter(id)
            .await
            .map_err(SyncError::Storage)?;
        if removed {
            warn!("Discarded failed write {} after acknowledgment", id);
        }
        Ok(removed)
    }

    // ==================== CONNECTIVITY ====================

    /// Connection restored: drain the queue, then refresh.
    pub async fn on_online(&self) -> SyncReport {
        self.connectivity.set_online(true);
        self.set_state(SyncState::OnlineSyncing);

        let report = self.drain_queue().await;
        self.fetch_all().await;

        self.settle_state();
        report
    }

    /// Connection lost. In-flight requests are left to their timeouts.
    pub fn on_offline(&self) {
        self.connectivity.set_online(false);
        self.set_state(SyncState::Offline);
    }
}

fn decode_row<T: DeserializeOwned>(collection: Collection, row: Value) -> Option<T> {
    match serde_json::from_value(row) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Skipping malformed {} row: {}", collection, e);
            None
        }
    }
}

fn decode_rows<T: DeserializeOwned>(collection: Collection, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| decode_row(collection, row))
        .collect()
}

/// Settings documents carry their payload under `value`.
fn setting_value(rows: Vec<Value>) -> Option<Value> {
    rows.into_iter()
        .next()
        .and_then(|mut row| row.get_mut("value").map(Value::take))
}

/// Queued writes go first, newest at the head, then failed writes, then the
/// snapshot. An id the snapshot already holds is shown as confirmed.
fn merge(
    snapshot: Snapshot,
    queue: Vec<Demand>,
    dead_letters: Vec<DeadLetter>,
    source: DataSource,
) -> Dataset {
    let mut seen: HashSet<String> = snapshot.demands.iter().map(|d| d.id.clone()).collect();
    let mut records: Vec<RecordEntry> = Vec::new();
    for demand in queue.into_iter().rev() {
        if seen.insert(demand.id.clone()) {
            records.push(RecordEntry::Pending(demand));
        }
    }
    for letter in dead_letters.into_iter().rev() {
        if seen.insert(letter.demand.id.clone()) {
            records.push(RecordEntry::Failed(letter));
        }
    }
    records.extend(snapshot.demands.into_iter().map(RecordEntry::Confirmed));

    let mut dataset = Dataset::empty(source);
    dataset.records = records;
    dataset.contacts = snapshot.contacts;
    dataset.users = snapshot.users;
    dataset.interactions = snapshot.interactions;
    dataset.dashboard_config = snapshot.dashboard_config;
    dataset.role_permissions = snapshot.role_permissions;
    dataset.stats = snapshot.stats;
    dataset
}
