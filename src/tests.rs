//! Integration tests for the data store and the sync client talking to it.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::cache::{MemoryKeyValueStore, SnapshotCache};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::db::{init_database, Repository};
use crate::models::{Collection, DataSource, MatchKey, NewDemand, RemoteQuery};
use crate::remote::{HttpRemoteClient, RemoteDataClient};
use crate::search::SearchIndex;
use crate::sync::SyncManager;
use crate::{create_router, AppState};

const API_KEY: &str = "test-api-key";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    state: AppState,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some(API_KEY.to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
        };

        let state = AppState {
            repo,
            search,
            config: Arc::new(config),
        };
        let app = create_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            state,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn remote(&self) -> HttpRemoteClient {
        HttpRemoteClient::new(
            self.base_url.clone(),
            Some(API_KEY.to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    async fn post(&self, collection: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/api/collections/{}", collection)))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

fn demand_json(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": "",
        "status": "pending",
        "priority": "medium",
        "createdAt": "2026-03-01T12:00:00Z"
    })
}

/// An address nothing listens on.
async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = Client::new().get(fixture.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_rejects_missing_and_wrong_key() {
    let fixture = TestFixture::new().await;
    let url = fixture.url("/api/collections/demands");

    let resp = Client::new().get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let resp = Client::new()
        .get(&url)
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = Client::new()
        .get(&url)
        .bearer_auth(API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_no_psk_means_open_api() {
    let fixture = TestFixture::with_psk(None).await;
    let resp = Client::new()
        .get(fixture.url("/api/datastore/revision"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_collection_crud() {
    let fixture = TestFixture::new().await;

    let resp = fixture.post("demands", demand_json("r1", "Pothole")).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["id"], "r1");

    fixture.post("demands", demand_json("r2", "Broken light")).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/collections/demands?order=title&select=id,title"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["data"],
        json!([{"id": "r2", "title": "Broken light"}, {"id": "r1", "title": "Pothole"}])
    );

    let resp = fixture
        .client
        .patch(fixture.url("/api/collections/demands?id=r1"))
        .json(&json!({"status": "in_progress"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"][0]["status"], "in_progress");

    let resp = fixture
        .client
        .get(fixture.url("/api/collections/demands?status=in_progress"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = fixture
        .client
        .delete(fixture.url("/api/collections/demands?id=r2"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["deleted"], 1);
}

#[tokio::test]
async fn test_duplicate_insert_returns_conflict() {
    let fixture = TestFixture::new().await;
    fixture.post("demands", demand_json("r1", "Pothole")).await;

    let resp = fixture.post("demands", demand_json("r1", "Pothole")).await;
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_stats_projection() {
    let fixture = TestFixture::new().await;
    fixture.post("demands", demand_json("r1", "Pothole")).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/collections/demand_stats?limit=1"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"][0]["total"], 1);
    assert_eq!(body["data"][0]["mediumPriority"], 1);

    let resp = fixture.post("demand_stats", json!({"total": 99})).await;
    assert_eq!(resp.status(), 405);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "READ_ONLY");
}

#[tokio::test]
async fn test_bad_requests() {
    let fixture = TestFixture::new().await;

    let resp = fixture.post("tasks", json!({"id": "x"})).await;
    assert_eq!(resp.status(), 404);

    let resp = fixture.post("demands", json!({"id": "x", "title": ""})).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .client
        .get(fixture.url("/api/collections/demands?limit=many"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .client
        .delete(fixture.url("/api/collections/demands"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_revision_increments_on_writes() {
    let fixture = TestFixture::new().await;

    let revision = |body: Value| body["data"]["revisionId"].as_i64().unwrap();
    let get_revision = || async {
        let resp = fixture
            .client
            .get(fixture.url("/api/datastore/revision"))
            .send()
            .await
            .unwrap();
        resp.json::<Value>().await.unwrap()
    };

    let before = revision(get_revision().await);
    fixture.post("contacts", json!({"name": "Maria"})).await;
    let after = revision(get_revision().await);
    assert_eq!(after, before + 1);

    // A rejected write leaves the revision alone.
    fixture.post("contacts", json!({"name": ""})).await;
    assert_eq!(revision(get_revision().await), after);
}

#[tokio::test]
async fn test_search_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.post("demands", demand_json("r1", "Pothole on Rua A")).await;
    fixture.post("demands", demand_json("r2", "Street light out")).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=pothole"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["results"][0]["demand"]["id"], "r1");

    fixture
        .client
        .delete(fixture.url("/api/collections/demands?id=r1"))
        .send()
        .await
        .unwrap();
    let resp = fixture
        .client
        .get(fixture.url("/api/search?q=pothole"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_router_oneshot() {
    let fixture = TestFixture::new().await;
    let app = create_router(fixture.state.clone());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/datastore/revision")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_http_remote_client_round_trip() {
    let fixture = TestFixture::new().await;
    let remote = fixture.remote();

    remote.ping().await.unwrap();

    let stored = remote
        .insert(Collection::Demands, demand_json("r1", "Pothole"))
        .await
        .unwrap();
    assert_eq!(stored["id"], "r1");

    let err = remote
        .insert(Collection::Demands, demand_json("r1", "Pothole"))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let err = remote
        .insert(Collection::Demands, json!({"id": "bad", "title": ""}))
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert!(!err.is_conflict());

    let rows = remote
        .select(Collection::Demands, &RemoteQuery::all().eq("id", "r1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let updated = remote
        .update(
            Collection::Demands,
            json!({"status": "completed"}),
            &MatchKey::id("r1"),
        )
        .await
        .unwrap();
    assert_eq!(updated[0]["status"], "completed");

    remote
        .upsert(
            Collection::Settings,
            json!({"id": "dashboard_config", "value": {"widgets": ["map"]}}),
        )
        .await
        .unwrap();

    let deleted = remote
        .delete(Collection::Demands, &MatchKey::id("r1"))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_http_remote_client_unreachable() {
    let remote = HttpRemoteClient::new(dead_url().await, None, Duration::from_secs(2)).unwrap();

    let err = remote.ping().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_offline_writes_reach_server_on_reconnect() {
    let fixture = TestFixture::new().await;
    let store = Arc::new(MemoryKeyValueStore::new());
    let manager = SyncManager::new(
        Arc::new(fixture.remote()),
        SnapshotCache::new(store),
        Connectivity::new(false),
    );

    let entry = manager
        .create_demand(NewDemand {
            title: "Pothole".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(entry.is_pending());
    assert!(fixture
        .state
        .repo
        .get_document(Collection::Demands, entry.id())
        .await
        .unwrap()
        .is_none());

    let report = manager.on_online().await;
    assert_eq!(report.succeeded, vec![entry.id().to_string()]);

    let stored = fixture
        .state
        .repo
        .get_document(Collection::Demands, entry.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["title"], "Pothole");

    let dataset = manager.snapshot().await;
    assert_eq!(dataset.source, DataSource::Remote);
    assert_eq!(dataset.records.len(), 1);
    assert!(!dataset.records[0].is_pending());
    assert_eq!(dataset.stats.map(|s| s.total), Some(1));
}

#[tokio::test]
async fn test_cached_snapshot_served_when_server_unreachable() {
    let fixture = TestFixture::new().await;
    fixture.post("demands", demand_json("r_old", "Old demand")).await;
    let store = Arc::new(MemoryKeyValueStore::new());

    let online = SyncManager::new(
        Arc::new(fixture.remote()),
        SnapshotCache::new(store.clone()),
        Connectivity::new(true),
    );
    assert_eq!(online.fetch_all().await.source, DataSource::Remote);

    let unreachable =
        HttpRemoteClient::new(dead_url().await, None, Duration::from_secs(2)).unwrap();
    let stranded = SyncManager::new(
        Arc::new(unreachable),
        SnapshotCache::new(store),
        Connectivity::new(true),
    );

    let dataset = stranded.fetch_all().await;
    assert_eq!(dataset.source, DataSource::Cache);
    assert_eq!(dataset.records.len(), 1);
    assert_eq!(dataset.records[0].id(), "r_old");
}
