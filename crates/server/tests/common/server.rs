//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use custodian_core::FixedClock;
use custodian_core::config::{AppConfig, MetadataConfig};
use custodian_metadata::{MetadataStore, SqliteStore};
use custodian_server::{AppState, create_router};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;
use tower::ServiceExt;

/// Instant every test server starts at.
#[allow(dead_code)]
pub const TEST_NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
    sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("metadata.db");
        let sqlite_store = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );
        let metadata: Arc<dyn MetadataStore> = sqlite_store.clone();

        let mut config = AppConfig {
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let clock = Arc::new(FixedClock::new(TEST_NOW));
        let state = AppState::new(config, metadata).with_clock(clock.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            clock,
            sqlite_store,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Raw pool for assertions and fault injection.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }

    /// Send a request with an optional JSON body and `x-actor-id`.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        actor: Option<&str>,
    ) -> (StatusCode, Value) {
        json_request(&self.router, method, uri, body, actor).await
    }
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    actor: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(actor) = actor {
        builder = builder.header("x-actor-id", actor);
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Application state over an existing store, driven by a fixed clock.
#[allow(dead_code)]
pub fn state_over(metadata: Arc<dyn MetadataStore>) -> (AppState, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(TEST_NOW));
    let state = AppState::new(AppConfig::for_testing(), metadata).with_clock(clock.clone());
    (state, clock)
}
