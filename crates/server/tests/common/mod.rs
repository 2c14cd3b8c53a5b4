//! Common test utilities for driving the router in-process.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;

use despacho_core::{
    AuthConfig, Config, CredentialVerifier, DatabaseConfig, DirectoryVerifier, LifecycleManager,
    RealtimeConfig, ScheduleConfig, SqliteTicketStore, SqliteUserStore, TicketBroadcaster,
    TicketEvent, TicketStore, UserStore,
};
use despacho_server::{create_router, AppState};

/// Password of the seeded accounts in tests.
pub const SEED_PASSWORD: &str = "admin123";

/// An in-process server on a temporary database with the two seed accounts.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_ticket_creation() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/tickets", json!({
///         "invoiceId": "F-1",
///         "clientName": "Ferreteria Sol",
///         "scheduledAt": "2024-03-01T10:00"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub state: Arc<AppState>,
    pub broadcaster: TicketBroadcaster,
    /// Temporary directory holding the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(TestConfig::default())
    }

    pub fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
            },
            schedule: test_config.schedule,
            auth: test_config.auth,
            realtime: test_config.realtime,
            ..Default::default()
        };

        let users = Arc::new(SqliteUserStore::new(&db_path).expect("Failed to create user store"));
        users
            .seed_defaults(SEED_PASSWORD)
            .expect("Failed to seed users");
        let tickets: Arc<dyn TicketStore> =
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"));

        let verifier: Arc<dyn CredentialVerifier> =
            Arc::new(DirectoryVerifier::new(users.clone(), &config.auth));
        let broadcaster = TicketBroadcaster::new(config.realtime.channel_capacity);
        let lifecycle = Arc::new(LifecycleManager::new(
            tickets,
            users.clone(),
            Arc::new(broadcaster.clone()),
            config.schedule.zone(),
        ));

        let user_store: Arc<dyn UserStore> = users;
        let state = Arc::new(AppState::new(
            config,
            lifecycle,
            user_store,
            verifier,
            broadcaster.clone(),
        ));
        let router = create_router(Arc::clone(&state));

        Self {
            router,
            state,
            broadcaster,
            temp_dir,
        }
    }

    /// Serve the router on an ephemeral local port for socket clients.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Failed to read local address");
        let router = self.router.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        addr
    }

    /// Subscribe to ticket events published from now on.
    pub fn events(&self) -> broadcast::Receiver<TicketEvent> {
        self.broadcaster.subscribe()
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Create a ticket and return its JSON record.
    pub async fn create_ticket(&self, body: Value) -> Value {
        let response = self.post("/api/tickets", body).await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "create failed: {}",
            response.body
        );
        response.body["data"].clone()
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    pub auth: AuthConfig,
    pub schedule: ScheduleConfig,
    pub realtime: RealtimeConfig,
}

impl TestConfig {
    pub fn with_auth(auth: AuthConfig) -> Self {
        Self {
            auth,
            ..Default::default()
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
