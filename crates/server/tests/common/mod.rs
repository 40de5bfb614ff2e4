//! Common test utilities for in-process HTTP tests.
//!
//! The fixture builds the router around a status channel the test drives
//! directly, so endpoint behavior can be checked without a running
//! controller.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::watch;
use tower::ServiceExt;

use runloop_core::{
    bookkeeping::MemoryFinalizedRunStore, load_config_from_str, ControllerStatus,
    FinalizedRunStore,
};
use runloop_server::{api::create_router, state::AppState};

const CONFIG: &str = r#"
[controller]
minimum_batch = 4

[probe]
backend = "directory"

[probe.directory]
base_path = "/tmp/ngt"

[source]
backend = "directory"

[source.directory]
"#;

/// Test fixture for the operational endpoints.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Publish controller snapshots seen by the endpoints
    pub status_tx: watch::Sender<ControllerStatus>,
    /// Finalized run memory served by the API
    pub finalized: Arc<MemoryFinalizedRunStore>,
}

/// Response from a test request.
pub struct TestResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Value::Null` if the body is not JSON
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub fn new() -> Self {
        let config = load_config_from_str(CONFIG).expect("Failed to parse test config");
        let (status_tx, status_rx) = watch::channel(ControllerStatus::default());
        let finalized = Arc::new(MemoryFinalizedRunStore::new());

        let state = Arc::new(AppState::new(
            config,
            status_rx,
            Arc::clone(&finalized) as Arc<dyn FinalizedRunStore>,
        ));

        Self {
            router: create_router(state),
            status_tx,
            finalized,
        }
    }

    /// Send a GET request to the test router.
    pub async fn get(&self, path: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

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

        let text = String::from_utf8_lossy(&body_bytes).to_string();
        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body, text }
    }
}
