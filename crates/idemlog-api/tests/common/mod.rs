//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use idemlog_api::state::AppState;
use idemlog_core::clock::Clock;
use idemlog_pipeline::{Consumer, ConsumerConfig, IntakeQueue};
use idemlog_store::SqliteDedupStore;
use idemlog_test_support::FixedClock;
use tempfile::TempDir;
use tower::ServiceExt;

/// Fixed timestamp used across all integration tests.
fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// A running application backed by a real `SQLite` file in a temp directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    /// Build the app with the default test queue capacity. The consumer is
    /// left idle so tests control when events are applied.
    pub async fn new() -> Self {
        Self::with_queue_capacity(100).await
    }

    /// Build the app with a specific intake queue capacity.
    pub async fn with_queue_capacity(capacity: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SqliteDedupStore::open(dir.path().join("dedup_store.db"))
                .await
                .unwrap(),
        );
        let queue = Arc::new(IntakeQueue::new(capacity).unwrap());
        let consumer = Arc::new(Consumer::new(
            Arc::clone(&queue),
            store.clone(),
            ConsumerConfig {
                batch_size: 10,
                poll_interval: Duration::from_millis(5),
                ..ConsumerConfig::default()
            },
        ));
        let state = AppState::new(store, queue, consumer, fixed_clock());

        Self {
            router: idemlog_api::router(state.clone()),
            state,
            _dir: dir,
        }
    }

    /// Start the background consumer.
    pub async fn start_consumer(&self) {
        self.state.consumer.start().await;
    }

    /// Apply everything queued so far: start the consumer if needed, then
    /// stop it, which waits for a full drain.
    pub async fn drain(&self) {
        self.state.consumer.start().await;
        self.state.consumer.stop().await;
    }
}

/// Build a JSON event body with sensible defaults.
pub fn event_json(topic: &str, event_id: &str) -> serde_json::Value {
    serde_json::json!({
        "topic": topic,
        "event_id": event_id,
        "timestamp": "2026-01-15T10:00:00Z",
        "source": "api-test",
        "payload": {"n": 1}
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a DELETE request and return the response.
pub async fn delete_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
