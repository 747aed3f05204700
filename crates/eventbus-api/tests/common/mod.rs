//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use eventbus_api::state::{AppState, Storage};
use eventbus_core::clock::SystemClock;
use eventbus_hub::{HubConfig, RetryPolicy};
use eventbus_projection::ProjectionConfig;
use eventbus_test_support::RecordingSinkFactory;
use http_body_util::BodyExt;
use tower::ServiceExt;

/// A running app over in-memory storage and a recording webhook sink.
pub struct TestApp {
    pub state: AppState,
    pub sinks: RecordingSinkFactory,
}

impl TestApp {
    /// The full router, as served by `main.rs`.
    pub fn router(&self) -> Router {
        eventbus_api::app(self.state.clone())
    }
}

/// Builds the app with fast polling and a two-attempt retry budget.
pub async fn build_test_app() -> TestApp {
    let sinks = RecordingSinkFactory::new();
    let hub_config = HubConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            ..RetryPolicy::default()
        },
        poll_interval: Duration::from_millis(50),
        ..HubConfig::default()
    };
    let projection_config = ProjectionConfig {
        poll_interval: Duration::from_millis(50),
        ..ProjectionConfig::default()
    };
    let state = AppState::assemble(
        Storage::in_memory(Arc::new(SystemClock)),
        Arc::new(sinks.clone()),
        hub_config,
        projection_config,
    )
    .await
    .unwrap();
    TestApp { state, sinks }
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
pub async fn delete(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}
