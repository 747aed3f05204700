//! Route modules, one per resource.

pub mod events;
pub mod health;
pub mod projections;
pub mod replays;
pub mod schemas;
pub mod streams;
pub mod subscriptions;

/// Default page size for list endpoints.
pub(crate) const DEFAULT_LIMIT: usize = 100;

#[cfg(test)]
pub(crate) mod test_helpers {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use eventbus_core::clock::SystemClock;
    use eventbus_hub::HubConfig;
    use eventbus_projection::ProjectionConfig;
    use eventbus_test_support::RecordingSinkFactory;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::state::{AppState, Storage};

    /// Fully wired state over in-memory storage.
    pub async fn memory_state() -> AppState {
        AppState::assemble(
            Storage::in_memory(Arc::new(SystemClock)),
            Arc::new(RecordingSinkFactory::new()),
            HubConfig::default(),
            ProjectionConfig::default(),
        )
        .await
        .unwrap()
    }

    /// Sends one request and decodes the JSON body (`Null` when empty).
    pub async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}
