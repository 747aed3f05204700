//! Health check endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventbus_core::checkpoint::ProjectionStatus;
use eventbus_core::subscription::SubscriptionStatus;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Seconds since the process started serving.
    pub uptime_seconds: u64,
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// Whether the event store answered a ping.
    pub store: &'static str,
    /// Push subscriptions parked after exhausting retries.
    pub degraded_subscriptions: usize,
    /// Projections halted by a handler failure.
    pub errored_projections: usize,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// GET /health/live
async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /health/ready
async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let degraded_subscriptions = state
        .bus
        .hub()
        .list()
        .iter()
        .filter(|sub| sub.status == SubscriptionStatus::Degraded)
        .count();

    if let Err(e) = state.bus.store().ping().await {
        warn!(error = %e, "readiness check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "unavailable",
                store: "unreachable",
                degraded_subscriptions,
                errored_projections: 0,
            }),
        );
    }

    let errored_projections = match state.projections.list().await {
        Ok(reports) => reports
            .iter()
            .filter(|r| r.status == ProjectionStatus::Error)
            .count(),
        Err(e) => {
            warn!(error = %e, "projection status unavailable");
            0
        }
    };

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            store: "ok",
            degraded_subscriptions,
            errored_projections,
        }),
    )
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use axum::http::Method;
    use eventbus_core::clock::SystemClock;
    use eventbus_core::schema::SchemaRegistry;
    use eventbus_event_store::{InMemoryCheckpointRepository, InMemorySubscriptionRepository};
    use eventbus_hub::{DistributionHub, EventBus, HubConfig};
    use eventbus_projection::{ProjectionConfig, ProjectionEngine};
    use eventbus_replay::{ReplayConfig, ReplayEngine};
    use eventbus_test_support::{FailingEventStore, MockRng, RecordingSinkFactory};

    use super::*;
    use crate::routes::test_helpers::{memory_state, send};

    fn unreachable_store_state() -> AppState {
        let hub = DistributionHub::new(
            Arc::new(FailingEventStore),
            Arc::new(InMemorySubscriptionRepository::new()),
            Arc::new(RecordingSinkFactory::new()),
            Arc::new(SystemClock),
            Box::new(MockRng),
            HubConfig::default(),
        );
        let bus = Arc::new(EventBus::new(hub.clone(), SchemaRegistry::new()));
        let projections = Arc::new(ProjectionEngine::new(
            Arc::clone(bus.store()),
            Arc::new(InMemoryCheckpointRepository::new()),
            hub.watch_head(),
            ProjectionConfig::default(),
        ));
        AppState {
            bus,
            projections,
            replays: ReplayEngine::new(hub, Arc::new(SystemClock), ReplayConfig::default()),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_health_returns_200_with_service_and_version() {
        // Arrange
        let app = router().with_state(memory_state().await);

        // Act
        let (status, json) = send(app, Method::GET, "/health", None).await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["service"], "eventbus-api");
        assert!(json["version"].is_string());
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn test_liveness_returns_200() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(app, Method::GET, "/health/live", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_readiness_reports_ready_with_counts() {
        // Arrange
        let app = router().with_state(memory_state().await);

        // Act
        let (status, json) = send(app, Method::GET, "/health/ready", None).await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ready");
        assert_eq!(json["store"], "ok");
        assert_eq!(json["degraded_subscriptions"], 0);
        assert_eq!(json["errored_projections"], 0);
    }

    #[tokio::test]
    async fn test_readiness_returns_503_when_store_is_down() {
        // Arrange
        let app = router().with_state(unreachable_store_state());

        // Act
        let (status, json) = send(app, Method::GET, "/health/ready", None).await;

        // Assert
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["store"], "unreachable");
    }
}
