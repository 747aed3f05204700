//! Event Bus HTTP API.
//!
//! Exposes append, read, subscription, projection and replay operations
//! over axum, plus the configuration and telemetry bootstrap used by the
//! `eventbus-api` binary.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router.
#[must_use]
pub fn app(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/streams", routes::streams::router())
        .nest("/api/v1/events", routes::events::router())
        .nest("/api/v1/schemas", routes::schemas::router())
        .nest("/api/v1/subscriptions", routes::subscriptions::router())
        .nest("/api/v1/projections", routes::projections::router())
        .nest("/api/v1/replays", routes::replays::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
