//! Replay control.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventbus_replay::{ReplayRequest, ReplayStatus};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Response body for GET /.
#[derive(Debug, Serialize)]
pub struct ReplayList {
    /// Running and retained replays, oldest first.
    pub replays: Vec<ReplayStatus>,
}

/// POST /
#[instrument(skip(state, request), fields(target = ?request.target_subscriber))]
async fn start_replay(
    State(state): State<AppState>,
    Json(request): Json<ReplayRequest>,
) -> Result<(StatusCode, Json<ReplayStatus>), ApiError> {
    let status = state.replays.start(request)?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

/// GET /
async fn list_replays(State(state): State<AppState>) -> Json<ReplayList> {
    Json(ReplayList {
        replays: state.replays.list(),
    })
}

/// GET /{id}
async fn get_replay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayStatus>, ApiError> {
    Ok(Json(state.replays.status(id)?))
}

/// DELETE /{id}
#[instrument(skip(state))]
async fn stop_replay(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayStatus>, ApiError> {
    Ok(Json(state.replays.stop_replay(id)?))
}

/// Returns the replays router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_replays).post(start_replay))
        .route("/{id}", get(get_replay).delete(stop_replay))
}
