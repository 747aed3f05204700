//! Subscription registration, pull delivery and recovery.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use eventbus_core::event::Event;
use eventbus_core::subscription::{Subscription, SubscriptionRequest};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::DEFAULT_LIMIT;
use crate::state::AppState;

fn default_max_events() -> usize {
    DEFAULT_LIMIT
}

/// Request body for POST /{id}/fetch.
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    /// Upper bound on events returned.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

/// Response body for POST /{id}/fetch.
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    /// Pending replay events first, then live events after the cursor.
    pub events: Vec<Event>,
}

/// Request body for POST /{id}/ack.
#[derive(Debug, Deserialize)]
pub struct AckRequest {
    /// Last event the subscriber has processed.
    pub event_id: Uuid,
    /// `metadata.replay_id` of the event, when it was a replayed copy.
    pub replay_id: Option<Uuid>,
}

/// Response body for GET /.
#[derive(Debug, Serialize)]
pub struct SubscriptionList {
    /// Every subscription, oldest first.
    pub subscriptions: Vec<Subscription>,
}

/// POST /
#[instrument(skip(state, request), fields(subscriber = %request.subscriber_name))]
async fn subscribe(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let subscription = state.bus.hub().subscribe(request).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /
async fn list_subscriptions(State(state): State<AppState>) -> Json<SubscriptionList> {
    Json(SubscriptionList {
        subscriptions: state.bus.hub().list(),
    })
}

/// GET /{id}
async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    Ok(Json(state.bus.hub().get(id)?))
}

/// DELETE /{id}
#[instrument(skip(state))]
async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.bus.hub().unsubscribe(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /{id}/fetch
async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, ApiError> {
    let events = state.bus.hub().fetch(id, request.max_events).await?;
    Ok(Json(FetchResponse { events }))
}

/// POST /{id}/ack
#[instrument(skip(state, request), fields(event_id = %request.event_id))]
async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AckRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let hub = state.bus.hub();
    let sub = match request.replay_id {
        Some(replay_id) => hub.acknowledge_replay(id, replay_id, request.event_id)?,
        None => hub.acknowledge(id, request.event_id).await?,
    };
    Ok(Json(sub))
}

/// POST /{id}/resume
#[instrument(skip(state))]
async fn resume(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, ApiError> {
    Ok(Json(state.bus.hub().resume(id).await?))
}

/// Returns the subscriptions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_subscriptions).post(subscribe))
        .route("/{id}", get(get_subscription).delete(unsubscribe))
        .route("/{id}/fetch", post(fetch))
        .route("/{id}/ack", post(acknowledge))
        .route("/{id}/resume", post(resume))
}
