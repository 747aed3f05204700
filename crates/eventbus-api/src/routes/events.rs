//! Store-wide reads in global order.

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use eventbus_core::event::Event;
use eventbus_core::store::{MAX_READ_LIMIT, ReadAllQuery};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::DEFAULT_LIMIT;
use crate::state::AppState;

/// Query parameters for GET /.
#[derive(Debug, Default, Deserialize)]
pub struct ReadAllParams {
    /// Exclusive cursor; pass the previous `next_position` to page.
    #[serde(default)]
    pub after_position: i64,
    /// Only events stamped at or after this time.
    pub from_timestamp: Option<DateTime<Utc>>,
    /// Only events stamped at or before this time.
    pub to_timestamp: Option<DateTime<Utc>>,
    /// Comma-separated event types.
    pub event_type: Option<String>,
    /// Maximum events returned.
    pub limit: Option<usize>,
}

impl ReadAllParams {
    fn to_query(&self) -> ReadAllQuery {
        ReadAllQuery {
            after_position: self.after_position.max(0),
            from_timestamp: self.from_timestamp,
            to_timestamp: self.to_timestamp,
            event_types: self
                .event_type
                .as_deref()
                .map(|types| {
                    types
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            limit: self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_READ_LIMIT),
        }
    }
}

/// A page of events.
#[derive(Debug, Serialize)]
pub struct EventPage {
    /// Events in global order.
    pub events: Vec<Event>,
    /// Cursor for the next page.
    pub next_position: i64,
}

/// GET /
async fn read_all(
    State(state): State<AppState>,
    Query(params): Query<ReadAllParams>,
) -> Result<Json<EventPage>, ApiError> {
    let query = params.to_query();
    let events = state.bus.read_all(&query).await?;
    let next_position = events.last().map_or(query.after_position, |e| e.position);
    Ok(Json(EventPage {
        events,
        next_position,
    }))
}

/// GET /{event_id}
async fn read_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    state
        .bus
        .read_event(event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("event {event_id} not found")))
}

/// Returns the events router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(read_all))
        .route("/{event_id}", get(read_event))
}
