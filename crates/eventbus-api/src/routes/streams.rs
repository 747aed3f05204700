//! Append to and read individual streams.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventbus_core::error::BusError;
use eventbus_core::event::{AppendResult, Event, EventMetadata, NewEvent};
use eventbus_core::store::MAX_READ_LIMIT;
use eventbus_core::stream::StreamName;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::routes::DEFAULT_LIMIT;
use crate::state::AppState;

/// One event proposed in an append request.
#[derive(Debug, Deserialize)]
pub struct ProposedEvent {
    /// Symbolic event type.
    pub event_type: String,
    /// Payload validated against the registered schema.
    pub payload: serde_json::Value,
    /// Optional producer metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// Request body for POST /{stream}/events.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// Version the caller last observed; `0` for a new stream.
    pub expected_version: i64,
    /// Events to append atomically, in order.
    pub events: Vec<ProposedEvent>,
}

/// Response body for a successful append.
#[derive(Debug, Serialize)]
pub struct AppendResponse {
    /// Stream appended to.
    pub stream_name: StreamName,
    /// Stream version after the append.
    pub version: i64,
    /// Identity and ordering assigned to each event.
    pub results: Vec<AppendResult>,
}

/// Query parameters for GET /{stream}/events.
#[derive(Debug, Default, Deserialize)]
pub struct ReadStreamParams {
    /// First sequence number to return; `0` and `1` both read from the start.
    #[serde(default)]
    pub from_sequence: i64,
    /// Maximum events returned.
    pub limit: Option<usize>,
}

/// Events read from a stream.
#[derive(Debug, Serialize)]
pub struct StreamEventsResponse {
    /// Stream read.
    pub stream_name: StreamName,
    /// Events in sequence order.
    pub events: Vec<Event>,
}

/// Current version of a stream.
#[derive(Debug, Serialize)]
pub struct StreamVersionResponse {
    /// Stream queried.
    pub stream_name: StreamName,
    /// Highest sequence number; `0` for an empty stream.
    pub version: i64,
}

/// POST /{stream}/events
#[instrument(skip(state, request), fields(stream_name = %stream))]
async fn append_events(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    Json(request): Json<AppendRequest>,
) -> Result<(StatusCode, Json<AppendResponse>), ApiError> {
    let stream = StreamName::new(stream)?;
    if request.expected_version < 0 {
        return Err(BusError::Validation("expected_version must not be negative".into()).into());
    }
    if request.events.is_empty() {
        return Err(BusError::Validation("events must not be empty".into()).into());
    }

    let events = request
        .events
        .into_iter()
        .map(|e| NewEvent::new(e.event_type, e.payload).with_metadata(e.metadata))
        .collect();
    let appended = state
        .bus
        .append(&stream, request.expected_version, events)
        .await?;

    let version = appended
        .last()
        .map_or(request.expected_version, |e| e.sequence_number);
    Ok((
        StatusCode::CREATED,
        Json(AppendResponse {
            stream_name: stream,
            version,
            results: appended.iter().map(AppendResult::from).collect(),
        }),
    ))
}

/// GET /{stream}/events
async fn read_stream(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    Query(params): Query<ReadStreamParams>,
) -> Result<Json<StreamEventsResponse>, ApiError> {
    let stream = StreamName::new(stream)?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_READ_LIMIT);
    let events = state
        .bus
        .read_stream(&stream, params.from_sequence, limit)
        .await?;
    Ok(Json(StreamEventsResponse {
        stream_name: stream,
        events,
    }))
}

/// GET /{stream}/version
async fn stream_version(
    State(state): State<AppState>,
    Path(stream): Path<String>,
) -> Result<Json<StreamVersionResponse>, ApiError> {
    let stream = StreamName::new(stream)?;
    let version = state.bus.stream_version(&stream).await?;
    Ok(Json(StreamVersionResponse {
        stream_name: stream,
        version,
    }))
}

/// Returns the streams router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{stream}/events", get(read_stream).post(append_events))
        .route("/{stream}/version", get(stream_version))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::routes::test_helpers::{memory_state, send};

    fn portfolio_created(portfolio_id: Uuid) -> Value {
        json!({
            "event_type": "PortfolioCreated",
            "payload": {
                "portfolio_id": portfolio_id,
                "owner": "ada",
                "base_currency": "USD"
            },
            "metadata": { "actor": "trader-7" }
        })
    }

    fn deposit(portfolio_id: Uuid, amount_cents: i64) -> Value {
        json!({
            "event_type": "CashDeposited",
            "payload": { "portfolio_id": portfolio_id, "amount_cents": amount_cents }
        })
    }

    #[tokio::test]
    async fn test_append_returns_201_with_assigned_sequence_numbers() {
        // Arrange
        let app = router().with_state(memory_state().await);
        let id = Uuid::new_v4();
        let body = json!({
            "expected_version": 0,
            "events": [portfolio_created(id), deposit(id, 1_000)]
        });

        // Act
        let (status, json) = send(app, Method::POST, "/portfolio-1/events", Some(body)).await;

        // Assert
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["stream_name"], "portfolio-1");
        assert_eq!(json["version"], 2);
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["sequence_number"], 1);
        assert_eq!(results[1]["sequence_number"], 2);
        Uuid::parse_str(results[0]["event_id"].as_str().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_stale_expected_version_returns_409() {
        // Arrange
        let app = router().with_state(memory_state().await);
        let id = Uuid::new_v4();
        let first = json!({ "expected_version": 0, "events": [portfolio_created(id)] });
        send(app.clone(), Method::POST, "/portfolio-1/events", Some(first)).await;

        // Act
        let second = json!({ "expected_version": 0, "events": [deposit(id, 5)] });
        let (status, json) = send(app, Method::POST, "/portfolio-1/events", Some(second)).await;

        // Assert
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"], "concurrency_conflict");
    }

    #[tokio::test]
    async fn test_payload_outside_schema_returns_422() {
        let app = router().with_state(memory_state().await);
        let body = json!({
            "expected_version": 0,
            "events": [{
                "event_type": "CashDeposited",
                "payload": { "portfolio_id": Uuid::new_v4(), "amount_cents": 1, "memo": "x" }
            }]
        });

        let (status, json) = send(app, Method::POST, "/portfolio-1/events", Some(body)).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "schema_validation_failed");
    }

    #[tokio::test]
    async fn test_invalid_stream_name_returns_400() {
        let app = router().with_state(memory_state().await);
        let body = json!({ "expected_version": 0, "events": [portfolio_created(Uuid::new_v4())] });

        let (status, json) = send(app, Method::POST, "/bad.stream/events", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_stream_name");
    }

    #[tokio::test]
    async fn test_empty_batch_returns_400() {
        let app = router().with_state(memory_state().await);
        let body = json!({ "expected_version": 0, "events": [] });

        let (status, _) = send(app, Method::POST, "/portfolio-1/events", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_stream_honours_from_sequence_and_limit() {
        // Arrange
        let app = router().with_state(memory_state().await);
        let id = Uuid::new_v4();
        let body = json!({
            "expected_version": 0,
            "events": [portfolio_created(id), deposit(id, 1), deposit(id, 2), deposit(id, 3)]
        });
        send(app.clone(), Method::POST, "/portfolio-1/events", Some(body)).await;

        // Act
        let (status, json) = send(
            app,
            Method::GET,
            "/portfolio-1/events?from_sequence=2&limit=2",
            None,
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        let events = json["events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["sequence_number"], 2);
        assert_eq!(events[1]["payload"]["amount_cents"], 2);
        assert_eq!(events[0]["metadata"]["schema_version"], 1);
    }

    #[tokio::test]
    async fn test_unknown_stream_reads_empty_at_version_zero() {
        let state = memory_state().await;

        let (status, json) =
            send(router().with_state(state.clone()), Method::GET, "/nobody/events", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["events"], json!([]));

        let (status, json) =
            send(router().with_state(state), Method::GET, "/nobody/version", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], 0);
    }
}
