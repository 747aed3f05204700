//! Runtime schema registration.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventbus_core::event::DEFAULT_SCHEMA_VERSION;
use eventbus_core::schema::JsonObjectSchema;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ApiError;
use crate::state::AppState;

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct RegisterSchemaRequest {
    /// Event type the schema applies to.
    pub event_type: String,
    /// Payload version; defaults to `1`.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Declared payload fields.
    pub schema: JsonObjectSchema,
}

/// A registered `(event_type, schema_version)` pair.
#[derive(Debug, Serialize)]
pub struct SchemaKey {
    /// Event type.
    pub event_type: String,
    /// Payload version.
    pub schema_version: u32,
}

/// Response body for GET /.
#[derive(Debug, Serialize)]
pub struct SchemaList {
    /// Every registered schema, sorted.
    pub schemas: Vec<SchemaKey>,
}

/// POST /
#[instrument(skip(state, request), fields(event_type = %request.event_type))]
async fn register_schema(
    State(state): State<AppState>,
    Json(request): Json<RegisterSchemaRequest>,
) -> Result<(StatusCode, Json<SchemaKey>), ApiError> {
    state.bus.register_schema(
        &request.event_type,
        request.schema_version,
        Arc::new(request.schema),
    )?;
    Ok((
        StatusCode::CREATED,
        Json(SchemaKey {
            event_type: request.event_type,
            schema_version: request.schema_version,
        }),
    ))
}

/// GET /
async fn list_schemas(State(state): State<AppState>) -> Json<SchemaList> {
    let schemas = state
        .bus
        .schemas()
        .into_iter()
        .map(|(event_type, schema_version)| SchemaKey {
            event_type,
            schema_version,
        })
        .collect();
    Json(SchemaList { schemas })
}

/// Returns the schemas router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_schemas).post(register_schema))
}

#[cfg(test)]
mod tests {
    use axum::http::Method;
    use eventbus_core::event::NewEvent;
    use eventbus_core::stream::StreamName;
    use serde_json::json;

    use super::*;
    use crate::routes::test_helpers::{memory_state, send};

    #[tokio::test]
    async fn test_registered_schema_validates_appends() {
        // Arrange
        let state = memory_state().await;
        let body = json!({
            "event_type": "PriceQuoted",
            "schema": {
                "fields": {
                    "symbol": { "kind": "string" },
                    "price_cents": { "kind": "integer" },
                    "venue": { "kind": "string", "required": false }
                }
            }
        });

        // Act
        let (status, json) = send(
            router().with_state(state.clone()),
            Method::POST,
            "/",
            Some(body),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["schema_version"], 1);
        let stream = StreamName::new("quotes-acme").unwrap();
        state
            .bus
            .append(
                &stream,
                0,
                vec![NewEvent::new(
                    "PriceQuoted",
                    json!({ "symbol": "ACME", "price_cents": 1_234 }),
                )],
            )
            .await
            .unwrap();
        let rejected = state
            .bus
            .append(
                &stream,
                1,
                vec![NewEvent::new("PriceQuoted", json!({ "symbol": "ACME" }))],
            )
            .await;
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn test_malformed_event_type_returns_400() {
        let app = router().with_state(memory_state().await);
        let body = json!({ "event_type": "price quoted", "schema": { "fields": {} } });

        let (status, json) = send(app, Method::POST, "/", Some(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_list_includes_catalog_schemas() {
        let app = router().with_state(memory_state().await);

        let (status, json) = send(app, Method::GET, "/", None).await;

        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json["schemas"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["event_type"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"PortfolioCreated"));
        assert!(names.contains(&"TradeExecuted"));
    }
}
