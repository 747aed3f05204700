//! Event Bus: API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eventbus_core::error::BusError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The bus could not be assembled.
    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    /// Tracing or OpenTelemetry could not be initialized.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer error that implements `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// A bus operation failed.
    Bus(BusError),
    /// A resource addressed by the URL does not exist.
    NotFound(String),
}

impl From<BusError> for ApiError {
    fn from(err: BusError) -> Self {
        Self::Bus(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Bus(err) => {
                let (status, code) = classify(&err);
                (status, code, err.to_string())
            }
        };

        let body = ErrorBody {
            error: error_code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

fn classify(err: &BusError) -> (StatusCode, &'static str) {
    match err {
        BusError::ConcurrencyConflict { .. } => (StatusCode::CONFLICT, "concurrency_conflict"),
        BusError::RebuildInProgress(_) => (StatusCode::CONFLICT, "rebuild_in_progress"),
        BusError::ProjectionAlreadyRegistered(_) => {
            (StatusCode::CONFLICT, "projection_already_registered")
        }
        BusError::SchemaValidation { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "schema_validation_failed")
        }
        BusError::InvalidStreamName(_) => (StatusCode::BAD_REQUEST, "invalid_stream_name"),
        BusError::InvalidSubscription(_) => (StatusCode::BAD_REQUEST, "invalid_subscription"),
        BusError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        BusError::SubscriptionNotFound(_) => (StatusCode::NOT_FOUND, "subscription_not_found"),
        BusError::ProjectionNotFound(_) => (StatusCode::NOT_FOUND, "projection_not_found"),
        BusError::ReplayNotFound(_) => (StatusCode::NOT_FOUND, "replay_not_found"),
        BusError::Infrastructure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
        }
    }
}
