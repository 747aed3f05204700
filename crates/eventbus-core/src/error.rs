//! Bus error taxonomy.
//!
//! `BusError` is returned synchronously to callers of store and
//! administrative operations. Delivery failures and projection handler
//! failures have their own types and never surface here.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for synchronous bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Optimistic concurrency conflict on append.
    #[error(
        "concurrency conflict on stream {stream_name}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_name: String,
        /// The version the caller expected.
        expected: i64,
        /// The version the store holds.
        actual: i64,
    },

    /// The payload does not conform to the schema registered for its type.
    #[error("schema validation failed for {event_type}: {reason}")]
    SchemaValidation {
        /// The offending event type.
        event_type: String,
        /// What did not match.
        reason: String,
    },

    /// The stream name does not match `[a-zA-Z0-9_-]+`.
    #[error("invalid stream name: {0:?}")]
    InvalidStreamName(String),

    /// A malformed subscription request.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// No subscription exists with the given id.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    /// No projection is registered under the given name.
    #[error("projection not found: {0}")]
    ProjectionNotFound(String),

    /// A projection with the same name is already registered.
    #[error("projection already registered: {0}")]
    ProjectionAlreadyRegistered(String),

    /// A rebuild is already running for the projection.
    #[error("rebuild already in progress for projection {0}")]
    RebuildInProgress(String),

    /// No replay exists with the given id.
    #[error("replay not found: {0}")]
    ReplayNotFound(Uuid),

    /// A generic request validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl BusError {
    /// Shorthand for a schema validation failure.
    pub fn schema(event_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaValidation {
            event_type: event_type.into(),
            reason: reason.into(),
        }
    }
}
