//! Delivery capability for push subscribers.
//!
//! The hub never inspects a subscriber's transport. It asks a
//! [`SinkFactory`] for the [`EventSink`] matching the subscription's
//! configuration and calls `deliver`.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::subscription::Subscription;

/// A failed delivery attempt. Always retryable from the hub's view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The attempt exceeded its timeout.
    #[error("delivery timed out")]
    Timeout,

    /// The consumer answered with a non-success status.
    #[error("consumer rejected delivery with status {status}")]
    Rejected {
        /// HTTP-equivalent status code.
        status: u16,
    },

    /// The consumer could not be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The sink was misconfigured or closed.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Something that can receive a pushed event.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event envelope.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the consumer did not accept the event.
    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError>;
}

/// Builds the sink for a push subscription.
pub trait SinkFactory: Send + Sync {
    /// Returns the sink that delivers to `subscription`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Unavailable` if no sink can be built.
    fn sink_for(&self, subscription: &Subscription) -> Result<Arc<dyn EventSink>, DeliveryError>;
}
