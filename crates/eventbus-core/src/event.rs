//! Event envelope types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stream::StreamName;

/// Schema version assumed when a producer does not state one.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

/// Optional metadata attached to every event.
///
/// Correlation and causation ids are advisory: the bus records them but
/// does not order delivery by them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Correlation ID for tracing a request through its effects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// ID of the event that caused this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    /// Originating actor (user, service account).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Version of the payload schema for this event type.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Component that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Set on re-deliveries produced by a replay; never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_id: Option<Uuid>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            correlation_id: None,
            causation_id: None,
            actor: None,
            schema_version: DEFAULT_SCHEMA_VERSION,
            source: None,
            replay_id: None,
        }
    }
}

/// An event proposed for append. The store assigns identity and ordering.
#[derive(Debug, Clone)]
pub struct NewEvent {
    /// Symbolic event type, e.g. `PortfolioCreated`.
    pub event_type: String,
    /// Payload conforming to the registered schema for `event_type`.
    pub payload: serde_json::Value,
    /// Producer-supplied metadata.
    pub metadata: EventMetadata,
}

impl NewEvent {
    /// Creates a proposed event with default metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata: EventMetadata::default(),
        }
    }

    /// Replaces the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An appended, immutable event.
///
/// This is also the envelope delivered to push and pull subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique identifier assigned at append time.
    pub event_id: Uuid,
    /// Stream this event belongs to.
    pub stream_name: StreamName,
    /// Symbolic event type.
    pub event_type: String,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Producer metadata.
    pub metadata: EventMetadata,
    /// Store-assigned time, non-decreasing across the whole store.
    pub timestamp: DateTime<Utc>,
    /// 1-based, gapless position within the stream.
    pub sequence_number: i64,
    /// 1-based position in the store-wide order.
    pub position: i64,
}

impl Event {
    /// Returns `true` if this copy was produced by a replay.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.metadata.replay_id.is_some()
    }
}

/// Summary of a successful append, one per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendResult {
    /// Identifier assigned to the event.
    pub event_id: Uuid,
    /// Sequence number assigned within the stream.
    pub sequence_number: i64,
    /// Global position assigned in the store.
    pub position: i64,
}

impl From<&Event> for AppendResult {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.event_id,
            sequence_number: event.sequence_number,
            position: event.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults_schema_version_when_absent() {
        let meta: EventMetadata = serde_json::from_str(r#"{"actor":"trader-7"}"#).unwrap();
        assert_eq!(meta.schema_version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(meta.actor.as_deref(), Some("trader-7"));
        assert!(meta.replay_id.is_none());
    }

    #[test]
    fn test_envelope_serializes_all_fields() {
        let event = Event {
            event_id: Uuid::new_v4(),
            stream_name: StreamName::new("portfolio-1").unwrap(),
            event_type: "PortfolioCreated".to_owned(),
            payload: serde_json::json!({"name": "Core"}),
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
            sequence_number: 1,
            position: 7,
        };

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["stream_name"], "portfolio-1");
        assert_eq!(json["event_type"], "PortfolioCreated");
        assert_eq!(json["sequence_number"], 1);
        assert_eq!(json["position"], 7);
        assert_eq!(json["metadata"]["schema_version"], 1);
        assert!(json["metadata"].get("replay_id").is_none());
        assert!(!event.is_replay());
    }
}
