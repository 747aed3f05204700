//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::BusError;
use crate::event::{Event, NewEvent};
use crate::stream::StreamName;

/// Upper bound applied to every read limit.
pub const MAX_READ_LIMIT: usize = 10_000;

/// Filter for a store-wide read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadAllQuery {
    /// Exclusive cursor on the global position; `0` reads from the start.
    pub after_position: i64,
    /// Only events stamped at or after this time.
    pub from_timestamp: Option<DateTime<Utc>>,
    /// Only events stamped at or before this time.
    pub to_timestamp: Option<DateTime<Utc>>,
    /// Only these event types; empty means all.
    pub event_types: Vec<String>,
    /// Maximum number of events returned.
    pub limit: usize,
}

impl Default for ReadAllQuery {
    fn default() -> Self {
        Self {
            after_position: 0,
            from_timestamp: None,
            to_timestamp: None,
            event_types: Vec::new(),
            limit: 1000,
        }
    }
}

impl ReadAllQuery {
    /// Query for everything after `position`, `limit` at a time.
    #[must_use]
    pub fn after(position: i64, limit: usize) -> Self {
        Self {
            after_position: position,
            limit,
            ..Self::default()
        }
    }

    /// Returns `true` if `event` passes the timestamp and type filters.
    #[must_use]
    pub fn accepts(&self, event: &Event) -> bool {
        event.position > self.after_position
            && self.from_timestamp.is_none_or(|from| event.timestamp >= from)
            && self.to_timestamp.is_none_or(|to| event.timestamp <= to)
            && (self.event_types.is_empty() || self.event_types.contains(&event.event_type))
    }

    /// The limit capped at `MAX_READ_LIMIT`. Zero reads nothing.
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.min(MAX_READ_LIMIT)
    }
}

/// Durable, ordered, append-only event storage.
///
/// Implementations own event identity and ordering: they assign
/// `event_id`, `sequence_number`, `position` and `timestamp`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to `stream` iff its current version equals
    /// `expected_version`. `0` means the stream must not exist yet. The
    /// batch is written atomically; an empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ConcurrencyConflict` on version mismatch (nothing
    /// is written) or `BusError::Infrastructure` on storage failure.
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<Event>, BusError>;

    /// Reads events of one stream with `sequence_number >= from_sequence`,
    /// ascending. An unknown stream yields an empty vector.
    async fn read_stream(
        &self,
        stream: &StreamName,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, BusError>;

    /// Reads across all streams in global order.
    async fn read_all(&self, query: &ReadAllQuery) -> Result<Vec<Event>, BusError>;

    /// Looks up a single event by id.
    async fn read_event(&self, event_id: Uuid) -> Result<Option<Event>, BusError>;

    /// Current version (highest sequence number) of a stream; `0` if empty.
    async fn stream_version(&self, stream: &StreamName) -> Result<i64, BusError>;

    /// Highest global position assigned so far; `0` if the store is empty.
    async fn head_position(&self) -> Result<i64, BusError>;

    /// Cheap liveness check against the backing storage.
    async fn ping(&self) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;
    use chrono::TimeZone;

    fn event_at(position: i64, event_type: &str, ts: DateTime<Utc>) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            stream_name: StreamName::new("s-1").unwrap(),
            event_type: event_type.to_owned(),
            payload: serde_json::json!({}),
            metadata: EventMetadata::default(),
            timestamp: ts,
            sequence_number: position,
            position,
        }
    }

    #[test]
    fn test_query_accepts_filters_by_position_time_and_type() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let query = ReadAllQuery {
            after_position: 1,
            from_timestamp: Some(t0),
            to_timestamp: Some(t0 + chrono::Duration::minutes(5)),
            event_types: vec!["OrderCreated".to_owned()],
            limit: 10,
        };

        assert!(!query.accepts(&event_at(1, "OrderCreated", t0)));
        assert!(query.accepts(&event_at(2, "OrderCreated", t0)));
        assert!(!query.accepts(&event_at(3, "PortfolioCreated", t0)));
        assert!(!query.accepts(&event_at(
            4,
            "OrderCreated",
            t0 - chrono::Duration::seconds(1)
        )));
        assert!(!query.accepts(&event_at(
            5,
            "OrderCreated",
            t0 + chrono::Duration::minutes(6)
        )));
    }

    #[test]
    fn test_effective_limit_is_capped_and_keeps_zero() {
        assert_eq!(ReadAllQuery::after(0, 0).effective_limit(), 0);
        assert_eq!(
            ReadAllQuery::after(0, usize::MAX).effective_limit(),
            MAX_READ_LIMIT
        );
    }
}
