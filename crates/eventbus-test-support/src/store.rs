//! Test event store: an `EventStore` whose backing storage is unreachable.

use async_trait::async_trait;
use eventbus_core::error::BusError;
use eventbus_core::event::{Event, NewEvent};
use eventbus_core::store::{EventStore, ReadAllQuery};
use eventbus_core::stream::StreamName;
use uuid::Uuid;

fn refused() -> BusError {
    BusError::Infrastructure("connection refused".into())
}

/// An event store that fails every call with an infrastructure error.
/// Useful for testing error-handling paths and readiness probes.
#[derive(Debug, Default)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream: &StreamName,
        _expected_version: i64,
        _events: Vec<NewEvent>,
    ) -> Result<Vec<Event>, BusError> {
        Err(refused())
    }

    async fn read_stream(
        &self,
        _stream: &StreamName,
        _from_sequence: i64,
        _limit: usize,
    ) -> Result<Vec<Event>, BusError> {
        Err(refused())
    }

    async fn read_all(&self, _query: &ReadAllQuery) -> Result<Vec<Event>, BusError> {
        Err(refused())
    }

    async fn read_event(&self, _event_id: Uuid) -> Result<Option<Event>, BusError> {
        Err(refused())
    }

    async fn stream_version(&self, _stream: &StreamName) -> Result<i64, BusError> {
        Err(refused())
    }

    async fn head_position(&self) -> Result<i64, BusError> {
        Err(refused())
    }

    async fn ping(&self) -> Result<(), BusError> {
        Err(refused())
    }
}
