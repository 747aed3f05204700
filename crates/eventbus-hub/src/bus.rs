//! Producer-facing facade: validate, append, notify.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

use eventbus_core::error::BusError;
use eventbus_core::event::{Event, NewEvent};
use eventbus_core::schema::{PayloadValidator, SchemaRegistry};
use eventbus_core::store::{EventStore, ReadAllQuery};
use eventbus_core::stream::{StreamName, validate_event_type};

use crate::hub::DistributionHub;

/// Entry point for producers and readers.
///
/// Every append is checked against the schema registry before it reaches
/// the store. Successful appends only bump the hub's head watermark; they
/// never wait for delivery.
pub struct EventBus {
    store: Arc<dyn EventStore>,
    hub: DistributionHub,
    schemas: RwLock<SchemaRegistry>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("hub", &self.hub)
            .field("schemas", &*self.schemas.read())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus over the hub's store.
    #[must_use]
    pub fn new(hub: DistributionHub, schemas: SchemaRegistry) -> Self {
        Self {
            store: Arc::clone(hub.store()),
            hub,
            schemas: RwLock::new(schemas),
        }
    }

    /// Validates and appends `events` to `stream`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` for a malformed event type,
    /// `BusError::SchemaValidation` if a payload does not match its schema,
    /// `BusError::ConcurrencyConflict` on a version mismatch, or
    /// `BusError::Infrastructure` on storage failure. Nothing is written on
    /// any error.
    #[instrument(skip(self, events), fields(stream_name = %stream, count = events.len()))]
    pub async fn append(
        &self,
        stream: &StreamName,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<Event>, BusError> {
        {
            let schemas = self.schemas.read();
            for event in &events {
                validate_event_type(&event.event_type)?;
                schemas.validate(
                    &event.event_type,
                    event.metadata.schema_version,
                    &event.payload,
                )?;
            }
        }

        let appended = self.store.append(stream, expected_version, events).await?;
        if let Some(last) = appended.last() {
            self.hub.notify(last.position);
            info!(
                version = last.sequence_number,
                position = last.position,
                "events appended"
            );
        }
        Ok(appended)
    }

    /// Reads one stream from `from_sequence`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` on storage failure.
    pub async fn read_stream(
        &self,
        stream: &StreamName,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, BusError> {
        self.store.read_stream(stream, from_sequence, limit).await
    }

    /// Reads across all streams in global order.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` on storage failure.
    pub async fn read_all(&self, query: &ReadAllQuery) -> Result<Vec<Event>, BusError> {
        self.store.read_all(query).await
    }

    /// Looks up one event.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` on storage failure.
    pub async fn read_event(&self, event_id: Uuid) -> Result<Option<Event>, BusError> {
        self.store.read_event(event_id).await
    }

    /// Current version of `stream`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` on storage failure.
    pub async fn stream_version(&self, stream: &StreamName) -> Result<i64, BusError> {
        self.store.stream_version(stream).await
    }

    /// Registers or replaces the schema for `(event_type, schema_version)`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` for a malformed event type.
    pub fn register_schema(
        &self,
        event_type: &str,
        schema_version: u32,
        validator: Arc<dyn PayloadValidator>,
    ) -> Result<(), BusError> {
        self.schemas
            .write()
            .register(event_type, schema_version, validator)?;
        info!(event_type, schema_version, "schema registered");
        Ok(())
    }

    /// Registered `(event_type, schema_version)` pairs.
    #[must_use]
    pub fn schemas(&self) -> Vec<(String, u32)> {
        self.schemas.read().registered()
    }

    /// The distribution hub.
    #[must_use]
    pub fn hub(&self) -> &DistributionHub {
        &self.hub
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }
}
