//! `PostgreSQL` implementation of the `EventStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use eventbus_core::clock::{Clock, non_decreasing};
use eventbus_core::error::BusError;
use eventbus_core::event::{Event, EventMetadata, NewEvent};
use eventbus_core::store::{EventStore, MAX_READ_LIMIT, ReadAllQuery};
use eventbus_core::stream::StreamName;

use crate::schema::GLOBAL_ORDER_LOCK_KEY;

const EVENT_COLUMNS: &str = "position, event_id, stream_name, event_type, payload, metadata, \
                             sequence_number, recorded_at";

/// Maps a `sqlx` error to `BusError::Infrastructure`.
pub(crate) fn infra(err: sqlx::Error) -> BusError {
    BusError::Infrastructure(format!("database error: {err}"))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit.min(MAX_READ_LIMIT)).unwrap_or(i64::MAX)
}

fn event_from_row(row: &PgRow) -> Result<Event, BusError> {
    let stream_name: String = row.try_get("stream_name").map_err(infra)?;
    let Json(metadata): Json<EventMetadata> = row.try_get("metadata").map_err(infra)?;
    Ok(Event {
        event_id: row.try_get("event_id").map_err(infra)?,
        stream_name: StreamName::new(stream_name)
            .map_err(|e| BusError::Infrastructure(format!("corrupt stream name: {e}")))?,
        event_type: row.try_get("event_type").map_err(infra)?,
        payload: row.try_get("payload").map_err(infra)?,
        metadata,
        timestamp: row.try_get("recorded_at").map_err(infra)?,
        sequence_number: row.try_get("sequence_number").map_err(infra)?,
        position: row.try_get("position").map_err(infra)?,
    })
}

/// PostgreSQL-backed event store.
///
/// The version check locks the stream's `stream_heads` row, so conflicting
/// appends serialize per stream. The `(stream_name, sequence_number)`
/// unique constraint backs the check up. The final insert runs under a
/// transaction-scoped advisory lock so positions commit in order.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PgEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventStore")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn conflict(&self, stream: &StreamName, expected: i64) -> BusError {
        match self.stream_version(stream).await {
            Ok(actual) => BusError::ConcurrencyConflict {
                stream_name: stream.to_string(),
                expected,
                actual,
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(stream_name = %stream, count = events.len()))]
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<Event>, BusError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(infra)?;

        sqlx::query(
            "INSERT INTO stream_heads (stream_name, version) VALUES ($1, 0) \
             ON CONFLICT (stream_name) DO NOTHING",
        )
        .bind(stream.as_str())
        .execute(&mut *tx)
        .await
        .map_err(infra)?;

        let actual: i64 =
            sqlx::query_scalar("SELECT version FROM stream_heads WHERE stream_name = $1 FOR UPDATE")
                .bind(stream.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(infra)?;

        if actual != expected_version {
            // Dropping the transaction rolls back the placeholder head row.
            return Err(BusError::ConcurrencyConflict {
                stream_name: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(GLOBAL_ORDER_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(infra)?;

        let last: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT recorded_at FROM events ORDER BY position DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await
                .map_err(infra)?;
        let timestamp = non_decreasing(last, self.clock.now());

        let mut appended = Vec::with_capacity(events.len());
        for (offset, new_event) in (1_i64..).zip(events) {
            let event_id = Uuid::now_v7();
            let sequence_number = expected_version + offset;
            let mut metadata = new_event.metadata;
            metadata.replay_id = None;

            let result = sqlx::query_scalar::<_, i64>(
                "INSERT INTO events \
                 (event_id, stream_name, event_type, payload, metadata, sequence_number, recorded_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING position",
            )
            .bind(event_id)
            .bind(stream.as_str())
            .bind(&new_event.event_type)
            .bind(&new_event.payload)
            .bind(Json(&metadata))
            .bind(sequence_number)
            .bind(timestamp)
            .fetch_one(&mut *tx)
            .await;

            let position = match result {
                Ok(position) => position,
                Err(e) if is_unique_violation(&e) => {
                    drop(tx);
                    return Err(self.conflict(stream, expected_version).await);
                }
                Err(e) => return Err(infra(e)),
            };

            appended.push(Event {
                event_id,
                stream_name: stream.clone(),
                event_type: new_event.event_type,
                payload: new_event.payload,
                metadata,
                timestamp,
                sequence_number,
                position,
            });
        }

        let new_version = expected_version + i64::try_from(appended.len()).unwrap_or(i64::MAX);
        sqlx::query("UPDATE stream_heads SET version = $2 WHERE stream_name = $1")
            .bind(stream.as_str())
            .bind(new_version)
            .execute(&mut *tx)
            .await
            .map_err(infra)?;

        match tx.commit().await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(self.conflict(stream, expected_version).await);
            }
            Err(e) => return Err(infra(e)),
        }

        debug!(version = new_version, "appended events");
        Ok(appended)
    }

    async fn read_stream(
        &self,
        stream: &StreamName,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, BusError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE stream_name = $1 AND sequence_number >= $2 \
             ORDER BY sequence_number LIMIT $3"
        ))
        .bind(stream.as_str())
        .bind(from_sequence)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn read_all(&self, query: &ReadAllQuery) -> Result<Vec<Event>, BusError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE position > $1 \
               AND ($2::timestamptz IS NULL OR recorded_at >= $2) \
               AND ($3::timestamptz IS NULL OR recorded_at <= $3) \
               AND (cardinality($4::text[]) = 0 OR event_type = ANY($4)) \
             ORDER BY position LIMIT $5"
        ))
        .bind(query.after_position)
        .bind(query.from_timestamp)
        .bind(query.to_timestamp)
        .bind(&query.event_types)
        .bind(limit_param(query.limit))
        .fetch_all(&self.pool)
        .await
        .map_err(infra)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn read_event(&self, event_id: Uuid) -> Result<Option<Event>, BusError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infra)?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<i64, BusError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM stream_heads WHERE stream_name = $1")
                .bind(stream.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(infra)?;
        Ok(version.unwrap_or(0))
    }

    async fn head_position(&self) -> Result<i64, BusError> {
        let head: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(infra)?;
        Ok(head.unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), BusError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(infra)?;
        Ok(())
    }
}
