//! `PostgreSQL` implementation of the `CheckpointRepository` trait.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use eventbus_core::checkpoint::{CheckpointRepository, ProjectionCheckpoint, ProjectionStatus};
use eventbus_core::error::BusError;

use crate::pg_event_store::infra;

/// PostgreSQL-backed projection checkpoint repository.
///
/// State and cursor share one row, so a single upsert saves both.
#[derive(Debug, Clone)]
pub struct PgCheckpointRepository {
    pool: PgPool,
}

impl PgCheckpointRepository {
    /// Creates a new `PgCheckpointRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for PgCheckpointRepository {
    async fn load(&self, projection_name: &str) -> Result<Option<ProjectionCheckpoint>, BusError> {
        let row = sqlx::query(
            "SELECT projection_name, last_processed_event_id, last_processed_position, \
                    events_processed, status, error, state \
             FROM projection_checkpoints WHERE projection_name = $1",
        )
        .bind(projection_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(infra)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.try_get("status").map_err(infra)?;
        let events_processed: i64 = row.try_get("events_processed").map_err(infra)?;
        Ok(Some(ProjectionCheckpoint {
            projection_name: row.try_get("projection_name").map_err(infra)?,
            last_processed_event_id: row.try_get("last_processed_event_id").map_err(infra)?,
            last_processed_position: row.try_get("last_processed_position").map_err(infra)?,
            events_processed: u64::try_from(events_processed).unwrap_or(0),
            status: ProjectionStatus::parse(&status)?,
            error: row.try_get("error").map_err(infra)?,
            state: row.try_get("state").map_err(infra)?,
        }))
    }

    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<(), BusError> {
        sqlx::query(
            "INSERT INTO projection_checkpoints \
             (projection_name, last_processed_event_id, last_processed_position, \
              events_processed, status, error, state, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) \
             ON CONFLICT (projection_name) DO UPDATE SET \
               last_processed_event_id = EXCLUDED.last_processed_event_id, \
               last_processed_position = EXCLUDED.last_processed_position, \
               events_processed = EXCLUDED.events_processed, \
               status = EXCLUDED.status, \
               error = EXCLUDED.error, \
               state = EXCLUDED.state, \
               updated_at = NOW()",
        )
        .bind(&checkpoint.projection_name)
        .bind(checkpoint.last_processed_event_id)
        .bind(checkpoint.last_processed_position)
        .bind(i64::try_from(checkpoint.events_processed).unwrap_or(i64::MAX))
        .bind(checkpoint.status.as_str())
        .bind(&checkpoint.error)
        .bind(&checkpoint.state)
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(())
    }
}
