//! Event bus database schema.
//!
//! The same statements ship as a migration under `migrations/`; this copy
//! lets embedded deployments and tools create the schema directly.

/// SQL to create the events table and the per-stream version heads.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    position        BIGSERIAL PRIMARY KEY,
    event_id        UUID NOT NULL UNIQUE,
    stream_name     VARCHAR(255) NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    payload         JSONB NOT NULL,
    metadata        JSONB NOT NULL,
    sequence_number BIGINT NOT NULL,
    recorded_at     TIMESTAMPTZ NOT NULL,
    UNIQUE (stream_name, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_events_event_type_position
    ON events (event_type, position);

CREATE INDEX IF NOT EXISTS idx_events_recorded_at
    ON events (recorded_at);

CREATE TABLE IF NOT EXISTS stream_heads (
    stream_name VARCHAR(255) PRIMARY KEY,
    version     BIGINT NOT NULL
);
";

/// SQL to create the subscriptions table.
pub const CREATE_SUBSCRIPTIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id         UUID PRIMARY KEY,
    subscriber_name         VARCHAR(255) NOT NULL,
    event_types             TEXT[] NOT NULL,
    stream_patterns         TEXT[] NOT NULL,
    delivery_mode           VARCHAR(8) NOT NULL,
    webhook_target          TEXT,
    last_delivered_event_id UUID,
    last_delivered_position BIGINT NOT NULL DEFAULT 0,
    status                  VARCHAR(16) NOT NULL,
    degraded_reason         TEXT,
    created_at              TIMESTAMPTZ NOT NULL
);
";

/// SQL to create the projection checkpoints table.
pub const CREATE_PROJECTION_CHECKPOINTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS projection_checkpoints (
    projection_name         VARCHAR(255) PRIMARY KEY,
    last_processed_event_id UUID,
    last_processed_position BIGINT NOT NULL DEFAULT 0,
    events_processed        BIGINT NOT NULL DEFAULT 0,
    status                  VARCHAR(16) NOT NULL,
    error                   TEXT,
    state                   JSONB NOT NULL,
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
";

/// Advisory lock key serializing the final insert step so global positions
/// become visible in commit order.
pub const GLOBAL_ORDER_LOCK_KEY: i64 = 0x6576_656e_7462_7573;

/// Creates every table and index if missing.
///
/// # Errors
///
/// Returns the underlying `sqlx::Error` if a statement fails.
pub async fn create_schema(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    for statement in [
        CREATE_EVENTS_TABLE,
        CREATE_SUBSCRIPTIONS_TABLE,
        CREATE_PROJECTION_CHECKPOINTS_TABLE,
    ] {
        sqlx::raw_sql(statement).execute(pool).await?;
    }
    Ok(())
}
