//! `PostgreSQL` implementation of the `SubscriptionRepository` trait.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use eventbus_core::error::BusError;
use eventbus_core::stream::StreamPattern;
use eventbus_core::subscription::{
    DeliveryMode, Subscription, SubscriptionRepository, SubscriptionStatus,
};

use crate::pg_event_store::infra;

fn subscription_from_row(row: &PgRow) -> Result<Subscription, BusError> {
    let patterns: Vec<String> = row.try_get("stream_patterns").map_err(infra)?;
    let mode: String = row.try_get("delivery_mode").map_err(infra)?;
    let status: String = row.try_get("status").map_err(infra)?;

    Ok(Subscription {
        subscription_id: row.try_get("subscription_id").map_err(infra)?,
        subscriber_name: row.try_get("subscriber_name").map_err(infra)?,
        event_types: row.try_get("event_types").map_err(infra)?,
        stream_patterns: patterns
            .into_iter()
            .map(StreamPattern::new)
            .collect::<Result<_, _>>()
            .map_err(|e| BusError::Infrastructure(format!("corrupt stream pattern: {e}")))?,
        delivery_mode: DeliveryMode::parse(&mode)?,
        webhook_target: row.try_get("webhook_target").map_err(infra)?,
        last_delivered_event_id: row.try_get("last_delivered_event_id").map_err(infra)?,
        last_delivered_position: row.try_get("last_delivered_position").map_err(infra)?,
        status: SubscriptionStatus::parse(&status)?,
        degraded_reason: row.try_get("degraded_reason").map_err(infra)?,
        created_at: row.try_get("created_at").map_err(infra)?,
    })
}

/// PostgreSQL-backed subscription repository.
#[derive(Debug, Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
}

impl PgSubscriptionRepository {
    /// Creates a new `PgSubscriptionRepository`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), BusError> {
        let patterns: Vec<String> = subscription
            .stream_patterns
            .iter()
            .map(|p| p.as_str().to_owned())
            .collect();

        sqlx::query(
            "INSERT INTO subscriptions \
             (subscription_id, subscriber_name, event_types, stream_patterns, delivery_mode, \
              webhook_target, last_delivered_event_id, last_delivered_position, status, \
              degraded_reason, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (subscription_id) DO UPDATE SET \
               last_delivered_event_id = EXCLUDED.last_delivered_event_id, \
               last_delivered_position = EXCLUDED.last_delivered_position, \
               status = EXCLUDED.status, \
               degraded_reason = EXCLUDED.degraded_reason",
        )
        .bind(subscription.subscription_id)
        .bind(&subscription.subscriber_name)
        .bind(&subscription.event_types)
        .bind(&patterns)
        .bind(subscription.delivery_mode.as_str())
        .bind(&subscription.webhook_target)
        .bind(subscription.last_delivered_event_id)
        .bind(subscription.last_delivered_position)
        .bind(subscription.status.as_str())
        .bind(&subscription.degraded_reason)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await
        .map_err(infra)?;
        Ok(())
    }

    async fn delete(&self, subscription_id: Uuid) -> Result<(), BusError> {
        sqlx::query("DELETE FROM subscriptions WHERE subscription_id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await
            .map_err(infra)?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, BusError> {
        let rows = sqlx::query("SELECT * FROM subscriptions ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(infra)?;
        rows.iter().map(subscription_from_row).collect()
    }
}
