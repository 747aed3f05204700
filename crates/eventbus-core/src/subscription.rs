//! Subscription records and their persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;
use crate::event::Event;
use crate::stream::{StreamPattern, matches_any, validate_event_type};

/// Event type entry that matches every type.
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// How a subscriber receives events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// The hub calls the subscriber's webhook.
    Push,
    /// The subscriber fetches and acknowledges.
    Pull,
}

impl DeliveryMode {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }

    /// Parses the storage form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` for unknown values.
    pub fn parse(s: &str) -> Result<Self, BusError> {
        match s {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            other => Err(BusError::Infrastructure(format!(
                "unknown delivery mode {other:?}"
            ))),
        }
    }
}

/// Delivery health of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Receiving events normally.
    Active,
    /// Push retries exhausted; delivery is parked until resumed.
    Degraded,
}

impl SubscriptionStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
        }
    }

    /// Parses the storage form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` for unknown values.
    pub fn parse(s: &str) -> Result<Self, BusError> {
        match s {
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            other => Err(BusError::Infrastructure(format!(
                "unknown subscription status {other:?}"
            ))),
        }
    }
}

/// A consumer's registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionRequest {
    /// Stable subscriber identity across restarts.
    pub subscriber_name: String,
    /// Event types of interest; `"*"` matches all.
    pub event_types: Vec<String>,
    /// Stream globs; empty means all streams.
    #[serde(default)]
    pub stream_patterns: Vec<StreamPattern>,
    /// Push or pull.
    pub delivery_mode: DeliveryMode,
    /// Callback URL, required for push.
    #[serde(default)]
    pub webhook_target: Option<String>,
    /// Deliver history from the first event instead of only new events.
    #[serde(default)]
    pub from_beginning: bool,
}

/// A registered subscription and its delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Identifier assigned at registration.
    pub subscription_id: Uuid,
    /// Stable subscriber identity.
    pub subscriber_name: String,
    /// Event types of interest.
    pub event_types: Vec<String>,
    /// Stream globs; empty means all streams.
    pub stream_patterns: Vec<StreamPattern>,
    /// Push or pull.
    pub delivery_mode: DeliveryMode,
    /// Callback URL for push.
    pub webhook_target: Option<String>,
    /// Last event delivered (push) or acknowledged (pull).
    pub last_delivered_event_id: Option<Uuid>,
    /// Global position of `last_delivered_event_id`, or of the last event
    /// skipped past; `0` before any delivery.
    pub last_delivered_position: i64,
    /// Delivery health.
    pub status: SubscriptionStatus,
    /// Why the subscription was degraded.
    pub degraded_reason: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Validates a request and builds a fresh subscription starting at
    /// `start_position`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidSubscription` if the subscriber name or
    /// event type set is empty, or if push mode lacks an http(s) webhook.
    pub fn from_request(
        request: SubscriptionRequest,
        start_position: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, BusError> {
        if request.subscriber_name.trim().is_empty() {
            return Err(BusError::InvalidSubscription(
                "subscriber_name must not be empty".into(),
            ));
        }
        if request.event_types.is_empty() {
            return Err(BusError::InvalidSubscription(
                "event_types must not be empty".into(),
            ));
        }
        if let Some(bad) = request
            .event_types
            .iter()
            .find(|t| t.as_str() != WILDCARD_EVENT_TYPE && validate_event_type(t).is_err())
        {
            return Err(BusError::InvalidSubscription(format!(
                "invalid event type {bad:?}"
            )));
        }

        let webhook_target = match (request.delivery_mode, request.webhook_target) {
            (DeliveryMode::Push, None) => {
                return Err(BusError::InvalidSubscription(
                    "push subscriptions require a webhook_target".into(),
                ));
            }
            (DeliveryMode::Push, Some(target)) => {
                if !(target.starts_with("http://") || target.starts_with("https://")) {
                    return Err(BusError::InvalidSubscription(format!(
                        "webhook_target must be an http(s) URL, got {target:?}"
                    )));
                }
                Some(target)
            }
            (DeliveryMode::Pull, target) => target,
        };

        let mut event_types = request.event_types;
        event_types.sort();
        event_types.dedup();

        Ok(Self {
            subscription_id: Uuid::new_v4(),
            subscriber_name: request.subscriber_name,
            event_types,
            stream_patterns: request.stream_patterns,
            delivery_mode: request.delivery_mode,
            webhook_target,
            last_delivered_event_id: None,
            last_delivered_position: start_position,
            status: SubscriptionStatus::Active,
            degraded_reason: None,
            created_at: now,
        })
    }

    /// Returns `true` if every event type is accepted.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.event_types.iter().any(|t| t == WILDCARD_EVENT_TYPE)
    }

    /// Event types to push down into store reads; empty when wildcarded.
    #[must_use]
    pub fn type_filter(&self) -> Vec<String> {
        if self.is_wildcard() {
            Vec::new()
        } else {
            self.event_types.clone()
        }
    }

    /// Returns `true` if the subscription wants `event`.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        (self.is_wildcard() || self.event_types.contains(&event.event_type))
            && matches_any(&self.stream_patterns, event.stream_name.as_str())
    }
}

/// Durable storage for subscription records and cursors.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Inserts or replaces a subscription.
    async fn save(&self, subscription: &Subscription) -> Result<(), BusError>;

    /// Removes a subscription; unknown ids are ignored.
    async fn delete(&self, subscription_id: Uuid) -> Result<(), BusError>;

    /// Loads every stored subscription.
    async fn load_all(&self) -> Result<Vec<Subscription>, BusError>;
}
