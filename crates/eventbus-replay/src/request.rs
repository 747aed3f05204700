//! Replay requests and their validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventbus_core::error::BusError;
use eventbus_core::stream::{StreamPattern, validate_event_type};

fn default_speed_factor() -> f64 {
    1.0
}

/// What to replay, to whom, and how fast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Only events stamped at or after this time.
    pub from_timestamp: DateTime<Utc>,
    /// Only events stamped at or before this time.
    pub to_timestamp: DateTime<Utc>,
    /// Stream globs; empty means all streams.
    #[serde(default)]
    pub stream_patterns: Vec<StreamPattern>,
    /// Event types; empty means all types.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Deliver to this subscriber only.
    #[serde(default)]
    pub target_subscriber: Option<String>,
    /// `2.0` replays twice as fast as the events originally occurred.
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f64,
}

impl ReplayRequest {
    /// A full-speed replay of everything in `[from, to]`.
    #[must_use]
    pub fn between(from_timestamp: DateTime<Utc>, to_timestamp: DateTime<Utc>) -> Self {
        Self {
            from_timestamp,
            to_timestamp,
            stream_patterns: Vec::new(),
            event_types: Vec::new(),
            target_subscriber: None,
            speed_factor: default_speed_factor(),
        }
    }

    /// Checks the request before a replay is started.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` for an inverted time window, a speed
    /// factor that is not a positive finite number, a malformed event type
    /// or a blank target subscriber.
    pub fn validate(&self) -> Result<(), BusError> {
        if self.from_timestamp > self.to_timestamp {
            return Err(BusError::Validation(
                "from_timestamp must not be after to_timestamp".into(),
            ));
        }
        if !self.speed_factor.is_finite() || self.speed_factor <= 0.0 {
            return Err(BusError::Validation(format!(
                "speed_factor must be a positive number, got {}",
                self.speed_factor
            )));
        }
        for event_type in &self.event_types {
            validate_event_type(event_type)?;
        }
        if self
            .target_subscriber
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(BusError::Validation(
                "target_subscriber must not be blank".into(),
            ));
        }
        Ok(())
    }
}
