//! Bounded retry with exponential backoff for push delivery.

use std::time::Duration;

use tracing::warn;

use eventbus_core::delivery::{DeliveryError, EventSink};
use eventbus_core::event::Event;

/// Retry budget and pacing for one event delivered to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Fraction of each delay that may be randomly shaved off, `0.0..=1.0`.
    pub jitter: f64,
    /// Timeout applied to every attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), given a uniform sample
    /// in `[0, 1)`.
    #[must_use]
    pub fn delay_for_retry(&self, retry: u32, sample: f64) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let jitter = self.jitter.clamp(0.0, 1.0) * sample.clamp(0.0, 1.0);
        Duration::try_from_secs_f64(capped * (1.0 - jitter)).unwrap_or(self.max_backoff)
    }

    /// Delivers `event` through `sink`, retrying until it succeeds or the
    /// attempt budget runs out. `sample` supplies jitter.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's `DeliveryError` once the budget is spent.
    pub async fn deliver(
        &self,
        sink: &dyn EventSink,
        event: &Event,
        mut sample: impl FnMut() -> f64 + Send,
    ) -> Result<(), DeliveryError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, sink.deliver(event)).await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Timeout),
            };

            let err = match outcome {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.delay_for_retry(attempt, sample());
            warn!(
                event_id = %event.event_id,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "delivery attempt failed; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
