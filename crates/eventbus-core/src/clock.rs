//! Time source for stores, engines and the hub.

use chrono::{DateTime, Utc};

/// Wall-clock time, injected so timestamps are reproducible in tests.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Reads `Utc::now()`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns `now`, or `last` if the clock stepped backwards.
///
/// Stores use this to keep assigned timestamps non-decreasing.
#[must_use]
pub fn non_decreasing(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(last) if last > now => last,
        _ => now,
    }
}
