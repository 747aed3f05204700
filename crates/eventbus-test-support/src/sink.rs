//! Test sinks: an in-process `SinkFactory` that records pushed events.
//!
//! Sinks are keyed by the subscription's webhook target, so a test can make
//! one consumer fail while its neighbours succeed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventbus_core::delivery::{DeliveryError, EventSink, SinkFactory};
use eventbus_core::event::Event;
use eventbus_core::subscription::Subscription;

/// How the sink for a target responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBehavior {
    /// Accept every delivery.
    Accept,
    /// Reject the next `n` attempts, then accept.
    FailTimes(u32),
    /// Reject every attempt.
    AlwaysFail,
}

#[derive(Debug, Default)]
struct Book {
    behaviors: HashMap<String, SinkBehavior>,
    delivered: HashMap<String, Vec<Event>>,
    attempts: HashMap<String, u32>,
}

/// A sink factory that records every accepted delivery per target.
#[derive(Debug, Clone, Default)]
pub struct RecordingSinkFactory {
    book: Arc<Mutex<Book>>,
}

impl RecordingSinkFactory {
    /// Creates a factory whose sinks accept everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the behavior for `target`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn set_behavior(&self, target: &str, behavior: SinkBehavior) {
        self.book
            .lock()
            .unwrap()
            .behaviors
            .insert(target.to_owned(), behavior);
    }

    /// Returns a snapshot of the events accepted by `target`, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn delivered(&self, target: &str) -> Vec<Event> {
        self.book
            .lock()
            .unwrap()
            .delivered
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of delivery attempts made against `target`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn attempts(&self, target: &str) -> u32 {
        self.book
            .lock()
            .unwrap()
            .attempts
            .get(target)
            .copied()
            .unwrap_or(0)
    }
}

impl SinkFactory for RecordingSinkFactory {
    fn sink_for(&self, subscription: &Subscription) -> Result<Arc<dyn EventSink>, DeliveryError> {
        let target = subscription
            .webhook_target
            .clone()
            .ok_or_else(|| DeliveryError::Unavailable("no webhook target".into()))?;
        Ok(Arc::new(RecordingSink {
            target,
            book: Arc::clone(&self.book),
        }))
    }
}

struct RecordingSink {
    target: String,
    book: Arc<Mutex<Book>>,
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
        let mut book = self.book.lock().unwrap();
        *book.attempts.entry(self.target.clone()).or_default() += 1;

        let behavior = book
            .behaviors
            .get(&self.target)
            .copied()
            .unwrap_or(SinkBehavior::Accept);
        match behavior {
            SinkBehavior::AlwaysFail => return Err(DeliveryError::Rejected { status: 503 }),
            SinkBehavior::FailTimes(n) if n > 0 => {
                book.behaviors
                    .insert(self.target.clone(), SinkBehavior::FailTimes(n - 1));
                return Err(DeliveryError::Rejected { status: 503 });
            }
            SinkBehavior::FailTimes(_) | SinkBehavior::Accept => {}
        }

        book.delivered
            .entry(self.target.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }
}
