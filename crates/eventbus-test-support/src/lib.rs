//! Shared test mocks and utilities for the event bus.

mod clock;
mod rng;
mod sink;
mod store;
mod wait;

pub use clock::{FixedClock, StepClock};
pub use rng::{MockRng, SequenceRng};
pub use sink::{RecordingSinkFactory, SinkBehavior};
pub use store::FailingEventStore;
pub use wait::eventually;
