//! Event Bus Replay.
//!
//! Re-delivers a window of stored history through the distribution hub,
//! optionally time-scaled, filtered and aimed at a single subscriber. A
//! replay never writes to the store.

pub mod engine;
pub mod request;

pub use engine::{ReplayConfig, ReplayEngine, ReplayState, ReplayStatus};
pub use request::ReplayRequest;
