//! Event Bus Projections.
//!
//! Projections fold the global event log into named read models. Each one
//! runs in its own task with its own checkpoint, so a failing handler halts
//! only its projection.

pub mod engine;
pub mod projection;
mod runner;

pub use engine::{ProjectionConfig, ProjectionEngine, ProjectionHandle, ProjectionStatusReport};
pub use projection::{Projection, ProjectionError};
