//! Event Bus Core: shared abstractions.
//!
//! This crate defines the event envelope, the error taxonomy, the schema
//! registry and the storage and delivery seams that every other crate
//! depends on. It contains no infrastructure code.

pub mod checkpoint;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod event;
pub mod rng;
pub mod schema;
pub mod store;
pub mod stream;
pub mod subscription;
