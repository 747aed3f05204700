//! Event Bus Event Store: storage backends.
//!
//! `PostgreSQL` implementations for durable deployments and embedded
//! in-memory implementations for single-process use and tests.

pub mod memory;
pub mod pg_checkpoint_repository;
pub mod pg_event_store;
pub mod pg_subscription_repository;
pub mod schema;

pub use memory::{InMemoryCheckpointRepository, InMemoryEventStore, InMemorySubscriptionRepository};
pub use pg_checkpoint_repository::PgCheckpointRepository;
pub use pg_event_store::PgEventStore;
pub use pg_subscription_repository::PgSubscriptionRepository;
