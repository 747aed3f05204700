//! The projection contract.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use eventbus_core::event::Event;

/// Why a projection could not apply an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// The handler rejected the event.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// The state could not be serialized for its checkpoint.
    #[error("state serialization failed: {0}")]
    State(String),
}

impl ProjectionError {
    /// Shorthand for a handler failure.
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler(reason.into())
    }
}

/// A named read model folded from the ordered event log.
///
/// `apply` must be a pure function of its inputs: the engine may call it
/// again for the same event after a crash, and a rebuild feeds it the whole
/// history from [`Default::default`].
pub trait Projection: Send + Sync + 'static {
    /// The read model.
    type State: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Unique projection name; also its checkpoint key.
    fn name(&self) -> &str;

    /// Returns `true` if events of `event_type` affect the state.
    fn handles(&self, event_type: &str) -> bool;

    /// Folds one event into the state.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionError::Handler` if the event cannot be applied.
    /// The projection then halts in `error` status.
    fn apply(&self, state: Self::State, event: &Event) -> Result<Self::State, ProjectionError>;
}
