//! Projection checkpoints and their persistence seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;

/// Lifecycle status of a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionStatus {
    /// Advancing with new events.
    Running,
    /// Halted by an operator.
    Stopped,
    /// Resetting and replaying history.
    Rebuilding,
    /// Halted by a handler failure; needs operator intervention.
    Error,
}

impl ProjectionStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Rebuilding => "rebuilding",
            Self::Error => "error",
        }
    }

    /// Parses the storage form.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` for unknown values.
    pub fn parse(s: &str) -> Result<Self, BusError> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "rebuilding" => Ok(Self::Rebuilding),
            "error" => Ok(Self::Error),
            other => Err(BusError::Infrastructure(format!(
                "unknown projection status {other:?}"
            ))),
        }
    }
}

/// Durable progress of a projection, saved together with its state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionCheckpoint {
    /// Projection name.
    pub projection_name: String,
    /// Last applied event.
    pub last_processed_event_id: Option<Uuid>,
    /// Global position of the last event the projection moved past.
    pub last_processed_position: i64,
    /// Count of events applied.
    pub events_processed: u64,
    /// Status when the checkpoint was written.
    pub status: ProjectionStatus,
    /// Failure description for `Error`.
    pub error: Option<String>,
    /// Serialized read-model state.
    pub state: serde_json::Value,
}

impl ProjectionCheckpoint {
    /// A checkpoint at the beginning of history.
    #[must_use]
    pub fn empty(projection_name: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            projection_name: projection_name.into(),
            last_processed_event_id: None,
            last_processed_position: 0,
            events_processed: 0,
            status: ProjectionStatus::Running,
            error: None,
            state,
        }
    }
}

/// Durable storage for projection checkpoints.
///
/// `save` must write state and cursor in one atomic step.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Loads the checkpoint of a projection, if any.
    async fn load(&self, projection_name: &str) -> Result<Option<ProjectionCheckpoint>, BusError>;

    /// Inserts or replaces a checkpoint.
    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<(), BusError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_form() {
        for status in [
            ProjectionStatus::Running,
            ProjectionStatus::Stopped,
            ProjectionStatus::Rebuilding,
            ProjectionStatus::Error,
        ] {
            assert_eq!(ProjectionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ProjectionStatus::parse("paused").is_err());
    }
}
