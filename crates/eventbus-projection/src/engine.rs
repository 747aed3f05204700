//! Projection engine: registration, lifecycle commands and status.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use eventbus_core::checkpoint::{CheckpointRepository, ProjectionStatus};
use eventbus_core::error::BusError;
use eventbus_core::store::EventStore;

use crate::projection::Projection;
use crate::runner::{Control, Progress, Runner};

/// Tuning for projection runners.
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Safety-net wake-up for idle runners.
    pub poll_interval: Duration,
    /// Events read from the store per page.
    pub page_size: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            page_size: 500,
        }
    }
}

/// Point-in-time view of a projection's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectionStatusReport {
    /// Projection name.
    pub projection_name: String,
    /// Lifecycle status.
    pub status: ProjectionStatus,
    /// Last applied event.
    pub last_processed_event_id: Option<Uuid>,
    /// Global position the projection has moved past.
    pub last_processed_position: i64,
    /// Events applied since the last reset.
    pub events_processed: u64,
    /// Store head minus `last_processed_position`.
    pub lag: i64,
    /// Failure description when `status` is `error`.
    pub error: Option<String>,
}

/// Serializes a projection's state without knowing its type.
trait StateView: Send + Sync {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<S: Serialize + Send + Sync> StateView for RwLock<S> {
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(&*self.read())
    }
}

struct Slot {
    control: Arc<Control>,
    state: Arc<dyn StateView>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Typed access to a registered projection's state.
pub struct ProjectionHandle<P: Projection> {
    state: Arc<RwLock<P::State>>,
    control: Arc<Control>,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> Clone for ProjectionHandle<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            control: Arc::clone(&self.control),
            _projection: PhantomData,
        }
    }
}

impl<P: Projection> std::fmt::Debug for ProjectionHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionHandle")
            .field("name", &self.control.name)
            .field("status", &self.control.status())
            .finish_non_exhaustive()
    }
}

impl<P: Projection> ProjectionHandle<P> {
    /// The projection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// A copy of the current state.
    #[must_use]
    pub fn state(&self) -> P::State {
        self.state.read().clone()
    }

    /// Reads the state in place.
    pub fn read<R>(&self, f: impl FnOnce(&P::State) -> R) -> R {
        f(&self.state.read())
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> ProjectionStatus {
        self.control.status()
    }

    /// Events applied since the last reset.
    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.control.progress().events_processed
    }
}

/// Runs registered projections, each in its own task.
///
/// A failing projection halts in `error` status; nothing else is affected.
pub struct ProjectionEngine {
    store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointRepository>,
    head: watch::Receiver<i64>,
    config: ProjectionConfig,
    slots: RwLock<BTreeMap<String, Slot>>,
}

impl std::fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionEngine")
            .field("projections", &self.slots.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ProjectionEngine {
    /// Creates an engine. `head` is the store head watermark runners wake
    /// on.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointRepository>,
        head: watch::Receiver<i64>,
        config: ProjectionConfig,
    ) -> Self {
        Self {
            store,
            checkpoints,
            head,
            config,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers a projection and starts its runner from the stored
    /// checkpoint, if any. A projection that was mid-rebuild restarts the
    /// rebuild.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionAlreadyRegistered` for a duplicate name,
    /// or `BusError::Infrastructure` if the checkpoint cannot be loaded.
    #[instrument(skip(self, projection), fields(projection = projection.name()))]
    pub async fn register<P: Projection>(
        &self,
        projection: P,
    ) -> Result<ProjectionHandle<P>, BusError> {
        let name = projection.name().to_owned();
        if self.slots.read().contains_key(&name) {
            return Err(BusError::ProjectionAlreadyRegistered(name));
        }

        let (state, progress) = match self.checkpoints.load(&name).await? {
            Some(checkpoint) => {
                let state: P::State = serde_json::from_value(checkpoint.state.clone())
                    .map_err(|e| {
                        BusError::Infrastructure(format!(
                            "stored state of projection {name} is unreadable: {e}"
                        ))
                    })?;
                (state, Progress::from_checkpoint(&checkpoint))
            }
            None => (P::State::default(), Progress::fresh()),
        };
        let rebuild_target = if progress.status == ProjectionStatus::Rebuilding {
            Some(self.store.head_position().await?)
        } else {
            None
        };

        let state = Arc::new(RwLock::new(state));
        let control = Arc::new(Control::new(name.clone(), progress.clone(), rebuild_target));
        {
            let mut slots = self.slots.write();
            if slots.contains_key(&name) {
                return Err(BusError::ProjectionAlreadyRegistered(name));
            }
            let runner = Runner {
                projection,
                state: Arc::clone(&state),
                control: Arc::clone(&control),
                store: Arc::clone(&self.store),
                checkpoints: Arc::clone(&self.checkpoints),
                head: self.head.clone(),
                config: self.config.clone(),
                persisted: progress,
            };
            slots.insert(
                name.clone(),
                Slot {
                    control: Arc::clone(&control),
                    state: Arc::clone(&state) as Arc<dyn StateView>,
                    task: Mutex::new(Some(tokio::spawn(runner.run()))),
                },
            );
        }

        info!(status = control.status().as_str(), "projection registered");
        Ok(ProjectionHandle {
            state,
            control,
            _projection: PhantomData,
        })
    }

    fn control(&self, name: &str) -> Result<Arc<Control>, BusError> {
        self.slots
            .read()
            .get(name)
            .map(|slot| Arc::clone(&slot.control))
            .ok_or_else(|| BusError::ProjectionNotFound(name.to_owned()))
    }

    /// Resets a projection and replays history up to the current head,
    /// then resumes live processing. Returns once the rebuild is queued.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound`, `BusError::RebuildInProgress`
    /// if a rebuild is already running, or `BusError::Infrastructure`.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, name: &str) -> Result<ProjectionStatusReport, BusError> {
        let control = self.control(name)?;
        if control.status() == ProjectionStatus::Rebuilding {
            return Err(BusError::RebuildInProgress(name.to_owned()));
        }
        let head = self.store.head_position().await?;
        control.request_rebuild(head)?;
        info!(target_position = head, "rebuild requested");
        Ok(report(&control, head))
    }

    /// Halts a projection without losing its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound` or `BusError::Infrastructure`.
    pub async fn stop(&self, name: &str) -> Result<ProjectionStatusReport, BusError> {
        self.control(name)?.transition(
            &[ProjectionStatus::Running, ProjectionStatus::Rebuilding],
            ProjectionStatus::Stopped,
        );
        self.status(name).await
    }

    /// Restarts a stopped projection from its checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound`, `BusError::Validation` if the
    /// projection is in `error` (use [`Self::resume`]), or
    /// `BusError::Infrastructure`.
    pub async fn start(&self, name: &str) -> Result<ProjectionStatusReport, BusError> {
        let status = self
            .control(name)?
            .transition(&[ProjectionStatus::Stopped], ProjectionStatus::Running);
        if status == ProjectionStatus::Error {
            return Err(BusError::Validation(format!(
                "projection {name} is in error; resume it instead"
            )));
        }
        self.status(name).await
    }

    /// Clears an error and retries from the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound` or `BusError::Infrastructure`.
    pub async fn resume(&self, name: &str) -> Result<ProjectionStatusReport, BusError> {
        self.control(name)?.transition(
            &[ProjectionStatus::Error, ProjectionStatus::Stopped],
            ProjectionStatus::Running,
        );
        self.status(name).await
    }

    /// Current progress of one projection.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound` or `BusError::Infrastructure`.
    pub async fn status(&self, name: &str) -> Result<ProjectionStatusReport, BusError> {
        let control = self.control(name)?;
        let head = self.store.head_position().await?;
        Ok(report(&control, head))
    }

    /// Progress of every projection, by name.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` if the store head is unavailable.
    pub async fn list(&self) -> Result<Vec<ProjectionStatusReport>, BusError> {
        let head = self.store.head_position().await?;
        let controls: Vec<Arc<Control>> = self
            .slots
            .read()
            .values()
            .map(|slot| Arc::clone(&slot.control))
            .collect();
        Ok(controls.iter().map(|c| report(c, head)).collect())
    }

    /// Serialized state of one projection.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ProjectionNotFound` or `BusError::Infrastructure`.
    pub fn state(&self, name: &str) -> Result<serde_json::Value, BusError> {
        let state = self
            .slots
            .read()
            .get(name)
            .map(|slot| Arc::clone(&slot.state))
            .ok_or_else(|| BusError::ProjectionNotFound(name.to_owned()))?;
        state
            .to_json()
            .map_err(|e| BusError::Infrastructure(format!("cannot serialize state: {e}")))
    }

    /// Stops every runner and waits for their final checkpoints.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let slots = self.slots.read();
            slots
                .values()
                .filter_map(|slot| {
                    slot.control.halt();
                    slot.task.lock().take()
                })
                .collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "projection runner ended abnormally");
            }
        }
        info!("projection engine stopped");
    }
}

fn report(control: &Control, head: i64) -> ProjectionStatusReport {
    let progress = control.progress();
    ProjectionStatusReport {
        projection_name: control.name.clone(),
        status: progress.status,
        last_processed_event_id: progress.last_processed_event_id,
        last_processed_position: progress.last_processed_position,
        events_processed: progress.events_processed,
        lag: (head - progress.last_processed_position).max(0),
        error: progress.error,
    }
}
