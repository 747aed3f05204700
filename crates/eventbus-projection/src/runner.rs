//! Per-projection runner task and its control block.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use eventbus_core::checkpoint::{CheckpointRepository, ProjectionCheckpoint, ProjectionStatus};
use eventbus_core::error::BusError;
use eventbus_core::event::Event;
use eventbus_core::store::{EventStore, ReadAllQuery};

use crate::engine::ProjectionConfig;
use crate::projection::{Projection, ProjectionError};

/// Published progress of a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) status: ProjectionStatus,
    pub(crate) last_processed_event_id: Option<Uuid>,
    pub(crate) last_processed_position: i64,
    pub(crate) events_processed: u64,
    pub(crate) error: Option<String>,
}

impl Progress {
    pub(crate) fn fresh() -> Self {
        Self {
            status: ProjectionStatus::Running,
            last_processed_event_id: None,
            last_processed_position: 0,
            events_processed: 0,
            error: None,
        }
    }

    pub(crate) fn from_checkpoint(checkpoint: &ProjectionCheckpoint) -> Self {
        Self {
            status: checkpoint.status,
            last_processed_event_id: checkpoint.last_processed_event_id,
            last_processed_position: checkpoint.last_processed_position,
            events_processed: checkpoint.events_processed,
            error: checkpoint.error.clone(),
        }
    }
}

/// Shared between the engine (commands) and the runner (progress).
pub(crate) struct Control {
    pub(crate) name: String,
    progress: Mutex<Progress>,
    rebuild_target: Mutex<Option<i64>>,
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl Control {
    pub(crate) fn new(name: String, progress: Progress, rebuild_target: Option<i64>) -> Self {
        Self {
            name,
            progress: Mutex::new(progress),
            rebuild_target: Mutex::new(rebuild_target),
            wake: Notify::new(),
            shutdown: watch::channel(false).0,
        }
    }

    pub(crate) fn progress(&self) -> Progress {
        self.progress.lock().clone()
    }

    pub(crate) fn status(&self) -> ProjectionStatus {
        self.progress.lock().status
    }

    /// Flips to `Rebuilding` and queues a rebuild up to `target`.
    pub(crate) fn request_rebuild(&self, target: i64) -> Result<(), BusError> {
        let mut progress = self.progress.lock();
        let mut pending = self.rebuild_target.lock();
        if progress.status == ProjectionStatus::Rebuilding || pending.is_some() {
            return Err(BusError::RebuildInProgress(self.name.clone()));
        }
        progress.status = ProjectionStatus::Rebuilding;
        progress.error = None;
        *pending = Some(target);
        drop(pending);
        drop(progress);
        self.wake.notify_one();
        Ok(())
    }

    /// Moves to `to` if the current status is one of `from`. Returns the
    /// status after the call.
    pub(crate) fn transition(
        &self,
        from: &[ProjectionStatus],
        to: ProjectionStatus,
    ) -> ProjectionStatus {
        let mut progress = self.progress.lock();
        if from.contains(&progress.status) {
            progress.status = to;
            if to != ProjectionStatus::Error {
                progress.error = None;
            }
            drop(progress);
            self.wake.notify_one();
            return to;
        }
        progress.status
    }

    pub(crate) fn halt(&self) {
        self.shutdown.send_replace(true);
        self.wake.notify_one();
    }

    fn take_rebuild(&self) -> Option<i64> {
        self.rebuild_target.lock().take()
    }

    fn rebuild_pending(&self) -> bool {
        self.rebuild_target.lock().is_some()
    }

    fn reset(&self) {
        let mut progress = self.progress.lock();
        progress.last_processed_event_id = None;
        progress.last_processed_position = 0;
        progress.events_processed = 0;
        progress.error = None;
    }

    fn skip_to(&self, position: i64) {
        let mut progress = self.progress.lock();
        if position > progress.last_processed_position {
            progress.last_processed_position = position;
        }
    }

    fn record_applied(&self, event: &Event) {
        let mut progress = self.progress.lock();
        progress.last_processed_event_id = Some(event.event_id);
        progress.last_processed_position = event.position;
        progress.events_processed += 1;
    }

    fn record_failure(&self, reason: String) {
        let mut progress = self.progress.lock();
        progress.status = ProjectionStatus::Error;
        progress.error = Some(reason);
    }

    fn finish_rebuild(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.status == ProjectionStatus::Rebuilding {
            progress.status = ProjectionStatus::Running;
            true
        } else {
            false
        }
    }
}

enum Pass {
    /// Reached the head (or the rebuild target).
    Done,
    /// A command changed what the runner should be doing.
    Interrupted,
    /// The handler failed; the projection is now in `error`.
    Failed,
    /// Storage was unavailable; try again later.
    Unavailable,
}

pub(crate) struct Runner<P: Projection> {
    pub(crate) projection: P,
    pub(crate) state: Arc<RwLock<P::State>>,
    pub(crate) control: Arc<Control>,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) checkpoints: Arc<dyn CheckpointRepository>,
    pub(crate) head: watch::Receiver<i64>,
    pub(crate) config: ProjectionConfig,
    pub(crate) persisted: Progress,
}

impl<P: Projection> Runner<P> {
    pub(crate) async fn run(mut self) {
        let mut shutdown = self.control.shutdown.subscribe();
        let mut rebuild_until: Option<i64> = None;
        info!(projection = %self.control.name, "projection runner started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.head.mark_unchanged();

            if let Some(target) = self.control.take_rebuild() {
                self.reset(target).await;
                rebuild_until = Some(target);
            }

            let status = self.control.status();
            let outcome = match status {
                ProjectionStatus::Running => {
                    rebuild_until = None;
                    Some(self.catch_up(status, None).await)
                }
                ProjectionStatus::Rebuilding => Some(self.catch_up(status, rebuild_until).await),
                ProjectionStatus::Stopped | ProjectionStatus::Error => None,
            };

            match outcome {
                Some(Pass::Done) if status == ProjectionStatus::Rebuilding => {
                    if self.control.finish_rebuild() {
                        info!(projection = %self.control.name, "rebuild completed");
                    }
                    rebuild_until = None;
                    self.persist_if_changed().await;
                    continue;
                }
                Some(Pass::Interrupted) => continue,
                Some(Pass::Done | Pass::Failed | Pass::Unavailable) | None => {}
            }
            self.persist_if_changed().await;

            let idle = matches!(
                self.control.status(),
                ProjectionStatus::Stopped | ProjectionStatus::Error
            );
            tokio::select! {
                _ = shutdown.changed() => {}
                () = self.control.wake.notified() => {}
                _ = self.head.changed(), if !idle => {}
                () = tokio::time::sleep(self.config.poll_interval), if !idle => {}
            }
        }

        self.persist_if_changed().await;
        info!(projection = %self.control.name, "projection runner stopped");
    }

    /// Clears state and cursor ahead of a rebuild.
    async fn reset(&mut self, target: i64) {
        info!(projection = %self.control.name, target, "rebuild started");
        *self.state.write() = P::State::default();
        self.control.reset();
        self.persist_if_changed().await;
    }

    async fn catch_up(&mut self, expected: ProjectionStatus, limit: Option<i64>) -> Pass {
        loop {
            let after = self.control.progress().last_processed_position;
            if limit.is_some_and(|limit| after >= limit) {
                return Pass::Done;
            }

            let page = match self
                .store
                .read_all(&ReadAllQuery::after(after, self.config.page_size))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(projection = %self.control.name, error = %e, "store read failed");
                    return Pass::Unavailable;
                }
            };
            if page.is_empty() {
                return Pass::Done;
            }

            for event in &page {
                if limit.is_some_and(|limit| event.position > limit) {
                    return Pass::Done;
                }
                if self.control.rebuild_pending() || self.control.status() != expected {
                    return Pass::Interrupted;
                }
                if let Some(pass) = self.process(event).await {
                    return pass;
                }
            }
        }
    }

    /// Applies one event. Returns `Some` when the pass must end.
    async fn process(&mut self, event: &Event) -> Option<Pass> {
        let progress = self.control.progress();
        if event.position <= progress.last_processed_position {
            return None;
        }
        if !self.projection.handles(&event.event_type) {
            self.control.skip_to(event.position);
            return None;
        }

        let current = self.state.read().clone();
        let next = match apply_guarded(&self.projection, current, event) {
            Ok(next) => next,
            Err(e) => {
                self.fail(event, &e).await;
                return Some(Pass::Failed);
            }
        };

        let mut applied = progress;
        applied.last_processed_event_id = Some(event.event_id);
        applied.last_processed_position = event.position;
        applied.events_processed += 1;
        let checkpoint = match checkpoint_of(&self.control.name, &applied, &next) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.fail(event, &e).await;
                return Some(Pass::Failed);
            }
        };
        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            warn!(projection = %self.control.name, error = %e, "checkpoint save failed");
            return Some(Pass::Unavailable);
        }

        *self.state.write() = next;
        self.control.record_applied(event);
        self.persisted = applied;
        debug!(
            projection = %self.control.name,
            event_id = %event.event_id,
            position = event.position,
            "event applied"
        );
        None
    }

    async fn fail(&mut self, event: &Event, err: &ProjectionError) {
        error!(
            projection = %self.control.name,
            event_id = %event.event_id,
            position = event.position,
            error = %err,
            "projection halted"
        );
        self.control.record_failure(format!(
            "event {} at position {}: {err}",
            event.event_id, event.position
        ));
        self.persist_if_changed().await;
    }

    /// Writes a checkpoint if the published progress moved past the last
    /// one written.
    async fn persist_if_changed(&mut self) {
        let progress = self.control.progress();
        if progress == self.persisted {
            return;
        }
        let state = self.state.read().clone();
        let checkpoint = match checkpoint_of(&self.control.name, &progress, &state) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                error!(projection = %self.control.name, error = %e, "cannot serialize state");
                return;
            }
        };
        match self.checkpoints.save(&checkpoint).await {
            Ok(()) => self.persisted = progress,
            Err(e) => warn!(projection = %self.control.name, error = %e, "checkpoint save failed"),
        }
    }
}

fn apply_guarded<P: Projection>(
    projection: &P,
    state: P::State,
    event: &Event,
) -> Result<P::State, ProjectionError> {
    match catch_unwind(AssertUnwindSafe(|| projection.apply(state, event))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(ProjectionError::Panicked(message))
        }
    }
}

fn checkpoint_of<S: serde::Serialize>(
    name: &str,
    progress: &Progress,
    state: &S,
) -> Result<ProjectionCheckpoint, ProjectionError> {
    Ok(ProjectionCheckpoint {
        projection_name: name.to_owned(),
        last_processed_event_id: progress.last_processed_event_id,
        last_processed_position: progress.last_processed_position,
        events_processed: progress.events_processed,
        status: progress.status,
        error: progress.error.clone(),
        state: serde_json::to_value(state).map_err(|e| ProjectionError::State(e.to_string()))?,
    })
}
