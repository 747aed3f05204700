//! Replay engine: paced re-delivery of stored history through the hub.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use eventbus_core::clock::Clock;
use eventbus_core::error::BusError;
use eventbus_core::store::ReadAllQuery;
use eventbus_core::stream::matches_any;
use eventbus_hub::{DistributionHub, ReplayDispatch};

use crate::request::ReplayRequest;

/// Tuning for the replay engine.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Events read from the store per page.
    pub page_size: usize,
    /// Finished replays kept for status queries.
    pub retained: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            retained: 100,
        }
    }
}

/// Lifecycle of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayState {
    /// Still walking the store.
    Running,
    /// Every matching event was dispatched.
    Completed,
    /// Cancelled by an operator.
    Stopped,
    /// The store could not be read.
    Failed,
}

/// Progress of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayStatus {
    /// Tag carried in `metadata.replay_id` of every replayed event.
    pub replay_id: Uuid,
    /// Lifecycle state.
    pub state: ReplayState,
    /// The request that started it.
    pub request: ReplayRequest,
    /// Events dispatched so far.
    pub events_replayed: u64,
    /// Subscriptions handed an event, summed over all events.
    pub deliveries: u64,
    /// Subscriptions that abandoned this replay because their replay
    /// buffer filled.
    pub overflowed_subscriptions: Vec<Uuid>,
    /// When the replay started.
    pub started_at: DateTime<Utc>,
    /// When it completed, stopped or failed.
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure description for `failed`.
    pub error: Option<String>,
}

struct Run {
    status: Mutex<ReplayStatus>,
    cancel: watch::Sender<bool>,
    /// Set under the status lock once the dispatch loop has exited.
    drained: AtomicBool,
}

impl Run {
    fn snapshot(&self) -> ReplayStatus {
        self.status.lock().clone()
    }

    fn record(&self, dispatch: ReplayDispatch) {
        let mut status = self.status.lock();
        status.events_replayed += 1;
        status.deliveries += dispatch.recipients as u64;
        status.overflowed_subscriptions.extend(dispatch.overflowed);
    }

    /// Stops a running replay and purges its buffered events. Returns
    /// `false` if it had already finished.
    fn stop(&self, hub: &DistributionHub, at: DateTime<Utc>) -> bool {
        let mut status = self.status.lock();
        let stopped = status.state == ReplayState::Running;
        if stopped {
            status.state = ReplayState::Stopped;
            status.finished_at = Some(at);
        }
        hub.cancel_replay(status.replay_id);
        if self.drained.load(Ordering::Acquire) {
            hub.forget_replay(status.replay_id);
        }
        self.cancel.send_replace(true);
        stopped
    }

    /// Marks the dispatch loop as exited and releases the hub's
    /// bookkeeping for this replay.
    fn retire(&self, hub: &DistributionHub) {
        let status = self.status.lock();
        self.drained.store(true, Ordering::Release);
        hub.forget_replay(status.replay_id);
    }

    /// Leaves `running` for `state`. Returns `false` if already finished.
    fn finish(&self, state: ReplayState, at: DateTime<Utc>, error: Option<String>) -> bool {
        let mut status = self.status.lock();
        if status.state != ReplayState::Running {
            return false;
        }
        status.state = state;
        status.finished_at = Some(at);
        status.error = error;
        true
    }
}

struct Inner {
    hub: DistributionHub,
    clock: Arc<dyn Clock>,
    config: ReplayConfig,
    runs: RwLock<HashMap<Uuid, Arc<Run>>>,
}

/// Starts, tracks and cancels replays.
///
/// A replay only reads the store; replayed events reach subscribers through
/// [`DistributionHub::dispatch_replay`] and never move a live cursor.
#[derive(Clone)]
pub struct ReplayEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ReplayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("replays", &self.inner.runs.read().len())
            .finish_non_exhaustive()
    }
}

impl ReplayEngine {
    /// Creates an engine dispatching through `hub`.
    #[must_use]
    pub fn new(hub: DistributionHub, clock: Arc<dyn Clock>, config: ReplayConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                hub,
                clock,
                config,
                runs: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Validates `request` and starts the replay in the background.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` for a malformed request or a target
    /// subscriber with no subscription.
    #[instrument(skip(self, request), fields(target = ?request.target_subscriber))]
    pub fn start(&self, request: ReplayRequest) -> Result<ReplayStatus, BusError> {
        request.validate()?;
        if let Some(target) = request.target_subscriber.as_deref()
            && !self
                .inner
                .hub
                .list()
                .iter()
                .any(|s| s.subscriber_name == target)
        {
            return Err(BusError::Validation(format!(
                "no subscription for target subscriber {target:?}"
            )));
        }

        let replay_id = Uuid::now_v7();
        let status = ReplayStatus {
            replay_id,
            state: ReplayState::Running,
            request,
            events_replayed: 0,
            deliveries: 0,
            overflowed_subscriptions: Vec::new(),
            started_at: self.inner.clock.now(),
            finished_at: None,
            error: None,
        };
        let run = Arc::new(Run {
            status: Mutex::new(status.clone()),
            cancel: watch::channel(false).0,
            drained: AtomicBool::new(false),
        });
        {
            let mut runs = self.inner.runs.write();
            evict_finished(&mut runs, self.inner.config.retained);
            runs.insert(replay_id, Arc::clone(&run));
        }

        info!(%replay_id, "replay started");
        tokio::spawn(drive(Arc::clone(&self.inner), run));
        Ok(status)
    }

    fn run(&self, replay_id: Uuid) -> Result<Arc<Run>, BusError> {
        self.inner
            .runs
            .read()
            .get(&replay_id)
            .cloned()
            .ok_or(BusError::ReplayNotFound(replay_id))
    }

    /// Cancels a replay and drops its undelivered events. Stopping a
    /// finished replay changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ReplayNotFound` for an unknown id.
    #[instrument(skip(self))]
    pub fn stop_replay(&self, replay_id: Uuid) -> Result<ReplayStatus, BusError> {
        let run = self.run(replay_id)?;
        if run.stop(&self.inner.hub, self.inner.clock.now()) {
            info!(%replay_id, "replay stopped");
        }
        Ok(run.snapshot())
    }

    /// Progress of one replay.
    ///
    /// # Errors
    ///
    /// Returns `BusError::ReplayNotFound` for an unknown id.
    pub fn status(&self, replay_id: Uuid) -> Result<ReplayStatus, BusError> {
        Ok(self.run(replay_id)?.snapshot())
    }

    /// Every known replay, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<ReplayStatus> {
        let mut all: Vec<ReplayStatus> = self
            .inner
            .runs
            .read()
            .values()
            .map(|run| run.snapshot())
            .collect();
        all.sort_by_key(|s| (s.started_at, s.replay_id));
        all
    }

    /// Stops every running replay.
    pub fn shutdown(&self) {
        let running: Vec<Uuid> = self
            .list()
            .into_iter()
            .filter(|s| s.state == ReplayState::Running)
            .map(|s| s.replay_id)
            .collect();
        for replay_id in running {
            if let Err(e) = self.stop_replay(replay_id) {
                warn!(%replay_id, error = %e, "could not stop replay");
            }
        }
    }
}

fn evict_finished(runs: &mut HashMap<Uuid, Arc<Run>>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .iter()
        .filter_map(|(id, run)| run.snapshot().finished_at.map(|at| (at, *id)))
        .collect();
    if finished.len() <= retained {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - retained;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
    }
}

async fn drive(inner: Arc<Inner>, run: Arc<Run>) {
    let (replay_id, request) = {
        let status = run.status.lock();
        (status.replay_id, status.request.clone())
    };
    let mut cancel = run.cancel.subscribe();

    let outcome = replay(&inner, &run, replay_id, &request, &mut cancel).await;
    let now = inner.clock.now();
    match outcome {
        Ok(true) => {
            if run.finish(ReplayState::Completed, now, None) {
                let status = run.snapshot();
                info!(
                    %replay_id,
                    events_replayed = status.events_replayed,
                    deliveries = status.deliveries,
                    "replay completed"
                );
            }
        }
        Ok(false) => {}
        Err(e) => {
            warn!(%replay_id, error = %e, "replay failed");
            run.finish(ReplayState::Failed, now, Some(e.to_string()));
        }
    }
    run.retire(&inner.hub);
}

/// Walks the matching history in order. Returns `Ok(false)` if cancelled.
async fn replay(
    inner: &Inner,
    run: &Run,
    replay_id: Uuid,
    request: &ReplayRequest,
    cancel: &mut watch::Receiver<bool>,
) -> Result<bool, BusError> {
    let mut after = 0;
    let mut previous: Option<DateTime<Utc>> = None;

    loop {
        let page = inner
            .hub
            .store()
            .read_all(&ReadAllQuery {
                after_position: after,
                from_timestamp: Some(request.from_timestamp),
                to_timestamp: Some(request.to_timestamp),
                event_types: request.event_types.clone(),
                limit: inner.config.page_size,
            })
            .await?;
        let Some(page_end) = page.last().map(|e| e.position) else {
            return Ok(true);
        };

        for mut event in page {
            if !matches_any(&request.stream_patterns, event.stream_name.as_str()) {
                continue;
            }
            if let Some(previous) = previous {
                let pause = scaled_gap(event.timestamp - previous, request.speed_factor);
                if !pause.is_zero() {
                    tokio::select! {
                        () = tokio::time::sleep(pause) => {}
                        () = async {
                            let _ = cancel.wait_for(|cancelled| *cancelled).await;
                        } => return Ok(false),
                    }
                }
            }
            if *cancel.borrow() {
                return Ok(false);
            }

            previous = Some(event.timestamp);
            event.metadata.replay_id = Some(replay_id);
            let dispatch = inner
                .hub
                .dispatch_replay(&event, request.target_subscriber.as_deref());
            run.record(dispatch);
        }
        after = page_end;
    }
}

/// The original gap between two events divided by `speed_factor`.
fn scaled_gap(gap: chrono::TimeDelta, speed_factor: f64) -> Duration {
    let gap = gap.to_std().unwrap_or_default();
    Duration::try_from_secs_f64(gap.as_secs_f64() / speed_factor).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_gap_divides_by_speed() {
        assert_eq!(
            scaled_gap(chrono::TimeDelta::seconds(10), 4.0),
            Duration::from_millis(2500)
        );
        assert_eq!(
            scaled_gap(chrono::TimeDelta::milliseconds(300), 0.5),
            Duration::from_millis(600)
        );
    }

    #[test]
    fn test_scaled_gap_ignores_negative_gaps() {
        assert_eq!(scaled_gap(chrono::TimeDelta::seconds(-3), 1.0), Duration::ZERO);
    }

    #[test]
    fn test_scaled_gap_saturates_on_tiny_speed() {
        assert_eq!(
            scaled_gap(chrono::TimeDelta::days(365), f64::MIN_POSITIVE),
            Duration::MAX
        );
    }
}
