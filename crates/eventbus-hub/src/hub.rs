//! Subscription registry and distribution hub.
//!
//! The hub owns every subscription's delivery bookkeeping. Push
//! subscriptions each get a worker task that walks the store from the
//! subscription's durable cursor (see [`crate::worker`]). Pull subscriptions
//! are served on demand by [`DistributionHub::fetch`] and only move their
//! cursor on [`DistributionHub::acknowledge`].
//!
//! Producers never wait on the hub: an append only bumps the head
//! watermark through [`DistributionHub::notify`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use eventbus_core::clock::Clock;
use eventbus_core::delivery::SinkFactory;
use eventbus_core::error::BusError;
use eventbus_core::event::Event;
use eventbus_core::rng::DeterministicRng;
use eventbus_core::store::{EventStore, MAX_READ_LIMIT, ReadAllQuery};
use eventbus_core::subscription::{
    DeliveryMode, Subscription, SubscriptionRepository, SubscriptionRequest, SubscriptionStatus,
};

use crate::retry::RetryPolicy;
use crate::worker;

const ALERT_CAPACITY: usize = 256;

/// Tuning for the distribution hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Retry budget for each pushed event.
    pub retry: RetryPolicy,
    /// Safety-net wake-up for idle push workers.
    pub poll_interval: Duration,
    /// Events read from the store per page.
    pub page_size: usize,
    /// Undelivered replay events held per subscription. A replay that
    /// would exceed it is abandoned for that subscription.
    pub replay_buffer_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(5),
            page_size: 500,
            replay_buffer_capacity: 10_000,
        }
    }
}

/// Operator-visible notifications about subscription health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HubAlert {
    /// A push subscription exhausted its retry budget and was parked.
    SubscriptionDegraded {
        /// The parked subscription.
        subscription_id: Uuid,
        /// Its subscriber.
        subscriber_name: String,
        /// Last delivery failure.
        reason: String,
    },
    /// An operator resumed a degraded subscription.
    SubscriptionResumed {
        /// The resumed subscription.
        subscription_id: Uuid,
        /// Its subscriber.
        subscriber_name: String,
    },
    /// A replay filled a subscription's replay buffer and was abandoned for
    /// that subscription. Its buffered events were dropped.
    ReplayOverflowed {
        /// The subscription that stopped receiving the replay.
        subscription_id: Uuid,
        /// Its subscriber.
        subscriber_name: String,
        /// The abandoned replay.
        replay_id: Uuid,
        /// Buffer capacity that was exceeded.
        capacity: usize,
    },
}

/// Outcome of handing one replayed event to the hub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayDispatch {
    /// Subscriptions that buffered the event.
    pub recipients: usize,
    /// Subscriptions that abandoned the replay on this event.
    pub overflowed: Vec<Uuid>,
}

#[derive(Default)]
struct ReplayBuffer {
    events: VecDeque<Event>,
    /// Replays abandoned by this subscription after the buffer filled.
    overflowed: HashSet<Uuid>,
}

enum Buffering {
    Buffered,
    Refused,
    Overflowed,
}

/// In-memory state of one registered subscription.
pub(crate) struct Entry {
    subscription: Mutex<Subscription>,
    cursor_lock: tokio::sync::Mutex<()>,
    removed: AtomicBool,
    replay: Mutex<ReplayBuffer>,
    pub(crate) wake: Notify,
    pub(crate) stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Entry {
    fn new(subscription: Subscription) -> Arc<Self> {
        Arc::new(Self {
            subscription: Mutex::new(subscription),
            cursor_lock: tokio::sync::Mutex::new(()),
            removed: AtomicBool::new(false),
            replay: Mutex::new(ReplayBuffer::default()),
            wake: Notify::new(),
            stop: watch::channel(false).0,
            worker: Mutex::new(None),
        })
    }

    pub(crate) fn snapshot(&self) -> Subscription {
        self.subscription.lock().clone()
    }

    /// Applies `change` to a copy, persists it, then publishes it.
    ///
    /// Serialized per subscription. `change` returns `false` to skip the
    /// write.
    pub(crate) async fn update(
        &self,
        repository: &dyn SubscriptionRepository,
        change: impl FnOnce(&mut Subscription) -> bool + Send,
    ) -> Result<Subscription, BusError> {
        let _guard = self.cursor_lock.lock().await;
        let mut next = self.snapshot();
        if self.removed.load(Ordering::Acquire) {
            return Err(BusError::SubscriptionNotFound(next.subscription_id));
        }
        if !change(&mut next) {
            return Ok(next);
        }
        repository.save(&next).await?;
        self.subscription.lock().clone_from(&next);
        Ok(next)
    }

    pub(crate) fn pop_replay(&self) -> Option<Event> {
        self.replay.lock().events.pop_front()
    }

    /// Buffers `event` unless its replay was cancelled or already
    /// abandoned here. `cancelled` is checked under the buffer lock, so a
    /// concurrent cancel either sees the event and purges it or is seen.
    fn push_replay(
        &self,
        event: &Event,
        capacity: usize,
        cancelled: impl FnOnce(Option<Uuid>) -> bool,
    ) -> Buffering {
        let replay_id = event.metadata.replay_id;
        let mut buffer = self.replay.lock();
        let abandoned = replay_id.is_some_and(|id| buffer.overflowed.contains(&id));
        if abandoned || cancelled(replay_id) {
            return Buffering::Refused;
        }
        if buffer.events.len() >= capacity {
            if let Some(id) = replay_id {
                buffer.overflowed.insert(id);
                buffer.events.retain(|e| e.metadata.replay_id != Some(id));
            }
            return Buffering::Overflowed;
        }
        buffer.events.push_back(event.clone());
        drop(buffer);
        self.wake.notify_one();
        Buffering::Buffered
    }

    fn peek_replay(&self, max: usize) -> Vec<Event> {
        self.replay.lock().events.iter().take(max).cloned().collect()
    }

    /// Drops buffered events of `replay_id` up to and including the copy
    /// of `event_id`. Everything before it was handed out by an earlier
    /// fetch. Returns `false` if no such copy is buffered.
    fn ack_replay(&self, replay_id: Uuid, event_id: Uuid) -> bool {
        let mut buffer = self.replay.lock();
        let found = buffer
            .events
            .iter()
            .position(|e| e.event_id == event_id && e.metadata.replay_id == Some(replay_id));
        match found {
            Some(index) => {
                buffer.events.drain(..=index);
                true
            }
            None => false,
        }
    }

    fn purge_replay(&self, replay_id: Uuid) {
        self.replay
            .lock()
            .events
            .retain(|e| e.metadata.replay_id != Some(replay_id));
    }

    fn forget_replay(&self, replay_id: Uuid) {
        self.replay.lock().overflowed.remove(&replay_id);
    }

    fn halt(&self) -> Option<JoinHandle<()>> {
        self.stop.send_replace(true);
        self.wake.notify_one();
        self.worker.lock().take()
    }
}

/// Shared state behind a [`DistributionHub`].
pub(crate) struct HubInner {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) repository: Arc<dyn SubscriptionRepository>,
    pub(crate) sinks: Arc<dyn SinkFactory>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn DeterministicRng>>,
    pub(crate) config: HubConfig,
    entries: RwLock<HashMap<Uuid, Arc<Entry>>>,
    pub(crate) head: watch::Sender<i64>,
    alerts: broadcast::Sender<HubAlert>,
    cancelled_replays: Mutex<HashSet<Uuid>>,
}

impl HubInner {
    pub(crate) fn jitter_sample(&self) -> f64 {
        self.rng.lock().next_f64()
    }

    pub(crate) fn is_cancelled(&self, replay_id: Option<Uuid>) -> bool {
        replay_id.is_some_and(|id| self.cancelled_replays.lock().contains(&id))
    }

    /// Moves the cursor forward to `position`; never backwards.
    pub(crate) async fn advance(
        &self,
        entry: &Entry,
        position: i64,
        event_id: Option<Uuid>,
    ) -> Result<Subscription, BusError> {
        entry
            .update(self.repository.as_ref(), |sub| {
                if position <= sub.last_delivered_position {
                    return false;
                }
                sub.last_delivered_position = position;
                if event_id.is_some() {
                    sub.last_delivered_event_id = event_id;
                }
                true
            })
            .await
    }

    pub(crate) async fn degrade(&self, entry: &Entry, reason: String) -> Result<(), BusError> {
        let alert_reason = reason.clone();
        let sub = entry
            .update(self.repository.as_ref(), |sub| {
                sub.status = SubscriptionStatus::Degraded;
                sub.degraded_reason = Some(reason);
                true
            })
            .await?;

        error!(
            subscription_id = %sub.subscription_id,
            subscriber = %sub.subscriber_name,
            reason = %alert_reason,
            "subscription degraded"
        );
        // No receivers is fine.
        let _ = self.alerts.send(HubAlert::SubscriptionDegraded {
            subscription_id: sub.subscription_id,
            subscriber_name: sub.subscriber_name,
            reason: alert_reason,
        });
        Ok(())
    }
}

/// Matches appended events to subscriptions and delivers them.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct DistributionHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for DistributionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionHub")
            .field("subscriptions", &self.inner.entries.read().len())
            .field("head", &*self.inner.head.borrow())
            .finish_non_exhaustive()
    }
}

impl DistributionHub {
    /// Creates a hub with no subscriptions loaded. Call [`Self::init`]
    /// before serving traffic.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        repository: Arc<dyn SubscriptionRepository>,
        sinks: Arc<dyn SinkFactory>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        config: HubConfig,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                repository,
                sinks,
                clock,
                rng: Mutex::new(rng),
                config,
                entries: RwLock::new(HashMap::new()),
                head: watch::channel(0).0,
                alerts: broadcast::channel(ALERT_CAPACITY).0,
                cancelled_replays: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Reads the store head, loads persisted subscriptions and starts a
    /// worker for every push subscription. Returns how many were loaded.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` if the store or repository fails.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<usize, BusError> {
        self.notify(self.inner.store.head_position().await?);

        let subscriptions = self.inner.repository.load_all().await?;
        let mut loaded = 0;
        for sub in subscriptions {
            if self.inner.entries.read().contains_key(&sub.subscription_id) {
                continue;
            }
            self.register(sub);
            loaded += 1;
        }
        info!(loaded, "subscriptions restored");
        Ok(loaded)
    }

    /// Stops every push worker and waits for them to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<Arc<Entry>> = self
            .inner
            .entries
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        let handles: Vec<_> = entries.iter().filter_map(|e| e.halt()).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "push worker ended abnormally");
            }
        }
        info!(count = entries.len(), "distribution hub stopped");
    }

    fn register(&self, sub: Subscription) -> Arc<Entry> {
        let mode = sub.delivery_mode;
        let id = sub.subscription_id;
        let entry = Entry::new(sub);
        if mode == DeliveryMode::Push {
            let handle = tokio::spawn(worker::run(Arc::clone(&self.inner), Arc::clone(&entry)));
            *entry.worker.lock() = Some(handle);
        }
        self.inner.entries.write().insert(id, Arc::clone(&entry));
        entry
    }

    fn entry(&self, subscription_id: Uuid) -> Result<Arc<Entry>, BusError> {
        self.inner
            .entries
            .read()
            .get(&subscription_id)
            .cloned()
            .ok_or(BusError::SubscriptionNotFound(subscription_id))
    }

    fn pull_entry(&self, subscription_id: Uuid) -> Result<Arc<Entry>, BusError> {
        let entry = self.entry(subscription_id)?;
        if entry.snapshot().delivery_mode != DeliveryMode::Pull {
            return Err(BusError::Validation(format!(
                "subscription {subscription_id} uses push delivery"
            )));
        }
        Ok(entry)
    }

    /// Registers a subscription. New subscriptions see only events appended
    /// after this call unless `from_beginning` is set.
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidSubscription` for malformed requests, or
    /// `BusError::Infrastructure` if it cannot be persisted.
    #[instrument(skip(self, request), fields(subscriber = %request.subscriber_name))]
    pub async fn subscribe(&self, request: SubscriptionRequest) -> Result<Subscription, BusError> {
        let start = if request.from_beginning {
            0
        } else {
            self.inner.store.head_position().await?
        };
        let sub = Subscription::from_request(request, start, self.inner.clock.now())?;
        self.inner.repository.save(&sub).await?;
        self.register(sub.clone());

        info!(
            subscription_id = %sub.subscription_id,
            mode = sub.delivery_mode.as_str(),
            event_types = ?sub.event_types,
            "subscription registered"
        );
        Ok(sub)
    }

    /// Removes a subscription. Unknown ids are treated as already removed.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Infrastructure` if the record cannot be deleted.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, subscription_id: Uuid) -> Result<(), BusError> {
        let removed = self.inner.entries.write().remove(&subscription_id);
        if let Some(entry) = removed {
            let _guard = entry.cursor_lock.lock().await;
            entry.removed.store(true, Ordering::Release);
            if let Some(handle) = entry.halt() {
                handle.abort();
            }
            info!("subscription removed");
        }
        self.inner.repository.delete(subscription_id).await
    }

    /// Returns a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns `BusError::SubscriptionNotFound` for unknown ids.
    pub fn get(&self, subscription_id: Uuid) -> Result<Subscription, BusError> {
        Ok(self.entry(subscription_id)?.snapshot())
    }

    /// Lists every subscription, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .inner
            .entries
            .read()
            .values()
            .map(|e| e.snapshot())
            .collect();
        subs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.subscription_id.cmp(&b.subscription_id))
        });
        subs
    }

    /// Returns up to `max_events` undelivered events for a pull
    /// subscription: pending replay events first, then live events after
    /// the cursor. Nothing advances until [`Self::acknowledge`].
    ///
    /// # Errors
    ///
    /// Returns `BusError::SubscriptionNotFound`, `BusError::Validation` for
    /// push subscriptions, or `BusError::Infrastructure` on store failure.
    pub async fn fetch(
        &self,
        subscription_id: Uuid,
        max_events: usize,
    ) -> Result<Vec<Event>, BusError> {
        let entry = self.pull_entry(subscription_id)?;
        let max = max_events.min(MAX_READ_LIMIT);
        let sub = entry.snapshot();

        let mut events = entry.peek_replay(max);
        let mut cursor = sub.last_delivered_position;
        while events.len() < max {
            let page = self
                .inner
                .store
                .read_all(&ReadAllQuery {
                    after_position: cursor,
                    event_types: sub.type_filter(),
                    limit: self.inner.config.page_size,
                    ..ReadAllQuery::default()
                })
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            cursor = last.position;
            let room = max - events.len();
            events.extend(page.into_iter().filter(|e| sub.matches(e)).take(room));
        }
        Ok(events)
    }

    /// Acknowledges receipt of live event `event_id` by a pull
    /// subscription.
    ///
    /// Moves the cursor to the event, which also acknowledges everything
    /// before it; acknowledging an event at or behind the cursor is a no-op.
    /// Replayed copies are acknowledged with [`Self::acknowledge_replay`].
    ///
    /// # Errors
    ///
    /// Returns `BusError::SubscriptionNotFound`, `BusError::Validation` if
    /// the event does not exist or was never deliverable to this
    /// subscription, or `BusError::Infrastructure` on persistence failure.
    #[instrument(skip(self))]
    pub async fn acknowledge(
        &self,
        subscription_id: Uuid,
        event_id: Uuid,
    ) -> Result<Subscription, BusError> {
        let entry = self.pull_entry(subscription_id)?;
        let event = self
            .inner
            .store
            .read_event(event_id)
            .await?
            .ok_or_else(|| BusError::Validation(format!("event {event_id} does not exist")))?;
        if !entry.snapshot().matches(&event) {
            return Err(BusError::Validation(format!(
                "event {event_id} does not match subscription {subscription_id}"
            )));
        }
        self.inner
            .advance(&entry, event.position, Some(event.event_id))
            .await
    }

    /// Acknowledges the copy of `event_id` delivered by replay `replay_id`,
    /// dropping it and every replay event fetched before it. The live cursor
    /// never moves. Acknowledging a copy that is no longer buffered is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns `BusError::SubscriptionNotFound`, or `BusError::Validation`
    /// for push subscriptions.
    #[instrument(skip(self))]
    pub fn acknowledge_replay(
        &self,
        subscription_id: Uuid,
        replay_id: Uuid,
        event_id: Uuid,
    ) -> Result<Subscription, BusError> {
        let entry = self.pull_entry(subscription_id)?;
        if !entry.ack_replay(replay_id, event_id) {
            debug!(%replay_id, %event_id, "replay event already released");
        }
        Ok(entry.snapshot())
    }

    /// Returns a degraded subscription to active delivery, restarting from
    /// its cursor. Active subscriptions are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `BusError::SubscriptionNotFound` or
    /// `BusError::Infrastructure`.
    #[instrument(skip(self))]
    pub async fn resume(&self, subscription_id: Uuid) -> Result<Subscription, BusError> {
        let entry = self.entry(subscription_id)?;
        let mut resumed = false;
        let sub = entry
            .update(self.inner.repository.as_ref(), |sub| {
                if sub.status != SubscriptionStatus::Degraded {
                    return false;
                }
                sub.status = SubscriptionStatus::Active;
                sub.degraded_reason = None;
                resumed = true;
                true
            })
            .await?;

        if resumed {
            entry.wake.notify_one();
            info!(subscriber = %sub.subscriber_name, "subscription resumed");
            let _ = self.inner.alerts.send(HubAlert::SubscriptionResumed {
                subscription_id,
                subscriber_name: sub.subscriber_name.clone(),
            });
        }
        Ok(sub)
    }

    /// Records that the store head reached `head_position`, waking idle
    /// workers. Lower values than the current watermark are ignored.
    pub fn notify(&self, head_position: i64) {
        self.inner.head.send_if_modified(|head| {
            if head_position > *head {
                *head = head_position;
                true
            } else {
                false
            }
        });
    }

    /// Subscribes to the head watermark.
    #[must_use]
    pub fn watch_head(&self) -> watch::Receiver<i64> {
        self.inner.head.subscribe()
    }

    /// Subscribes to health alerts.
    #[must_use]
    pub fn alerts(&self) -> broadcast::Receiver<HubAlert> {
        self.inner.alerts.subscribe()
    }

    /// The store this hub reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.inner.store
    }

    /// Hands a replayed event to every matching subscription, or only to
    /// those of `target_subscriber` when given.
    ///
    /// Replayed events bypass cursors: they are buffered per subscription
    /// and never move `last_delivered_position`. A subscription whose buffer
    /// is full abandons the replay: its buffered events of that replay are
    /// dropped, later ones are refused and `HubAlert::ReplayOverflowed` is
    /// broadcast.
    pub fn dispatch_replay(
        &self,
        event: &Event,
        target_subscriber: Option<&str>,
    ) -> ReplayDispatch {
        let mut dispatch = ReplayDispatch::default();
        if self.inner.is_cancelled(event.metadata.replay_id) {
            return dispatch;
        }
        let capacity = self.inner.config.replay_buffer_capacity;
        let entries: Vec<Arc<Entry>> = self.inner.entries.read().values().cloned().collect();
        for entry in entries {
            let sub = entry.snapshot();
            if target_subscriber.is_some_and(|t| t != sub.subscriber_name) || !sub.matches(event) {
                continue;
            }
            match entry.push_replay(event, capacity, |id| self.inner.is_cancelled(id)) {
                Buffering::Buffered => dispatch.recipients += 1,
                Buffering::Refused => {}
                Buffering::Overflowed => {
                    warn!(
                        subscription_id = %sub.subscription_id,
                        subscriber = %sub.subscriber_name,
                        replay_id = ?event.metadata.replay_id,
                        capacity,
                        "replay buffer full; replay abandoned for subscription"
                    );
                    if let Some(replay_id) = event.metadata.replay_id {
                        let _ = self.inner.alerts.send(HubAlert::ReplayOverflowed {
                            subscription_id: sub.subscription_id,
                            subscriber_name: sub.subscriber_name.clone(),
                            replay_id,
                            capacity,
                        });
                    }
                    dispatch.overflowed.push(sub.subscription_id);
                }
            }
        }
        dispatch
    }

    /// Drops every undelivered event of `replay_id` and refuses any more
    /// until [`Self::forget_replay`].
    pub fn cancel_replay(&self, replay_id: Uuid) {
        self.inner.cancelled_replays.lock().insert(replay_id);
        for entry in self.inner.entries.read().values() {
            entry.purge_replay(replay_id);
        }
    }

    /// Releases the bookkeeping held for `replay_id`. Call once nothing
    /// will dispatch for it again.
    pub fn forget_replay(&self, replay_id: Uuid) {
        self.inner.cancelled_replays.lock().remove(&replay_id);
        for entry in self.inner.entries.read().values() {
            entry.forget_replay(replay_id);
        }
    }

    /// Number of replays currently refused as cancelled.
    #[must_use]
    pub fn cancelled_replays(&self) -> usize {
        self.inner.cancelled_replays.lock().len()
    }
}
