//! Embedded in-memory implementations of the storage traits.
//!
//! Appends to the same stream are serialized by a per-stream async mutex
//! held across the version check and the write. Appends to different
//! streams only contend on the short global section that assigns positions
//! and timestamps.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use eventbus_core::checkpoint::{CheckpointRepository, ProjectionCheckpoint};
use eventbus_core::clock::{Clock, non_decreasing};
use eventbus_core::error::BusError;
use eventbus_core::event::{Event, NewEvent};
use eventbus_core::store::{EventStore, ReadAllQuery};
use eventbus_core::stream::StreamName;
use eventbus_core::subscription::{Subscription, SubscriptionRepository};

#[derive(Default)]
struct Log {
    events: Vec<Event>,
    by_stream: HashMap<StreamName, Vec<usize>>,
    by_id: HashMap<Uuid, usize>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Log {
    fn version(&self, stream: &StreamName) -> i64 {
        self.by_stream
            .get(stream)
            .map_or(0, |indexes| i64::try_from(indexes.len()).unwrap_or(i64::MAX))
    }
}

/// Event store held entirely in process memory.
pub struct InMemoryEventStore {
    clock: Arc<dyn Clock>,
    stream_locks: Mutex<HashMap<StreamName, Arc<tokio::sync::Mutex<()>>>>,
    log: RwLock<Log>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("events", &self.log.read().events.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store stamping events with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            stream_locks: Mutex::new(HashMap::new()),
            log: RwLock::new(Log::default()),
        }
    }

    fn stream_lock(&self, stream: &StreamName) -> Arc<tokio::sync::Mutex<()>> {
        self.stream_locks
            .lock()
            .entry(stream.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream: &StreamName,
        expected_version: i64,
        events: Vec<NewEvent>,
    ) -> Result<Vec<Event>, BusError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let lock = self.stream_lock(stream);
        let _guard = lock.lock().await;

        let actual = self.log.read().version(stream);
        if actual != expected_version {
            return Err(BusError::ConcurrencyConflict {
                stream_name: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        let mut log = self.log.write();
        let timestamp = non_decreasing(log.last_timestamp, self.clock.now());
        let mut appended = Vec::with_capacity(events.len());

        for (offset, new_event) in (1_i64..).zip(events) {
            let index = log.events.len();
            let mut metadata = new_event.metadata;
            metadata.replay_id = None;

            let event = Event {
                event_id: Uuid::now_v7(),
                stream_name: stream.clone(),
                event_type: new_event.event_type,
                payload: new_event.payload,
                metadata,
                timestamp,
                sequence_number: expected_version + offset,
                position: i64::try_from(index).unwrap_or(i64::MAX) + 1,
            };

            log.by_id.insert(event.event_id, index);
            log.by_stream.entry(stream.clone()).or_default().push(index);
            log.events.push(event.clone());
            appended.push(event);
        }
        log.last_timestamp = Some(timestamp);

        debug!(
            stream_name = %stream,
            count = appended.len(),
            version = expected_version + i64::try_from(appended.len()).unwrap_or(i64::MAX),
            "appended events"
        );

        Ok(appended)
    }

    async fn read_stream(
        &self,
        stream: &StreamName,
        from_sequence: i64,
        limit: usize,
    ) -> Result<Vec<Event>, BusError> {
        let log = self.log.read();
        let Some(indexes) = log.by_stream.get(stream) else {
            return Ok(Vec::new());
        };

        // Sequence n lives at indexes[n - 1].
        let skip = usize::try_from(from_sequence.max(1) - 1).unwrap_or(usize::MAX);
        Ok(indexes
            .iter()
            .skip(skip)
            .take(limit.min(eventbus_core::store::MAX_READ_LIMIT))
            .map(|&i| log.events[i].clone())
            .collect())
    }

    async fn read_all(&self, query: &ReadAllQuery) -> Result<Vec<Event>, BusError> {
        let log = self.log.read();
        // Position p lives at events[p - 1].
        let start = usize::try_from(query.after_position.max(0)).unwrap_or(usize::MAX);
        Ok(log
            .events
            .iter()
            .skip(start)
            .filter(|e| query.accepts(e))
            .take(query.effective_limit())
            .cloned()
            .collect())
    }

    async fn read_event(&self, event_id: Uuid) -> Result<Option<Event>, BusError> {
        let log = self.log.read();
        Ok(log.by_id.get(&event_id).map(|&i| log.events[i].clone()))
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<i64, BusError> {
        Ok(self.log.read().version(stream))
    }

    async fn head_position(&self) -> Result<i64, BusError> {
        Ok(i64::try_from(self.log.read().events.len()).unwrap_or(i64::MAX))
    }

    async fn ping(&self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Subscription records held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn save(&self, subscription: &Subscription) -> Result<(), BusError> {
        self.subscriptions
            .lock()
            .insert(subscription.subscription_id, subscription.clone());
        Ok(())
    }

    async fn delete(&self, subscription_id: Uuid) -> Result<(), BusError> {
        self.subscriptions.lock().remove(&subscription_id);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, BusError> {
        let mut all: Vec<_> = self.subscriptions.lock().values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        Ok(all)
    }
}

/// Projection checkpoints held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointRepository {
    checkpoints: Mutex<HashMap<String, ProjectionCheckpoint>>,
}

impl InMemoryCheckpointRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn load(&self, projection_name: &str) -> Result<Option<ProjectionCheckpoint>, BusError> {
        Ok(self.checkpoints.lock().get(projection_name).cloned())
    }

    async fn save(&self, checkpoint: &ProjectionCheckpoint) -> Result<(), BusError> {
        self.checkpoints
            .lock()
            .insert(checkpoint.projection_name.clone(), checkpoint.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventbus_core::event::EventMetadata;
    use eventbus_test_support::{FixedClock, StepClock};
    use serde_json::json;

    fn store() -> InMemoryEventStore {
        InMemoryEventStore::new(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        )))
    }

    fn stream(name: &str) -> StreamName {
        StreamName::new(name).unwrap()
    }

    fn created() -> NewEvent {
        NewEvent::new("PortfolioCreated", json!({"name": "Core"}))
    }

    #[tokio::test]
    async fn test_first_append_requires_expected_version_zero() {
        // Arrange
        let store = store();
        let s = stream("portfolio-1");

        // Act
        let first = store.append(&s, 0, vec![created()]).await.unwrap();
        let conflict = store.append(&s, 0, vec![created()]).await;
        let second = store.append(&s, 1, vec![created()]).await.unwrap();

        // Assert
        assert_eq!(first[0].sequence_number, 1);
        match conflict {
            Err(BusError::ConcurrencyConflict {
                stream_name,
                expected,
                actual,
            }) => {
                assert_eq!(stream_name, "portfolio-1");
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(second[0].sequence_number, 2);
        assert_eq!(store.stream_version(&s).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_to_missing_stream_with_nonzero_version_conflicts() {
        let store = store();
        let result = store.append(&stream("ghost"), 3, vec![created()]).await;
        assert!(matches!(
            result,
            Err(BusError::ConcurrencyConflict { actual: 0, .. })
        ));
        assert_eq!(store.head_position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_append_is_gapless_and_positions_are_global() {
        let store = store();
        let a = stream("a");
        let b = stream("b");

        store
            .append(&a, 0, vec![created(), created(), created()])
            .await
            .unwrap();
        store.append(&b, 0, vec![created()]).await.unwrap();
        store.append(&a, 3, vec![created()]).await.unwrap();

        let seqs: Vec<i64> = store
            .read_stream(&a, 0, 100)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);

        let positions: Vec<i64> = store
            .read_all(&ReadAllQuery::after(0, 100))
            .await
            .unwrap()
            .iter()
            .map(|e| e.position)
            .collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = store();
        let appended = store.append(&stream("a"), 0, vec![]).await.unwrap();
        assert!(appended.is_empty());
        assert_eq!(store.stream_version(&stream("a")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_stream_is_restartable_from_cursor() {
        let store = store();
        let s = stream("orders");
        store
            .append(&s, 0, (0..5).map(|_| created()).collect())
            .await
            .unwrap();

        let page = store.read_stream(&s, 3, 2).await.unwrap();
        let seqs: Vec<i64> = page.iter().map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![3, 4]);

        assert!(store.read_stream(&s, 6, 10).await.unwrap().is_empty());
        assert!(
            store
                .read_stream(&stream("unknown"), 0, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_zero_limit_reads_nothing() {
        let store = store();
        let s = stream("orders");
        store
            .append(&s, 0, vec![created(), created()])
            .await
            .unwrap();

        assert!(store.read_stream(&s, 0, 0).await.unwrap().is_empty());
        assert!(
            store
                .read_all(&ReadAllQuery::after(0, 0))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_read_all_filters_by_type_and_cursor() {
        let store = store();
        store.append(&stream("p-1"), 0, vec![created()]).await.unwrap();
        store
            .append(
                &stream("o-1"),
                0,
                vec![NewEvent::new("OrderCreated", json!({}))],
            )
            .await
            .unwrap();
        store.append(&stream("p-2"), 0, vec![created()]).await.unwrap();

        let query = ReadAllQuery {
            after_position: 1,
            event_types: vec!["PortfolioCreated".into()],
            ..ReadAllQuery::default()
        };
        let events = store.read_all(&query).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_name.as_str(), "p-2");
        assert_eq!(events[0].position, 3);
    }

    #[tokio::test]
    async fn test_timestamps_never_decrease_even_if_clock_steps_back() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let clock = StepClock::new(t0, chrono::Duration::seconds(-10));
        let store = InMemoryEventStore::new(Arc::new(clock));

        store.append(&stream("a"), 0, vec![created()]).await.unwrap();
        store.append(&stream("b"), 0, vec![created()]).await.unwrap();

        let events = store.read_all(&ReadAllQuery::default()).await.unwrap();
        assert_eq!(events[0].timestamp, t0);
        assert_eq!(events[1].timestamp, t0);
    }

    #[tokio::test]
    async fn test_append_strips_replay_marker_and_read_event_finds_it() {
        let store = store();
        let meta = EventMetadata {
            replay_id: Some(Uuid::new_v4()),
            actor: Some("trader-7".into()),
            ..EventMetadata::default()
        };

        let appended = store
            .append(&stream("a"), 0, vec![created().with_metadata(meta)])
            .await
            .unwrap();
        let found = store
            .read_event(appended[0].event_id)
            .await
            .unwrap()
            .unwrap();

        assert!(found.metadata.replay_id.is_none());
        assert_eq!(found.metadata.actor.as_deref(), Some("trader-7"));
        assert!(store.read_event(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_with_same_expected_version_admit_exactly_one() {
        let store = Arc::new(store());
        let s = stream("contended");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let s = s.clone();
            handles.push(tokio::spawn(async move {
                store.append(&s, 0, vec![created()]).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(BusError::ConcurrencyConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
        assert_eq!(store.stream_version(&s).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscription_repository_save_delete_load() {
        let repo = InMemorySubscriptionRepository::new();
        let sub = Subscription::from_request(
            eventbus_core::subscription::SubscriptionRequest {
                subscriber_name: "risk".into(),
                event_types: vec!["OrderCreated".into()],
                stream_patterns: vec![],
                delivery_mode: eventbus_core::subscription::DeliveryMode::Pull,
                webhook_target: None,
                from_beginning: false,
            },
            0,
            Utc::now(),
        )
        .unwrap();

        repo.save(&sub).await.unwrap();
        assert_eq!(repo.load_all().await.unwrap(), vec![sub.clone()]);

        repo.delete(sub.subscription_id).await.unwrap();
        repo.delete(sub.subscription_id).await.unwrap();
        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_repository_overwrites() {
        let repo = InMemoryCheckpointRepository::new();
        let mut cp = ProjectionCheckpoint::empty("summary", json!({}));
        repo.save(&cp).await.unwrap();
        cp.events_processed = 3;
        repo.save(&cp).await.unwrap();

        assert_eq!(
            repo.load("summary").await.unwrap().unwrap().events_processed,
            3
        );
        assert!(repo.load("other").await.unwrap().is_none());
    }
}
