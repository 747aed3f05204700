//! Shared application state and its assembly.

use std::sync::Arc;
use std::time::Instant;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use eventbus_catalog::{PortfolioSummaryProjection, register_catalog};
use eventbus_core::checkpoint::CheckpointRepository;
use eventbus_core::clock::{Clock, SystemClock};
use eventbus_core::delivery::SinkFactory;
use eventbus_core::rng::ThreadRng;
use eventbus_core::schema::SchemaRegistry;
use eventbus_core::store::EventStore;
use eventbus_core::subscription::SubscriptionRepository;
use eventbus_event_store::{
    InMemoryCheckpointRepository, InMemoryEventStore, InMemorySubscriptionRepository,
    PgCheckpointRepository, PgEventStore, PgSubscriptionRepository,
};
use eventbus_hub::{DistributionHub, EventBus, HttpSinkFactory, HubConfig};
use eventbus_projection::{ProjectionConfig, ProjectionEngine};
use eventbus_replay::{ReplayConfig, ReplayEngine};

use crate::config::{ServerConfig, StorageBackend};
use crate::error::AppError;

/// Storage seams the bus runs on.
pub struct Storage {
    /// Event log.
    pub events: Arc<dyn EventStore>,
    /// Subscription records and cursors.
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    /// Projection checkpoints.
    pub checkpoints: Arc<dyn CheckpointRepository>,
}

impl Storage {
    /// Embedded storage; nothing survives a restart.
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            events: Arc::new(InMemoryEventStore::new(clock)),
            subscriptions: Arc::new(InMemorySubscriptionRepository::new()),
            checkpoints: Arc::new(InMemoryCheckpointRepository::new()),
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Append/read facade; owns the hub.
    pub bus: Arc<EventBus>,
    /// Registered projections.
    pub projections: Arc<ProjectionEngine>,
    /// Replays.
    pub replays: ReplayEngine,
    /// Process start, for uptime.
    pub started_at: Instant,
}

impl AppState {
    /// Wires hub, bus, projections and replays over `storage`, loads
    /// persisted subscriptions and registers the built-in projections.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bus` if subscriptions or checkpoints cannot be
    /// loaded.
    pub async fn assemble(
        storage: Storage,
        sinks: Arc<dyn SinkFactory>,
        hub_config: HubConfig,
        projection_config: ProjectionConfig,
    ) -> Result<Self, AppError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let hub = DistributionHub::new(
            storage.events,
            storage.subscriptions,
            sinks,
            Arc::clone(&clock),
            Box::new(ThreadRng),
            hub_config,
        );
        let loaded = hub.init().await?;
        info!(subscriptions = loaded, "distribution hub ready");

        let mut schemas = SchemaRegistry::new();
        register_catalog(&mut schemas)?;
        let bus = Arc::new(EventBus::new(hub.clone(), schemas));

        let projections = Arc::new(ProjectionEngine::new(
            Arc::clone(bus.store()),
            storage.checkpoints,
            hub.watch_head(),
            projection_config,
        ));
        projections.register(PortfolioSummaryProjection).await?;

        let replays = ReplayEngine::new(hub, clock, ReplayConfig::default());

        Ok(Self {
            bus,
            projections,
            replays,
            started_at: Instant::now(),
        })
    }

    /// Builds the state described by `config`, connecting to and migrating
    /// PostgreSQL when configured.
    ///
    /// # Errors
    ///
    /// Returns `AppError` if the database is unreachable, migrations fail or
    /// the webhook client cannot be built.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, AppError> {
        let storage = match config.storage {
            StorageBackend::Memory => {
                info!("using in-memory storage");
                Storage::in_memory(Arc::new(SystemClock))
            }
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| AppError::Config("DATABASE_URL must be set".into()))?;
                let pool = PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .connect(url)
                    .await?;
                sqlx::migrate!("../../migrations").run(&pool).await?;
                info!("database migrated");
                Storage {
                    events: Arc::new(PgEventStore::new(pool.clone(), Arc::new(SystemClock))),
                    subscriptions: Arc::new(PgSubscriptionRepository::new(pool.clone())),
                    checkpoints: Arc::new(PgCheckpointRepository::new(pool)),
                }
            }
        };

        let sinks = HttpSinkFactory::new(config.webhook_timeout)
            .map_err(|e| AppError::Config(format!("webhook client: {e}")))?;

        Self::assemble(
            storage,
            Arc::new(sinks),
            config.hub_config(),
            config.projection_config(),
        )
        .await
    }

    /// Stops replays, push workers and projection runners.
    pub async fn shutdown(&self) {
        self.replays.shutdown();
        self.bus.hub().shutdown().await;
        self.projections.shutdown().await;
    }
}
