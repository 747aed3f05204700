//! End-to-end: typed events through the bus into the portfolio summary.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventbus_catalog::events::{
    CashDeposited, OrderCreated, OrderFilled, PortfolioCreated, TradeExecuted,
};
use eventbus_catalog::{
    OrderSide, PORTFOLIO_SUMMARY_PROJECTION, PortfolioSummaryProjection, TradingEvent,
    register_catalog,
};
use eventbus_core::checkpoint::{CheckpointRepository, ProjectionStatus};
use eventbus_core::clock::SystemClock;
use eventbus_core::error::BusError;
use eventbus_core::event::NewEvent;
use eventbus_core::schema::SchemaRegistry;
use eventbus_core::store::EventStore;
use eventbus_core::stream::StreamName;
use eventbus_event_store::{
    InMemoryCheckpointRepository, InMemoryEventStore, InMemorySubscriptionRepository,
};
use eventbus_hub::{DistributionHub, EventBus, HubConfig};
use eventbus_projection::{ProjectionConfig, ProjectionEngine};
use eventbus_test_support::{MockRng, RecordingSinkFactory, eventually};
use serde_json::json;
use uuid::Uuid;

async fn bus() -> EventBus {
    let hub = DistributionHub::new(
        Arc::new(InMemoryEventStore::new(Arc::new(SystemClock))) as Arc<dyn EventStore>,
        Arc::new(InMemorySubscriptionRepository::new()),
        Arc::new(RecordingSinkFactory::new()),
        Arc::new(SystemClock),
        Box::new(MockRng),
        HubConfig::default(),
    );
    hub.init().await.unwrap();
    let mut schemas = SchemaRegistry::new();
    register_catalog(&mut schemas).unwrap();
    EventBus::new(hub, schemas)
}

fn engine(bus: &EventBus) -> ProjectionEngine {
    ProjectionEngine::new(
        Arc::clone(bus.store()),
        Arc::new(InMemoryCheckpointRepository::new()) as Arc<dyn CheckpointRepository>,
        bus.hub().watch_head(),
        ProjectionConfig {
            poll_interval: Duration::from_millis(20),
            page_size: 3,
        },
    )
}

async fn record(bus: &EventBus, portfolio_id: Uuid, events: &[TradingEvent]) {
    let stream = StreamName::new(format!("portfolio-{portfolio_id}")).unwrap();
    let version = bus.stream_version(&stream).await.unwrap();
    let batch = events
        .iter()
        .map(TradingEvent::to_new_event)
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    bus.append(&stream, version, batch).await.unwrap();
}

fn session(portfolio_id: Uuid) -> Vec<TradingEvent> {
    let order_id = Uuid::new_v4();
    vec![
        TradingEvent::PortfolioCreated(PortfolioCreated {
            portfolio_id,
            owner: "grace".into(),
            base_currency: "EUR".into(),
        }),
        TradingEvent::CashDeposited(CashDeposited {
            portfolio_id,
            amount_cents: 50_000,
        }),
        TradingEvent::OrderCreated(OrderCreated {
            order_id,
            portfolio_id,
            symbol: "ACME".into(),
            side: OrderSide::Buy,
            quantity: 20,
            limit_price_cents: Some(1_000),
        }),
        TradingEvent::TradeExecuted(TradeExecuted {
            trade_id: Uuid::new_v4(),
            order_id,
            portfolio_id,
            symbol: "ACME".into(),
            side: OrderSide::Buy,
            quantity: 20,
            price_cents: 990,
            executed_at: Utc::now(),
        }),
        TradingEvent::OrderFilled(OrderFilled {
            order_id,
            portfolio_id,
            filled_quantity: 20,
            average_price_cents: 990,
        }),
    ]
}

#[tokio::test]
async fn test_bus_rejects_payloads_outside_the_catalog() {
    let bus = bus().await;
    let stream = StreamName::new("portfolio-x").unwrap();

    let extra = bus
        .append(
            &stream,
            0,
            vec![NewEvent::new(
                "CashDeposited",
                json!({ "portfolio_id": Uuid::new_v4(), "amount_cents": 1, "note": "x" }),
            )],
        )
        .await;

    assert!(matches!(extra, Err(BusError::SchemaValidation { .. })));
}

#[tokio::test]
async fn test_summary_tracks_each_portfolio() {
    // Arrange
    let bus = bus().await;
    let engine = engine(&bus);
    let handle = engine.register(PortfolioSummaryProjection).await.unwrap();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    // Act
    record(&bus, first, &session(first)).await;
    record(&bus, second, &session(second)[..2]).await;

    // Assert
    eventually("both portfolios summarized", async || {
        handle.events_processed() == 7
    })
    .await;
    handle.read(|book| {
        let traded = &book.portfolios[&first];
        assert_eq!(traded.cash_cents, 50_000 - 20 * 990);
        assert_eq!(traded.positions["ACME"], 20);
        assert!(traded.open_orders.is_empty());
        assert_eq!(book.portfolios[&second].cash_cents, 50_000);
    });
}

#[tokio::test]
async fn test_rebuilt_summary_matches_live_summary() {
    // Arrange
    let bus = bus().await;
    let engine = engine(&bus);
    let handle = engine.register(PortfolioSummaryProjection).await.unwrap();
    for _ in 0..5 {
        let id = Uuid::new_v4();
        record(&bus, id, &session(id)).await;
    }
    eventually("live summary caught up", async || handle.events_processed() == 25).await;
    let live = handle.state();

    // Act
    engine.rebuild(PORTFOLIO_SUMMARY_PROJECTION).await.unwrap();

    // Assert
    eventually("rebuild finished", async || {
        handle.status() == ProjectionStatus::Running && handle.events_processed() == 25
    })
    .await;
    assert_eq!(handle.state(), live);
    assert_eq!(
        engine.state(PORTFOLIO_SUMMARY_PROJECTION).unwrap(),
        serde_json::to_value(&live).unwrap()
    );
}
