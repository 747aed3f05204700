//! Portfolio summary read model.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eventbus_core::event::Event;
use eventbus_projection::{Projection, ProjectionError};

use crate::events::{CATALOG_EVENT_TYPES, OrderSide, TradeExecuted, TradingEvent};

/// Name the projection registers and checkpoints under.
pub const PORTFOLIO_SUMMARY_PROJECTION: &str = "portfolio-summary";

/// Current standing of one portfolio.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    /// Account holder.
    pub owner: String,
    /// Currency of `cash_cents`.
    pub base_currency: String,
    /// Cash balance in minor units; negative when overdrawn.
    pub cash_cents: i64,
    /// Net units held per symbol; zero positions are dropped.
    pub positions: BTreeMap<String, i64>,
    /// Orders neither filled nor cancelled.
    pub open_orders: BTreeSet<Uuid>,
    /// Trades executed.
    pub trade_count: u64,
}

/// State of [`PortfolioSummaryProjection`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioBook {
    /// Summaries by portfolio id.
    pub portfolios: BTreeMap<Uuid, PortfolioSummary>,
}

/// Folds trading events into per-portfolio cash, positions and open orders.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortfolioSummaryProjection;

impl Projection for PortfolioSummaryProjection {
    type State = PortfolioBook;

    fn name(&self) -> &str {
        PORTFOLIO_SUMMARY_PROJECTION
    }

    fn handles(&self, event_type: &str) -> bool {
        CATALOG_EVENT_TYPES.contains(&event_type)
    }

    fn apply(&self, mut book: PortfolioBook, event: &Event) -> Result<PortfolioBook, ProjectionError> {
        let Some(trading) =
            TradingEvent::from_event(event).map_err(|e| ProjectionError::handler(e.to_string()))?
        else {
            return Ok(book);
        };

        if let TradingEvent::PortfolioCreated(created) = &trading {
            book.portfolios.insert(
                created.portfolio_id,
                PortfolioSummary {
                    owner: created.owner.clone(),
                    base_currency: created.base_currency.clone(),
                    ..PortfolioSummary::default()
                },
            );
            return Ok(book);
        }

        let portfolio_id = trading.portfolio_id();
        let summary = book.portfolios.get_mut(&portfolio_id).ok_or_else(|| {
            ProjectionError::handler(format!("unknown portfolio {portfolio_id}"))
        })?;
        match trading {
            TradingEvent::PortfolioCreated(_) => {}
            TradingEvent::CashDeposited(e) => {
                summary.cash_cents = add(summary.cash_cents, e.amount_cents)?;
            }
            TradingEvent::CashWithdrawn(e) => {
                summary.cash_cents = add(summary.cash_cents, negate(e.amount_cents)?)?;
            }
            TradingEvent::OrderCreated(e) => {
                summary.open_orders.insert(e.order_id);
            }
            TradingEvent::OrderFilled(e) => {
                summary.open_orders.remove(&e.order_id);
            }
            TradingEvent::OrderCancelled(e) => {
                summary.open_orders.remove(&e.order_id);
            }
            TradingEvent::TradeExecuted(trade) => settle(summary, &trade)?,
        }
        Ok(book)
    }
}

fn settle(summary: &mut PortfolioSummary, trade: &TradeExecuted) -> Result<(), ProjectionError> {
    let notional = trade
        .quantity
        .checked_mul(trade.price_cents)
        .ok_or_else(|| overflow(trade.trade_id))?;
    let (units, cash) = match trade.side {
        OrderSide::Buy => (trade.quantity, negate(notional)?),
        OrderSide::Sell => (negate(trade.quantity)?, notional),
    };

    summary.cash_cents = add(summary.cash_cents, cash)?;
    let held = summary.positions.get(&trade.symbol).copied().unwrap_or_default();
    let held = add(held, units)?;
    if held == 0 {
        summary.positions.remove(&trade.symbol);
    } else {
        summary.positions.insert(trade.symbol.clone(), held);
    }
    summary.trade_count += 1;
    Ok(())
}

fn add(a: i64, b: i64) -> Result<i64, ProjectionError> {
    a.checked_add(b)
        .ok_or_else(|| ProjectionError::handler("amount overflow"))
}

fn negate(a: i64) -> Result<i64, ProjectionError> {
    a.checked_neg()
        .ok_or_else(|| ProjectionError::handler("amount overflow"))
}

fn overflow(trade_id: Uuid) -> ProjectionError {
    ProjectionError::handler(format!("notional of trade {trade_id} overflows"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use eventbus_core::event::EventMetadata;
    use eventbus_core::stream::StreamName;

    use super::*;
    use crate::events::{CashDeposited, CashWithdrawn, OrderCreated, OrderFilled, PortfolioCreated};

    fn stored(position: i64, trading: &TradingEvent) -> Event {
        Event {
            event_id: Uuid::now_v7(),
            stream_name: StreamName::new(format!("portfolio-{}", trading.portfolio_id())).unwrap(),
            event_type: trading.event_type().to_owned(),
            payload: trading.to_payload().unwrap(),
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
            sequence_number: position,
            position,
        }
    }

    fn fold(events: &[TradingEvent]) -> Result<PortfolioBook, ProjectionError> {
        let projection = PortfolioSummaryProjection;
        (1_i64..)
            .zip(events)
            .try_fold(PortfolioBook::default(), |book, (position, e)| {
                projection.apply(book, &stored(position, e))
            })
    }

    fn opened(portfolio_id: Uuid) -> TradingEvent {
        TradingEvent::PortfolioCreated(PortfolioCreated {
            portfolio_id,
            owner: "ada".into(),
            base_currency: "USD".into(),
        })
    }

    fn trade(portfolio_id: Uuid, side: OrderSide, quantity: i64, price_cents: i64) -> TradingEvent {
        TradingEvent::TradeExecuted(TradeExecuted {
            trade_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            portfolio_id,
            symbol: "ACME".into(),
            side,
            quantity,
            price_cents,
            executed_at: Utc::now(),
        })
    }

    #[test]
    fn test_cash_and_trades_update_balance_and_positions() {
        // Arrange
        let id = Uuid::new_v4();
        let events = [
            opened(id),
            TradingEvent::CashDeposited(CashDeposited {
                portfolio_id: id,
                amount_cents: 100_000,
            }),
            trade(id, OrderSide::Buy, 10, 2_500),
            trade(id, OrderSide::Sell, 4, 3_000),
            TradingEvent::CashWithdrawn(CashWithdrawn {
                portfolio_id: id,
                amount_cents: 1_000,
            }),
        ];

        // Act
        let book = fold(&events).unwrap();

        // Assert
        let summary = &book.portfolios[&id];
        assert_eq!(summary.cash_cents, 100_000 - 25_000 + 12_000 - 1_000);
        assert_eq!(summary.positions["ACME"], 6);
        assert_eq!(summary.trade_count, 2);
        assert_eq!(summary.owner, "ada");
    }

    #[test]
    fn test_closed_positions_are_dropped() {
        let id = Uuid::new_v4();

        let book = fold(&[
            opened(id),
            trade(id, OrderSide::Buy, 5, 100),
            trade(id, OrderSide::Sell, 5, 120),
        ])
        .unwrap();

        assert!(book.portfolios[&id].positions.is_empty());
        assert_eq!(book.portfolios[&id].cash_cents, 100);
    }

    #[test]
    fn test_orders_open_until_filled() {
        let id = Uuid::new_v4();
        let order_id = Uuid::new_v4();
        let created = TradingEvent::OrderCreated(OrderCreated {
            order_id,
            portfolio_id: id,
            symbol: "ACME".into(),
            side: OrderSide::Buy,
            quantity: 1,
            limit_price_cents: None,
        });

        let open = fold(&[opened(id), created.clone()]).unwrap();
        let filled = fold(&[
            opened(id),
            created,
            TradingEvent::OrderFilled(OrderFilled {
                order_id,
                portfolio_id: id,
                filled_quantity: 1,
                average_price_cents: 10,
            }),
        ])
        .unwrap();

        assert!(open.portfolios[&id].open_orders.contains(&order_id));
        assert!(filled.portfolios[&id].open_orders.is_empty());
    }

    #[test]
    fn test_event_for_unknown_portfolio_fails() {
        let result = fold(&[TradingEvent::CashDeposited(CashDeposited {
            portfolio_id: Uuid::new_v4(),
            amount_cents: 5,
        })]);

        assert!(matches!(result, Err(ProjectionError::Handler(reason)) if reason.contains("unknown portfolio")));
    }

    #[test]
    fn test_overflowing_notional_fails() {
        let id = Uuid::new_v4();

        let result = fold(&[opened(id), trade(id, OrderSide::Buy, i64::MAX, 2)]);

        assert!(matches!(result, Err(ProjectionError::Handler(_))));
    }

    #[test]
    fn test_handles_only_catalog_types() {
        let projection = PortfolioSummaryProjection;

        assert!(projection.handles("TradeExecuted"));
        assert!(!projection.handles("PriceTick"));
    }
}
