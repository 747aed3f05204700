//! Trading event payloads.
//!
//! Every payload rejects unknown fields, so a producer sending a misspelled
//! or unexpected field is refused at append time. Money is carried in minor
//! units (cents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eventbus_core::error::BusError;
use eventbus_core::event::{Event, NewEvent};
use eventbus_core::schema::SchemaRegistry;

/// Schema version of every payload in this module.
pub const CATALOG_SCHEMA_VERSION: u32 = 1;

/// Event type identifier for [`PortfolioCreated`].
pub const PORTFOLIO_CREATED_EVENT_TYPE: &str = "PortfolioCreated";

/// Event type identifier for [`CashDeposited`].
pub const CASH_DEPOSITED_EVENT_TYPE: &str = "CashDeposited";

/// Event type identifier for [`CashWithdrawn`].
pub const CASH_WITHDRAWN_EVENT_TYPE: &str = "CashWithdrawn";

/// Event type identifier for [`OrderCreated`].
pub const ORDER_CREATED_EVENT_TYPE: &str = "OrderCreated";

/// Event type identifier for [`OrderFilled`].
pub const ORDER_FILLED_EVENT_TYPE: &str = "OrderFilled";

/// Event type identifier for [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "OrderCancelled";

/// Event type identifier for [`TradeExecuted`].
pub const TRADE_EXECUTED_EVENT_TYPE: &str = "TradeExecuted";

/// Every event type in the catalog.
pub const CATALOG_EVENT_TYPES: [&str; 7] = [
    PORTFOLIO_CREATED_EVENT_TYPE,
    CASH_DEPOSITED_EVENT_TYPE,
    CASH_WITHDRAWN_EVENT_TYPE,
    ORDER_CREATED_EVENT_TYPE,
    ORDER_FILLED_EVENT_TYPE,
    ORDER_CANCELLED_EVENT_TYPE,
    TRADE_EXECUTED_EVENT_TYPE,
];

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Acquire the instrument.
    Buy,
    /// Dispose of the instrument.
    Sell,
}

/// Emitted when a portfolio is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortfolioCreated {
    /// The portfolio identifier.
    pub portfolio_id: Uuid,
    /// Account holder.
    pub owner: String,
    /// ISO 4217 code cash is held in.
    pub base_currency: String,
}

/// Emitted when cash is paid into a portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CashDeposited {
    /// The portfolio identifier.
    pub portfolio_id: Uuid,
    /// Amount in minor units.
    pub amount_cents: i64,
}

/// Emitted when cash is paid out of a portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CashWithdrawn {
    /// The portfolio identifier.
    pub portfolio_id: Uuid,
    /// Amount in minor units.
    pub amount_cents: i64,
}

/// Emitted when an order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderCreated {
    /// The order identifier.
    pub order_id: Uuid,
    /// The owning portfolio.
    pub portfolio_id: Uuid,
    /// Instrument ticker.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Units requested.
    pub quantity: i64,
    /// Limit price in minor units; `None` for a market order.
    #[serde(default)]
    pub limit_price_cents: Option<i64>,
}

/// Emitted when an order is completely filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderFilled {
    /// The order identifier.
    pub order_id: Uuid,
    /// The owning portfolio.
    pub portfolio_id: Uuid,
    /// Units filled.
    pub filled_quantity: i64,
    /// Average fill price in minor units.
    pub average_price_cents: i64,
}

/// Emitted when an order is withdrawn before filling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderCancelled {
    /// The order identifier.
    pub order_id: Uuid,
    /// The owning portfolio.
    pub portfolio_id: Uuid,
    /// Free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Emitted for every execution against an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradeExecuted {
    /// The trade identifier.
    pub trade_id: Uuid,
    /// The order executed against.
    pub order_id: Uuid,
    /// The owning portfolio.
    pub portfolio_id: Uuid,
    /// Instrument ticker.
    pub symbol: String,
    /// Buy or sell.
    pub side: OrderSide,
    /// Units traded.
    pub quantity: i64,
    /// Execution price in minor units.
    pub price_cents: i64,
    /// Venue execution time.
    pub executed_at: DateTime<Utc>,
}

/// The closed set of trading events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingEvent {
    /// A portfolio was opened.
    PortfolioCreated(PortfolioCreated),
    /// Cash was deposited.
    CashDeposited(CashDeposited),
    /// Cash was withdrawn.
    CashWithdrawn(CashWithdrawn),
    /// An order was placed.
    OrderCreated(OrderCreated),
    /// An order was filled.
    OrderFilled(OrderFilled),
    /// An order was cancelled.
    OrderCancelled(OrderCancelled),
    /// A trade was executed.
    TradeExecuted(TradeExecuted),
}

impl TradingEvent {
    /// The event type this payload is stored under.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PortfolioCreated(_) => PORTFOLIO_CREATED_EVENT_TYPE,
            Self::CashDeposited(_) => CASH_DEPOSITED_EVENT_TYPE,
            Self::CashWithdrawn(_) => CASH_WITHDRAWN_EVENT_TYPE,
            Self::OrderCreated(_) => ORDER_CREATED_EVENT_TYPE,
            Self::OrderFilled(_) => ORDER_FILLED_EVENT_TYPE,
            Self::OrderCancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
            Self::TradeExecuted(_) => TRADE_EXECUTED_EVENT_TYPE,
        }
    }

    /// The portfolio the event belongs to.
    #[must_use]
    pub fn portfolio_id(&self) -> Uuid {
        match self {
            Self::PortfolioCreated(e) => e.portfolio_id,
            Self::CashDeposited(e) => e.portfolio_id,
            Self::CashWithdrawn(e) => e.portfolio_id,
            Self::OrderCreated(e) => e.portfolio_id,
            Self::OrderFilled(e) => e.portfolio_id,
            Self::OrderCancelled(e) => e.portfolio_id,
            Self::TradeExecuted(e) => e.portfolio_id,
        }
    }

    /// Serializes the inner payload.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` if serialization fails.
    pub fn to_payload(&self) -> Result<serde_json::Value, BusError> {
        let value = match self {
            Self::PortfolioCreated(e) => serde_json::to_value(e),
            Self::CashDeposited(e) => serde_json::to_value(e),
            Self::CashWithdrawn(e) => serde_json::to_value(e),
            Self::OrderCreated(e) => serde_json::to_value(e),
            Self::OrderFilled(e) => serde_json::to_value(e),
            Self::OrderCancelled(e) => serde_json::to_value(e),
            Self::TradeExecuted(e) => serde_json::to_value(e),
        };
        value.map_err(|e| BusError::Validation(format!("payload serialization failed: {e}")))
    }

    /// Wraps the payload for appending.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Validation` if serialization fails.
    pub fn to_new_event(&self) -> Result<NewEvent, BusError> {
        Ok(NewEvent::new(self.event_type(), self.to_payload()?))
    }

    /// Decodes a stored event. Returns `Ok(None)` for types outside the
    /// catalog.
    ///
    /// # Errors
    ///
    /// Returns `BusError::SchemaValidation` if a catalog event's payload
    /// does not match its type.
    pub fn from_event(event: &Event) -> Result<Option<Self>, BusError> {
        let payload = &event.payload;
        let decoded = match event.event_type.as_str() {
            PORTFOLIO_CREATED_EVENT_TYPE => decode(event, payload).map(Self::PortfolioCreated),
            CASH_DEPOSITED_EVENT_TYPE => decode(event, payload).map(Self::CashDeposited),
            CASH_WITHDRAWN_EVENT_TYPE => decode(event, payload).map(Self::CashWithdrawn),
            ORDER_CREATED_EVENT_TYPE => decode(event, payload).map(Self::OrderCreated),
            ORDER_FILLED_EVENT_TYPE => decode(event, payload).map(Self::OrderFilled),
            ORDER_CANCELLED_EVENT_TYPE => decode(event, payload).map(Self::OrderCancelled),
            TRADE_EXECUTED_EVENT_TYPE => decode(event, payload).map(Self::TradeExecuted),
            _ => return Ok(None),
        };
        decoded.map(Some)
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    event: &Event,
    payload: &serde_json::Value,
) -> Result<T, BusError> {
    T::deserialize(payload).map_err(|e| BusError::schema(&event.event_type, e.to_string()))
}

/// Registers every catalog payload at [`CATALOG_SCHEMA_VERSION`].
///
/// # Errors
///
/// Returns `BusError::Validation` if an event type name is rejected.
pub fn register_catalog(registry: &mut SchemaRegistry) -> Result<(), BusError> {
    let v = CATALOG_SCHEMA_VERSION;
    registry.register_type::<PortfolioCreated>(PORTFOLIO_CREATED_EVENT_TYPE, v)?;
    registry.register_type::<CashDeposited>(CASH_DEPOSITED_EVENT_TYPE, v)?;
    registry.register_type::<CashWithdrawn>(CASH_WITHDRAWN_EVENT_TYPE, v)?;
    registry.register_type::<OrderCreated>(ORDER_CREATED_EVENT_TYPE, v)?;
    registry.register_type::<OrderFilled>(ORDER_FILLED_EVENT_TYPE, v)?;
    registry.register_type::<OrderCancelled>(ORDER_CANCELLED_EVENT_TYPE, v)?;
    registry.register_type::<TradeExecuted>(TRADE_EXECUTED_EVENT_TYPE, v)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        register_catalog(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_register_catalog_covers_every_type() {
        let registry = registry();

        for event_type in CATALOG_EVENT_TYPES {
            assert!(registry.contains(event_type, CATALOG_SCHEMA_VERSION), "{event_type}");
        }
        assert_eq!(registry.registered().len(), CATALOG_EVENT_TYPES.len());
    }

    #[test]
    fn test_valid_payload_passes() {
        // Arrange
        let registry = registry();
        let payload = json!({
            "order_id": Uuid::new_v4(),
            "portfolio_id": Uuid::new_v4(),
            "symbol": "ACME",
            "side": "buy",
            "quantity": 10
        });

        // Act
        let result = registry.validate(ORDER_CREATED_EVENT_TYPE, 1, &payload);

        // Assert
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let registry = registry();
        let payload = json!({
            "portfolio_id": Uuid::new_v4(),
            "amount_cents": 100,
            "memo": "birthday"
        });

        let result = registry.validate(CASH_DEPOSITED_EVENT_TYPE, 1, &payload);

        assert!(matches!(result, Err(BusError::SchemaValidation { .. })));
    }

    #[test]
    fn test_wrong_field_type_and_missing_field_are_rejected() {
        let registry = registry();
        let wrong_side = json!({
            "order_id": Uuid::new_v4(),
            "portfolio_id": Uuid::new_v4(),
            "symbol": "ACME",
            "side": "short",
            "quantity": 10
        });
        let missing_owner = json!({ "portfolio_id": Uuid::new_v4(), "base_currency": "USD" });

        assert!(registry.validate(ORDER_CREATED_EVENT_TYPE, 1, &wrong_side).is_err());
        assert!(
            registry
                .validate(PORTFOLIO_CREATED_EVENT_TYPE, 1, &missing_owner)
                .is_err()
        );
    }

    #[test]
    fn test_unregistered_version_is_rejected() {
        let registry = registry();
        let payload = json!({ "portfolio_id": Uuid::new_v4(), "amount_cents": 1 });

        assert!(registry.validate(CASH_DEPOSITED_EVENT_TYPE, 2, &payload).is_err());
    }

    #[test]
    fn test_to_new_event_uses_the_catalog_type_name() {
        let event = TradingEvent::OrderCancelled(OrderCancelled {
            order_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            reason: Some("expired".into()),
        });

        let new_event = event.to_new_event().unwrap();

        assert_eq!(new_event.event_type, ORDER_CANCELLED_EVENT_TYPE);
        assert_eq!(new_event.payload["reason"], "expired");
        assert!(registry().validate(&new_event.event_type, 1, &new_event.payload).is_ok());
    }
}
