//! Event Bus Catalog.
//!
//! The typed trading payloads producers append, their schema registration,
//! and the portfolio summary read model built from them.

pub mod events;
pub mod portfolio;

pub use events::{OrderSide, TradingEvent, register_catalog};
pub use portfolio::{
    PORTFOLIO_SUMMARY_PROJECTION, PortfolioBook, PortfolioSummary, PortfolioSummaryProjection,
};
