//! Event Bus Hub: subscription registry, distribution and the append
//! facade.
//!
//! [`EventBus`] is what producers talk to. [`DistributionHub`] fans appended
//! events out to push subscribers (via [`WebhookSink`] in production) and
//! serves pull subscribers through fetch/acknowledge.

pub mod bus;
pub mod hub;
pub mod retry;
pub mod webhook;
mod worker;

pub use bus::EventBus;
pub use hub::{DistributionHub, HubAlert, HubConfig, ReplayDispatch};
pub use retry::RetryPolicy;
pub use webhook::{HttpSinkFactory, WebhookSink};
