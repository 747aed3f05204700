//! HTTP webhook delivery for push subscriptions.
//!
//! # Webhook Protocol
//!
//! ```text
//! POST {webhook_target}
//! Content-Type: application/json
//! X-Event-Id: {event_id}
//! X-Event-Type: {event_type}
//!
//! { full event envelope }
//! ```
//!
//! Any 2xx response acknowledges the event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use eventbus_core::delivery::{DeliveryError, EventSink, SinkFactory};
use eventbus_core::event::Event;
use eventbus_core::subscription::Subscription;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers events by POSTing the envelope to a URL.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    /// Creates a sink posting to `url` with a shared client.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    async fn deliver(&self, event: &Event) -> Result<(), DeliveryError> {
        debug!(event_id = %event.event_id, url = %self.url, "posting event to webhook");

        let response = self
            .client
            .post(&self.url)
            .header("X-Event-Id", event.event_id.to_string())
            .header("X-Event-Type", &event.event_type)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout
                } else {
                    DeliveryError::Connection(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

/// Builds a [`WebhookSink`] for each push subscription, sharing one client.
#[derive(Debug, Clone)]
pub struct HttpSinkFactory {
    client: reqwest::Client,
}

impl HttpSinkFactory {
    /// Creates a factory whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Unavailable` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("eventbus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DeliveryError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl SinkFactory for HttpSinkFactory {
    fn sink_for(&self, subscription: &Subscription) -> Result<Arc<dyn EventSink>, DeliveryError> {
        let url = subscription.webhook_target.as_deref().ok_or_else(|| {
            DeliveryError::Unavailable(format!(
                "subscription {} has no webhook target",
                subscription.subscription_id
            ))
        })?;
        Ok(Arc::new(WebhookSink::new(self.client.clone(), url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use eventbus_core::event::EventMetadata;
    use eventbus_core::stream::StreamName;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> Event {
        Event {
            event_id: Uuid::new_v4(),
            stream_name: StreamName::new("portfolio-1").unwrap(),
            event_type: "PortfolioCreated".into(),
            payload: json!({"name": "Core"}),
            metadata: EventMetadata::default(),
            timestamp: Utc::now(),
            sequence_number: 1,
            position: 1,
        }
    }

    #[tokio::test]
    async fn test_deliver_posts_envelope() {
        let server = MockServer::start().await;
        let event = event();

        Mock::given(method("POST"))
            .and(path("/hooks/portfolio"))
            .and(header("content-type", "application/json"))
            .and(header("x-event-type", "PortfolioCreated"))
            .and(body_partial_json(json!({
                "event_id": event.event_id,
                "stream_name": "portfolio-1",
                "sequence_number": 1,
                "payload": {"name": "Core"}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let factory = HttpSinkFactory::new(DEFAULT_TIMEOUT).unwrap();
        let sink = WebhookSink::new(factory.client, format!("{}/hooks/portfolio", server.uri()));

        sink.deliver(&event).await.expect("should deliver");
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let factory = HttpSinkFactory::new(DEFAULT_TIMEOUT).unwrap();
        let sink = WebhookSink::new(factory.client, server.uri());

        let result = sink.deliver(&event()).await;

        assert_eq!(result, Err(DeliveryError::Rejected { status: 503 }));
    }

    #[tokio::test]
    async fn test_slow_consumer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let factory = HttpSinkFactory::new(Duration::from_millis(50)).unwrap();
        let sink = WebhookSink::new(factory.client, server.uri());

        let result = sink.deliver(&event()).await;

        assert_eq!(result, Err(DeliveryError::Timeout));
    }

    #[tokio::test]
    async fn test_unreachable_consumer_is_connection_error() {
        let factory = HttpSinkFactory::new(DEFAULT_TIMEOUT).unwrap();
        let sink = WebhookSink::new(factory.client, "http://127.0.0.1:9/unreachable");

        let result = sink.deliver(&event()).await;

        assert!(matches!(result, Err(DeliveryError::Connection(_))));
    }
}
