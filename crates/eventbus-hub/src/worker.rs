//! Push delivery worker, one task per push subscription.
//!
//! The worker delivers one event at a time in global position order, so
//! events of the same stream always arrive in sequence order. The cursor is
//! persisted after every successful delivery; a crash redelivers at most the
//! event in flight.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use eventbus_core::delivery::{DeliveryError, EventSink};
use eventbus_core::error::BusError;
use eventbus_core::event::Event;
use eventbus_core::store::ReadAllQuery;
use eventbus_core::subscription::SubscriptionStatus;

use crate::hub::{Entry, HubInner};

enum Pass {
    /// Caught up with the store.
    Idle,
    /// Subscription is degraded; wait for a resume.
    Parked,
    /// Stop was requested.
    Stopped,
}

pub(crate) async fn run(hub: Arc<HubInner>, entry: Arc<Entry>) {
    let subscription_id = entry.snapshot().subscription_id;
    let mut stop = entry.stop.subscribe();
    let mut head = hub.head.subscribe();
    let mut sink: Option<Arc<dyn EventSink>> = None;
    info!(%subscription_id, "push worker started");

    loop {
        if *stop.borrow() {
            break;
        }
        head.mark_unchanged();

        let parked = entry.snapshot().status == SubscriptionStatus::Degraded;
        if !parked {
            match pass(&hub, &entry, &mut sink, &mut stop).await {
                Ok(Pass::Stopped) => break,
                Ok(Pass::Idle | Pass::Parked) => {}
                Err(BusError::SubscriptionNotFound(_)) => break,
                Err(e) => warn!(%subscription_id, error = %e, "push pass failed; will retry"),
            }
        }

        let parked = entry.snapshot().status == SubscriptionStatus::Degraded;
        tokio::select! {
            _ = stop.changed() => {}
            () = entry.wake.notified() => {}
            _ = head.changed(), if !parked => {}
            () = tokio::time::sleep(hub.config.poll_interval), if !parked => {}
        }
    }

    info!(%subscription_id, "push worker stopped");
}

async fn pass(
    hub: &HubInner,
    entry: &Entry,
    sink_slot: &mut Option<Arc<dyn EventSink>>,
    stop: &mut watch::Receiver<bool>,
) -> Result<Pass, BusError> {
    let sink = if let Some(sink) = sink_slot {
        Arc::clone(sink)
    } else {
        match hub.sinks.sink_for(&entry.snapshot()) {
            Ok(sink) => {
                *sink_slot = Some(Arc::clone(&sink));
                sink
            }
            Err(e) => {
                hub.degrade(entry, e.to_string()).await?;
                return Ok(Pass::Parked);
            }
        }
    };

    while let Some(event) = entry.pop_replay() {
        if hub.is_cancelled(event.metadata.replay_id) {
            continue;
        }
        match deliver(hub, sink.as_ref(), &event, stop).await {
            None => return Ok(Pass::Stopped),
            Some(Ok(())) => debug!(event_id = %event.event_id, "replayed event delivered"),
            Some(Err(e)) => warn!(
                event_id = %event.event_id,
                error = %e,
                "replayed event dropped after retries"
            ),
        }
    }

    loop {
        let sub = entry.snapshot();
        if sub.status == SubscriptionStatus::Degraded {
            return Ok(Pass::Parked);
        }

        let page = hub
            .store
            .read_all(&ReadAllQuery {
                after_position: sub.last_delivered_position,
                event_types: sub.type_filter(),
                limit: hub.config.page_size,
                ..ReadAllQuery::default()
            })
            .await?;
        let Some(page_end) = page.last().map(|e| e.position) else {
            return Ok(Pass::Idle);
        };

        for event in page.iter().filter(|e| sub.matches(e)) {
            match deliver(hub, sink.as_ref(), event, stop).await {
                None => return Ok(Pass::Stopped),
                Some(Ok(())) => {
                    hub.advance(entry, event.position, Some(event.event_id))
                        .await?;
                    debug!(
                        subscription_id = %sub.subscription_id,
                        event_id = %event.event_id,
                        position = event.position,
                        "event delivered"
                    );
                }
                Some(Err(e)) => {
                    hub.degrade(entry, failure_reason(event, &e)).await?;
                    return Ok(Pass::Parked);
                }
            }
        }

        // Move past trailing events that did not match the stream patterns.
        hub.advance(entry, page_end, None).await?;
    }
}

/// Runs the retry policy, giving up early if stop is requested.
async fn deliver(
    hub: &HubInner,
    sink: &dyn EventSink,
    event: &Event,
    stop: &mut watch::Receiver<bool>,
) -> Option<Result<(), DeliveryError>> {
    tokio::select! {
        result = hub.config.retry.deliver(sink, event, || hub.jitter_sample()) => Some(result),
        () = async {
            let _ = stop.wait_for(|stopped| *stopped).await;
        } => None,
    }
}

fn failure_reason(event: &Event, err: &DeliveryError) -> String {
    format!(
        "delivery of event {} (position {}) failed: {err}",
        event.event_id, event.position
    )
}
