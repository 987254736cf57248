//! Outbox relay: drains unpublished rows onto the event bus, oldest
//! first, marking each published only after a successful publish.
//! At-least-once delivery; consumers dedupe on the event id.

use crate::domain::ports::Clock;
use crate::domain::repositories::OutboxRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, warn};

const DEFAULT_BATCH: usize = 100;

pub struct OutboxRelay {
    repo: Arc<dyn OutboxRepository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    batch: usize,
}

impl OutboxRelay {
    pub fn new(
        repo: Arc<dyn OutboxRepository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            repo,
            bus,
            clock,
            metrics,
            batch: DEFAULT_BATCH,
        }
    }

    /// One poll: publish pending rows in insertion order. Stops the batch
    /// at the first row that fails to mark, so per-topic ordering is never
    /// violated by skipping ahead; the row is retried on the next poll.
    pub async fn drain_once(&self) -> Result<usize> {
        let pending = self.repo.fetch_unpublished(self.batch).await?;
        self.metrics.outbox_backlog.set(pending.len() as f64);

        let mut published = 0;
        for event in pending {
            self.bus.publish(&event.topic, &event.key, event.payload.clone());
            match self.repo.mark_published(&event.id, self.clock.now()).await {
                Ok(()) => published += 1,
                Err(e) => {
                    // The publish already went out; the row stays pending
                    // and will be republished. Consumers dedupe by id.
                    warn!(
                        "OutboxRelay: failed to mark {} published: {:#}",
                        event.id, e
                    );
                    break;
                }
            }
        }
        Ok(published)
    }

    /// Poll loop. A panicking drain is caught and the loop continues.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let relay = Arc::clone(&self);
            let outcome = std::panic::AssertUnwindSafe(async move {
                relay.drain_once().await
            })
            .catch_unwind()
            .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("OutboxRelay: drain failed: {:#}", e),
                Err(_) => error!("OutboxRelay: drain panicked; continuing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outbox::{OutboxEvent, topics};
    use crate::infrastructure::mock::ManualClock;
    use crate::infrastructure::repositories::in_memory::InMemoryOutboxRepository;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn fixture() -> (Arc<InMemoryOutboxRepository>, EventBus, OutboxRelay) {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap(),
        ));
        let repo = Arc::new(InMemoryOutboxRepository::new());
        let bus = EventBus::default();
        let relay = OutboxRelay::new(
            repo.clone(),
            bus.clone(),
            clock,
            Metrics::new().unwrap(),
        );
        (repo, bus, relay)
    }

    #[tokio::test]
    async fn test_drain_publishes_in_order_and_marks() {
        let (repo, bus, relay) = fixture();
        let mut rx = bus.subscribe();

        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 4, 0, 0).unwrap();
        for i in 0..3 {
            repo.enqueue(&OutboxEvent::new(
                t0 + chrono::Duration::seconds(i),
                topics::ORDER,
                json!({"symbol": "NIFTY", "seq": i}),
            ))
            .await
            .unwrap();
        }

        assert_eq!(relay.drain_once().await.unwrap(), 3);
        for i in 0..3 {
            let ev = rx.recv().await.unwrap();
            assert_eq!(ev.payload["seq"], i);
        }

        // All marked; nothing left to drain.
        assert_eq!(relay.drain_once().await.unwrap(), 0);
        assert!(repo.fetch_unpublished(10).await.unwrap().is_empty());
    }

    /// A relay dying between publish and mark leaves the row unpublished;
    /// the next incarnation republishes the same event id.
    #[tokio::test]
    async fn test_unmarked_row_is_republished_after_restart() {
        let (repo, bus, relay) = fixture();
        let mut rx = bus.subscribe();

        let event = OutboxEvent::new(
            Utc.with_ymd_and_hms(2026, 7, 29, 4, 0, 0).unwrap(),
            topics::ADVICE,
            json!({"id": "a-1"}),
        );
        repo.enqueue(&event).await.unwrap();
        relay.drain_once().await.unwrap();
        let first = rx.recv().await.unwrap();

        // "Restart": a fresh store still carrying the unpublished row.
        let (repo2, bus2, relay2) = fixture();
        let mut rx2 = bus2.subscribe();
        repo2.enqueue(&event).await.unwrap();
        relay2.drain_once().await.unwrap();
        let second = rx2.recv().await.unwrap();

        // Same event id both times: consumers dedupe on it.
        assert_eq!(first.payload["id"], second.payload["id"]);
        assert!(repo2.fetch_unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_drain_is_zero() {
        let (_repo, _bus, relay) = fixture();
        assert_eq!(relay.drain_once().await.unwrap(), 0);
    }
}
