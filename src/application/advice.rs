//! Advice lifecycle: execution against the orders service, benign
//! DUPLICATE replays, bounded retries with exponential backoff, and the
//! periodic expiry sweeper.

use crate::application::orders::OrdersService;
use crate::domain::advice::{Advice, AdviceStatus};
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::order::PlaceOrderRequest;
use crate::domain::outbox::{OutboxEvent, topics};
use crate::domain::ports::Clock;
use crate::domain::repositories::{AdviceRepository, OutboxRepository};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use futures_util::future::BoxFuture;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Retry delays by attempt: 1 s, 4 s, 16 s.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(4),
    Duration::from_secs(16),
];

/// Erased re-execution future. The indirection keeps the retry task's
/// type out of `execute`'s own future, which would otherwise be cyclic.
fn execute_erased(
    service: Arc<AdviceService>,
    advice_id: String,
) -> BoxFuture<'static, EngineResult<Advice>> {
    Box::pin(async move { service.execute(&advice_id).await })
}

fn schedule_retry(service: Arc<AdviceService>, advice_id: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = execute_erased(service, advice_id.clone()).await {
            warn!("AdviceService: retry of {} failed: {}", advice_id, e);
        }
    });
}

#[derive(Debug, Clone)]
pub struct AdviceConfig {
    pub slippage_guard_enabled: bool,
}

impl Default for AdviceConfig {
    fn default() -> Self {
        Self {
            slippage_guard_enabled: true,
        }
    }
}

pub struct AdviceService {
    repo: Arc<dyn AdviceRepository>,
    orders: Arc<OrdersService>,
    outbox: Arc<dyn OutboxRepository>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: AdviceConfig,
}

impl AdviceService {
    pub fn new(
        repo: Arc<dyn AdviceRepository>,
        orders: Arc<OrdersService>,
        outbox: Arc<dyn OutboxRepository>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: AdviceConfig,
    ) -> Self {
        Self {
            repo,
            orders,
            outbox,
            clock,
            metrics,
            config,
        }
    }

    fn request_from(advice: &Advice) -> PlaceOrderRequest {
        PlaceOrderRequest {
            instrument_token: advice.instrument_token.clone(),
            symbol: advice.symbol.clone(),
            txn_type: advice.txn_type,
            order_type: advice.order_type,
            quantity: advice.qty,
            product: advice.product,
            validity: advice.validity,
            price: advice.price,
            trigger_price: advice.trigger_price,
            is_amo: advice.is_amo,
            slice: false,
            tag: advice.tag.clone(),
            disclosed_quantity: None,
            advice_id: Some(advice.id.clone()),
        }
    }

    async fn emit(&self, event: &str, advice: &Advice) {
        let row = OutboxEvent::new(
            self.clock.now(),
            topics::ADVICE,
            json!({
                "event": event,
                "id": advice.id,
                "symbol": advice.symbol,
                "instrument_token": advice.instrument_token,
                "status": advice.status.to_string(),
                "txn_type": advice.txn_type.to_string(),
                "qty": advice.qty,
                "broker_order_id": advice.broker_order_id,
                "retry_count": advice.retry_count,
                "last_error": advice.last_error,
            }),
        );
        if let Err(e) = self.outbox.enqueue(&row).await {
            warn!("AdviceService: failed to enqueue {}: {:#}", event, e);
        }
        self.metrics.advices_total.with_label_values(&[event]).inc();
    }

    async fn fail_advice(
        self: &Arc<Self>,
        mut advice: Advice,
        err: &EngineError,
    ) -> EngineResult<Advice> {
        let now = self.clock.now();
        advice.retry_count += 1;
        advice.last_error = Some(format!("{}: {}", err.kind(), err));
        advice.transition(AdviceStatus::Failed, now)?;

        if advice.can_retry() {
            // Requeue for the scanner and schedule a direct retry with
            // backoff; a replay that races the scanner resolves to a
            // benign DUPLICATE at the orders layer.
            advice.transition(AdviceStatus::Pending, now)?;
            let delay = RETRY_BACKOFF
                [((advice.retry_count as usize).saturating_sub(1)).min(RETRY_BACKOFF.len() - 1)];
            schedule_retry(Arc::clone(self), advice.id.clone(), delay);
            info!(
                "AdviceService: {} failed ({}), retry {} in {:?}",
                advice.id, advice.last_error.as_deref().unwrap_or("?"), advice.retry_count, delay
            );
        } else {
            info!(
                "AdviceService: {} terminally failed ({})",
                advice.id,
                advice.last_error.as_deref().unwrap_or("?")
            );
        }

        self.repo.update(&advice).await?;
        self.emit("advice.failed", &advice).await;
        Ok(advice)
    }

    /// Execute one advice. Terminal or expired advices are a no-op; a
    /// DUPLICATE from the idempotency layer is treated as a replayed
    /// success.
    pub async fn execute(self: &Arc<Self>, advice_id: &str) -> EngineResult<Advice> {
        let now = self.clock.now();
        let Some(mut advice) = self.repo.get(advice_id).await? else {
            return Err(EngineError::not_found(format!("advice {}", advice_id)));
        };

        if advice.is_terminal() {
            return Ok(advice);
        }
        if advice.is_expired(now) {
            advice.transition(AdviceStatus::Expired, now)?;
            self.repo.update(&advice).await?;
            self.emit("advice.expired", &advice).await;
            return Ok(advice);
        }
        if !matches!(
            advice.status,
            AdviceStatus::Pending | AdviceStatus::Validated | AdviceStatus::Queued
        ) {
            return Ok(advice);
        }

        if self.config.slippage_guard_enabled
            && !self
                .orders
                .preflight_slippage_guard(&advice.instrument_token)
                .await
        {
            let err = EngineError::WideSpread {
                spread_pct: 0.0,
                max_pct: 0.0,
            };
            let mut failed = self.fail_advice(advice, &err).await?;
            failed.last_error = Some("WIDE_SPREAD".to_string());
            self.repo.update(&failed).await?;
            return Ok(failed);
        }

        if advice.status == AdviceStatus::Pending {
            advice.transition(AdviceStatus::Validated, now)?;
            self.repo.update(&advice).await?;
        }

        let request = Self::request_from(&advice);
        let started = std::time::Instant::now();
        match self.orders.place_order(&request).await {
            Ok(response) => {
                advice.broker_order_id = response.order_ids.first().cloned();
                advice.execution_price = advice.price;
                advice.execution_latency_ms = Some(started.elapsed().as_millis() as i64);
                advice.transition(AdviceStatus::Executed, now)?;
                self.repo.update(&advice).await?;
                self.emit("advice.executed", &advice).await;
                info!(
                    "AdviceService: executed {} -> order {}",
                    advice.id,
                    advice.broker_order_id.as_deref().unwrap_or("?")
                );
                Ok(advice)
            }
            // An identical intent already went through inside the
            // idempotency window: replayed success, not a failure.
            Err(EngineError::Duplicate) => {
                if advice.broker_order_id.is_some() {
                    return Ok(advice);
                }
                advice.transition(AdviceStatus::Executed, now)?;
                self.repo.update(&advice).await?;
                self.emit("advice.executed", &advice).await;
                Ok(advice)
            }
            Err(err) => self.fail_advice(advice, &err).await,
        }
    }

    /// Mark overdue awaiting advices expired. Runs on its own cadence.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let expirable = self.repo.find_expirable(now).await?;
        let count = expirable.len();
        for mut advice in expirable {
            if advice.transition(AdviceStatus::Expired, now).is_ok() {
                self.repo.update(&advice).await?;
                self.emit("advice.expired", &advice).await;
            }
        }
        if count > 0 {
            info!("AdviceService: expired {} advices", count);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::orders::OrdersConfig;
    use crate::application::risk::RiskService;
    use crate::domain::types::TxnType;
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use crate::infrastructure::mock::{FailureMode, ManualClock, MockBrokerGateway};
    use crate::infrastructure::repositories::in_memory::{
        InMemoryAdviceRepository, InMemoryOrderRepository, InMemoryOutboxRepository,
        InMemoryRiskRepository,
    };
    use chrono::{TimeZone, Utc};

    struct Fixture {
        clock: Arc<ManualClock>,
        gateway: Arc<MockBrokerGateway>,
        advices: Arc<InMemoryAdviceRepository>,
        outbox: Arc<InMemoryOutboxRepository>,
        service: Arc<AdviceService>,
    }

    fn fixture(slippage_guard: bool) -> Fixture {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap(),
        ));
        let gateway = Arc::new(MockBrokerGateway::new());
        let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
        let metrics = Metrics::new().unwrap();
        let risk = Arc::new(RiskService::new(
            Arc::new(InMemoryRiskRepository::new()),
            kv.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        let orders = Arc::new(OrdersService::new(
            gateway.clone(),
            risk,
            kv,
            Arc::new(InMemoryOrderRepository::new()),
            outbox.clone(),
            clock.clone(),
            metrics.clone(),
            OrdersConfig::default(),
        ));
        let advices = Arc::new(InMemoryAdviceRepository::new());
        let service = Arc::new(AdviceService::new(
            advices.clone(),
            orders,
            outbox.clone(),
            clock.clone(),
            metrics,
            AdviceConfig {
                slippage_guard_enabled: slippage_guard,
            },
        ));
        Fixture {
            clock,
            gateway,
            advices,
            outbox,
            service,
        }
    }

    async fn seed_advice(f: &Fixture) -> Advice {
        let advice = Advice::new(
            f.clock.now(),
            "NIFTY24500CE",
            "NSE_FO|54321",
            TxnType::Buy,
            75,
            "pcr-blend",
            "test advice",
        );
        f.advices.insert(&advice).await.unwrap();
        advice
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let f = fixture(false);
        let advice = seed_advice(&f).await;

        let executed = f.service.execute(&advice.id).await.unwrap();
        assert_eq!(executed.status, AdviceStatus::Executed);
        assert!(executed.broker_order_id.is_some());
        assert!(executed.execution_latency_ms.is_some());

        // advice.executed row alongside the order.placed row.
        let rows = f.outbox.fetch_unpublished(10).await.unwrap();
        let topics_seen: Vec<&str> = rows.iter().map(|r| r.topic.as_str()).collect();
        assert!(topics_seen.contains(&topics::ORDER));
        assert!(topics_seen.contains(&topics::ADVICE));
    }

    #[tokio::test]
    async fn test_execute_twice_is_idempotent() {
        let f = fixture(false);
        let advice = seed_advice(&f).await;

        let first = f.service.execute(&advice.id).await.unwrap();
        let second = f.service.execute(&advice.id).await.unwrap();

        assert_eq!(first.status, AdviceStatus::Executed);
        assert_eq!(second.status, AdviceStatus::Executed);
        assert_eq!(first.broker_order_id, second.broker_order_id);
        // Exactly one broker order despite the replay.
        assert_eq!(f.gateway.placed_orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_advice_is_marked_not_executed() {
        let f = fixture(false);
        let mut advice = seed_advice(&f).await;
        advice.expires_at = Some(f.clock.now() - chrono::Duration::seconds(1));
        f.advices.update(&advice).await.unwrap();

        let result = f.service.execute(&advice.id).await.unwrap();
        assert_eq!(result.status, AdviceStatus::Expired);
        assert!(f.gateway.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_broker_failure_requeues_with_retry_budget() {
        let f = fixture(false);
        let advice = seed_advice(&f).await;
        f.gateway.fail_next_place(FailureMode::BrokerError).await;

        let failed = f.service.execute(&advice.id).await.unwrap();
        // Retryable failure: counted, re-queued as PENDING.
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.status, AdviceStatus::Pending);
        assert!(failed.last_error.as_deref().unwrap().contains("BROKER_ERROR"));
    }

    #[tokio::test]
    async fn test_retries_exhaust_to_terminal_failed() {
        let f = fixture(false);
        let mut advice = seed_advice(&f).await;
        advice.retry_count = 2;
        f.advices.update(&advice).await.unwrap();
        f.gateway.fail_next_place(FailureMode::BrokerError).await;

        let failed = f.service.execute(&advice.id).await.unwrap();
        assert_eq!(failed.status, AdviceStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert!(failed.is_terminal());

        // Executing a terminal advice is a no-op.
        let again = f.service.execute(&advice.id).await.unwrap();
        assert_eq!(again.status, AdviceStatus::Failed);
    }

    #[tokio::test]
    async fn test_wide_spread_fails_with_marker() {
        let f = fixture(true);
        let advice = seed_advice(&f).await;
        // 2% book: guard rejects.
        f.gateway
            .set_bid_ask("NSE_FO|54321", rust_decimal_macros::dec!(99), rust_decimal_macros::dec!(101))
            .await;

        let failed = f.service.execute(&advice.id).await.unwrap();
        assert_eq!(failed.last_error.as_deref(), Some("WIDE_SPREAD"));
        assert_eq!(failed.retry_count, 1);
        assert!(f.gateway.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_expires_overdue() {
        let f = fixture(false);
        let mut a = seed_advice(&f).await;
        a.expires_at = Some(f.clock.now() + chrono::Duration::minutes(10));
        f.advices.update(&a).await.unwrap();
        let mut b = seed_advice(&f).await;
        b.expires_at = Some(f.clock.now() + chrono::Duration::minutes(10));
        f.advices.update(&b).await.unwrap();

        // Nothing due yet.
        assert_eq!(f.service.sweep_expired().await.unwrap(), 0);

        f.clock.advance(Duration::from_secs(11 * 60));
        assert_eq!(f.service.sweep_expired().await.unwrap(), 2);
        assert_eq!(
            f.advices
                .count_by_status(AdviceStatus::Expired)
                .await
                .unwrap(),
            2
        );

        // Idempotent.
        assert_eq!(f.service.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_advice_not_found() {
        let f = fixture(false);
        assert!(matches!(
            f.service.execute("missing").await,
            Err(EngineError::NotFound { .. })
        ));
    }
}
