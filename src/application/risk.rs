//! Per-intent risk gate plus the trading circuit breaker and the rolling
//! order-rate counter. Checks run in a fixed order; the first failure wins
//! and is written to the audit trail as a breached risk event.

use crate::domain::errors::{EngineError, EngineResult, ErrorKind};
use crate::domain::market_hours;
use crate::domain::ports::{Clock, FastStateStore};
use crate::domain::repositories::RiskRepository;
use crate::domain::risk::{CircuitState, OrderIntent, RiskConfig, RiskEvent, RiskSnapshot};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

const ORDERS_PER_MIN_KEY: &str = "tf:risk:opm";
const ORDER_RATE_WINDOW: Duration = Duration::from_secs(60);
const LOTS_USED_KEY: &str = "tf:risk:lots";
const PNL_TODAY_KEY: &str = "tf:risk:pnl";
/// Consecutive broker-error seconds that trip the circuit.
const BROKER_ERROR_TRIP_SECS: i64 = 30;

pub struct RiskService {
    repo: Arc<dyn RiskRepository>,
    kv: Arc<dyn FastStateStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    kill_switch_open_new: RwLock<bool>,
    circuit: RwLock<CircuitState>,
    /// IST day the circuit state belongs to; it resets at IST midnight.
    circuit_day: RwLock<String>,
    broker_errors_since: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl RiskService {
    pub fn new(
        repo: Arc<dyn RiskRepository>,
        kv: Arc<dyn FastStateStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        let now = clock.now();
        Self {
            repo,
            kv,
            metrics,
            kill_switch_open_new: RwLock::new(false),
            circuit: RwLock::new(CircuitState::closed(now)),
            circuit_day: RwLock::new(market_hours::ist_day_key(now)),
            broker_errors_since: RwLock::new(None),
            clock,
        }
    }

    async fn config(&self) -> RiskConfig {
        match self.repo.current_config().await {
            Ok(Some(config)) => config,
            _ => RiskConfig::defaults(self.clock.now()),
        }
    }

    pub async fn update_config(&self, config: RiskConfig) -> Result<()> {
        // Hot reload: the next gate call reads the new row.
        self.repo.save_config(&config).await
    }

    pub async fn set_kill_switch(&self, open_new_blocked: bool) {
        *self.kill_switch_open_new.write().await = open_new_blocked;
        warn!("RiskService: kill switch open-new = {}", open_new_blocked);
    }

    /// Daily key for per-day counters, so state rolls at IST midnight.
    fn day_suffix(&self) -> String {
        market_hours::ist_day_key(self.clock.now())
    }

    async fn counter(&self, base: &str) -> i64 {
        let key = format!("{}:{}", base, self.day_suffix());
        self.kv
            .get(&key)
            .await
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
    }

    /// Record an order placement in the rolling 60 s window.
    pub async fn note_order_placed(&self) {
        self.kv
            .incr(ORDERS_PER_MIN_KEY, Some(ORDER_RATE_WINDOW))
            .await;
    }

    /// Record consumed lots for the day.
    pub async fn note_lots_used(&self, lots: u32) {
        let key = format!("{}:{}", LOTS_USED_KEY, self.day_suffix());
        for _ in 0..lots {
            self.kv.incr(&key, None).await;
        }
    }

    /// Record realized P&L (paise-accurate) for the day; losses trip the
    /// daily circuit once the budget is gone.
    pub async fn note_realized_pnl(&self, delta: Decimal) {
        let key = format!("{}:{}", PNL_TODAY_KEY, self.day_suffix());
        let current = self
            .kv
            .get(&key)
            .await
            .and_then(|v| v.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let next = current + delta;
        self.kv.put(&key, &next.to_string(), None).await;

        let config = self.config().await;
        if config.max_daily_loss > Decimal::ZERO && next <= -config.max_daily_loss {
            self.trip_circuit("daily loss budget exhausted").await;
        }
    }

    /// Record a broker-call outcome; a sustained error streak trips the
    /// circuit.
    pub async fn note_broker_call(&self, ok: bool) {
        let now = self.clock.now();
        let mut since = self.broker_errors_since.write().await;
        if ok {
            *since = None;
            return;
        }
        match *since {
            None => *since = Some(now),
            Some(start) if (now - start).num_seconds() >= BROKER_ERROR_TRIP_SECS => {
                drop(since);
                self.trip_circuit("sustained broker errors").await;
            }
            Some(_) => {}
        }
    }

    pub async fn trip_circuit(&self, reason: &str) {
        let now = self.clock.now();
        let mut circuit = self.circuit.write().await;
        if !circuit.tripped {
            warn!("RiskService: circuit TRIPPED ({})", reason);
            *circuit = CircuitState::tripped(now, reason);
            self.metrics.circuit_tripped.set(1.0);
        }
    }

    /// Manual reset; also invoked implicitly at IST midnight.
    pub async fn reset_circuit(&self) {
        let now = self.clock.now();
        *self.circuit.write().await = CircuitState::closed(now);
        *self.broker_errors_since.write().await = None;
        self.metrics.circuit_tripped.set(0.0);
        info!("RiskService: circuit reset");
    }

    pub async fn get_circuit_state(&self) -> CircuitState {
        // Midnight-IST rollover clears the previous day's trip.
        let today = self.day_suffix();
        {
            let day = self.circuit_day.read().await;
            if *day == today {
                return self.circuit.read().await.clone();
            }
        }
        let mut day = self.circuit_day.write().await;
        if *day != today {
            *day = today;
            drop(day);
            self.reset_circuit().await;
        }
        self.circuit.read().await.clone()
    }

    /// Build, persist and return the current risk snapshot.
    pub async fn refresh_snapshot(&self) -> Result<RiskSnapshot> {
        let now = self.clock.now();
        let config = self.config().await;
        let circuit = self.get_circuit_state().await;

        let pnl = self
            .kv
            .get(&format!("{}:{}", PNL_TODAY_KEY, self.day_suffix()))
            .await
            .and_then(|v| v.parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO);
        let daily_loss_abs = (-pnl).max(Decimal::ZERO);
        let daily_loss_pct = if config.max_daily_loss > Decimal::ZERO {
            (daily_loss_abs / config.max_daily_loss * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let budget_left = (config.max_daily_loss - daily_loss_abs).max(Decimal::ZERO);

        let lots_used = self.counter(LOTS_USED_KEY).await as u32;
        let orders_per_min = self
            .kv
            .get(ORDERS_PER_MIN_KEY)
            .await
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0) as u32;

        let snapshot = RiskSnapshot {
            as_of: now,
            risk_headroom_ok: config.enabled
                && !circuit.tripped
                && daily_loss_pct < 100.0
                && lots_used < config.lots_cap,
            kill_switch_open_new: *self.kill_switch_open_new.read().await,
            circuit_breaker_lockout: circuit.tripped,
            daily_circuit_tripped: circuit.tripped,
            realized_pnl_today: pnl,
            daily_loss_abs,
            daily_loss_pct,
            risk_budget_left: budget_left,
            lots_used,
            lots_cap: config.lots_cap,
            orders_per_min,
            orders_per_min_pct: if config.orders_per_min_cap > 0 {
                orders_per_min as f64 / config.orders_per_min_cap as f64 * 100.0
            } else {
                0.0
            },
            minutes_since_last_sl: None,
            restrikes_today: 0,
        };
        self.repo.save_snapshot(&snapshot).await?;
        Ok(snapshot)
    }

    pub async fn get_summary(&self) -> Result<RiskSnapshot> {
        match self.repo.latest_snapshot().await? {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh_snapshot().await,
        }
    }

    async fn block(
        &self,
        intent: &OrderIntent,
        err: EngineError,
        value: f64,
    ) -> EngineError {
        let kind = err.kind();
        let event = RiskEvent::breach(
            self.clock.now(),
            kind,
            err.to_string(),
            intent.order_ref.clone().or_else(|| Some(intent.symbol.clone())),
            value,
        );
        if let Err(e) = self.repo.append_event(&event).await {
            warn!("RiskService: failed to write risk event: {:#}", e);
        }
        let kind_label = kind.to_string();
        self.metrics
            .risk_blocks_total
            .with_label_values(&[kind_label.as_str()])
            .inc();
        warn!("RiskService: BLOCKED {} ({})", intent.symbol, err);
        err
    }

    /// The gate. Checks run in order; the first failure is recorded and
    /// returned. A pass writes a non-breached event before the caller
    /// touches the broker.
    pub async fn check_order(&self, intent: &OrderIntent) -> EngineResult<()> {
        let config = self.config().await;
        let snapshot = self.refresh_snapshot().await.map_err(EngineError::Internal)?;

        // 1. Risk engine enabled.
        if !config.enabled {
            return Err(self.block(intent, EngineError::RiskDisabled, 0.0).await);
        }

        // 2. Kill switch for new-open intents.
        if intent.is_new_open && snapshot.kill_switch_open_new {
            return Err(self.block(intent, EngineError::KillSwitch, 0.0).await);
        }

        // 3. Circuit lockout.
        if snapshot.circuit_breaker_lockout || snapshot.daily_circuit_tripped {
            let reason = self
                .circuit
                .read()
                .await
                .reason
                .clone()
                .unwrap_or_else(|| "tripped".to_string());
            return Err(self
                .block(intent, EngineError::CircuitLockout { reason }, 1.0)
                .await);
        }

        // 4. Daily loss.
        if snapshot.daily_loss_pct >= 100.0 {
            let loss_pct = snapshot.daily_loss_pct;
            return Err(self
                .block(intent, EngineError::DailyLossBreach { loss_pct }, loss_pct)
                .await);
        }

        // 5. Per-order risk against the remaining budget.
        let order_risk = intent.notional * config.per_order_risk_pct / Decimal::from(100);
        if order_risk > snapshot.risk_budget_left {
            let err = EngineError::PerOrderRisk {
                required: order_risk.round_dp(2).to_string(),
                left: snapshot.risk_budget_left.round_dp(2).to_string(),
            };
            return Err(self
                .block(intent, err, order_risk.to_f64().unwrap_or(0.0))
                .await);
        }

        // 6. Lots cap.
        if snapshot.lots_used + intent.lots > config.lots_cap {
            let err = EngineError::LotsCap {
                used: snapshot.lots_used,
                requested: intent.lots,
                cap: config.lots_cap,
            };
            return Err(self
                .block(intent, err, (snapshot.lots_used + intent.lots) as f64)
                .await);
        }

        // 7. Order rate.
        if snapshot.orders_per_min + 1 > config.orders_per_min_cap {
            let err = EngineError::RateLimit {
                current: snapshot.orders_per_min + 1,
                cap: config.orders_per_min_cap,
            };
            return Err(self
                .block(intent, err, (snapshot.orders_per_min + 1) as f64)
                .await);
        }

        let pass = RiskEvent::pass(
            self.clock.now(),
            intent.order_ref.clone().or_else(|| Some(intent.symbol.clone())),
        );
        self.repo
            .append_event(&pass)
            .await
            .map_err(EngineError::Internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use crate::infrastructure::mock::ManualClock;
    use crate::infrastructure::repositories::in_memory::InMemoryRiskRepository;
    use chrono::TimeZone;
    use chrono::Utc;

    struct Fixture {
        clock: Arc<ManualClock>,
        repo: Arc<InMemoryRiskRepository>,
        service: RiskService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap(),
        ));
        let repo = Arc::new(InMemoryRiskRepository::new());
        let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
        let service = RiskService::new(repo.clone(), kv, clock.clone(), Metrics::new().unwrap());
        Fixture {
            clock,
            repo,
            service,
        }
    }

    fn intent(notional: i64, lots: u32) -> OrderIntent {
        OrderIntent {
            symbol: "NIFTY24500CE".to_string(),
            notional: Decimal::from(notional),
            lots,
            is_new_open: true,
            order_ref: None,
        }
    }

    async fn save_config(f: &Fixture, mutate: impl FnOnce(&mut RiskConfig)) {
        let mut config = RiskConfig::defaults(f.clock.now());
        mutate(&mut config);
        f.repo.save_config(&config).await.unwrap();
    }

    #[tokio::test]
    async fn test_pass_writes_non_breached_event() {
        let f = fixture();
        f.service.check_order(&intent(1000, 1)).await.unwrap();

        let events = f
            .repo
            .events_since(f.clock.now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].breached);
    }

    #[tokio::test]
    async fn test_disabled_blocks_first() {
        let f = fixture();
        save_config(&f, |c| c.enabled = false).await;

        let err = f.service.check_order(&intent(1000, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RiskDisabled);

        let events = f
            .repo
            .events_since(f.clock.now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        let breaches: Vec<_> = events.iter().filter(|e| e.breached).collect();
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].event_type, ErrorKind::RiskDisabled);
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_new_open_only() {
        let f = fixture();
        f.service.set_kill_switch(true).await;

        let err = f.service.check_order(&intent(1000, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KillSwitch);

        let mut closing = intent(1000, 1);
        closing.is_new_open = false;
        assert!(f.service.check_order(&closing).await.is_ok());
    }

    #[tokio::test]
    async fn test_circuit_lockout_blocks() {
        let f = fixture();
        f.service.trip_circuit("manual").await;
        let err = f.service.check_order(&intent(1000, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitLockout);
    }

    #[tokio::test]
    async fn test_daily_loss_breach_blocks() {
        let f = fixture();
        // Budget 25k; lose it all.
        f.service.note_realized_pnl(Decimal::from(-25_000)).await;
        let err = f.service.check_order(&intent(1000, 1)).await.unwrap_err();
        // Losing the full budget also trips the circuit, which outranks
        // the daily-loss check.
        assert_eq!(err.kind(), ErrorKind::CircuitLockout);
    }

    #[tokio::test]
    async fn test_daily_loss_pct_without_trip() {
        let f = fixture();
        f.service.note_realized_pnl(Decimal::from(-20_000)).await;
        let snapshot = f.service.refresh_snapshot().await.unwrap();
        assert!((snapshot.daily_loss_pct - 80.0).abs() < 1e-9);
        assert!(snapshot.risk_headroom_ok);
        assert_eq!(snapshot.risk_budget_left, Decimal::from(5_000));
    }

    #[tokio::test]
    async fn test_per_order_risk_blocks_oversized() {
        let f = fixture();
        // Budget 25k and 100% per-order risk: a 30k notional cannot pass.
        let err = f.service.check_order(&intent(30_000, 1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PerOrderRisk);
    }

    #[tokio::test]
    async fn test_lots_cap_blocks() {
        let f = fixture();
        f.service.note_lots_used(9).await;
        let err = f.service.check_order(&intent(1000, 2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LotsCap);
        assert!(f.service.check_order(&intent(1000, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_and_rolling_window() {
        let f = fixture();
        save_config(&f, |c| c.orders_per_min_cap = 3).await;

        for _ in 0..3 {
            f.service.check_order(&intent(100, 0)).await.unwrap();
            f.service.note_order_placed().await;
        }
        let err = f.service.check_order(&intent(100, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);

        // The window opened at the first increment; just past 60 s the
        // counter restarts.
        f.clock.advance(Duration::from_secs(61));
        assert!(f.service.check_order(&intent(100, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_broker_error_streak_trips_circuit() {
        let f = fixture();
        f.service.note_broker_call(false).await;
        f.clock.advance(Duration::from_secs(31));
        f.service.note_broker_call(false).await;

        let circuit = f.service.get_circuit_state().await;
        assert!(circuit.tripped);

        // A success in between resets the streak.
        f.service.reset_circuit().await;
        f.service.note_broker_call(false).await;
        f.clock.advance(Duration::from_secs(20));
        f.service.note_broker_call(true).await;
        f.clock.advance(Duration::from_secs(31));
        f.service.note_broker_call(false).await;
        assert!(!f.service.get_circuit_state().await.tripped);
    }

    #[tokio::test]
    async fn test_circuit_resets_at_ist_midnight() {
        let f = fixture();
        f.service.trip_circuit("daily loss budget exhausted").await;
        assert!(f.service.get_circuit_state().await.tripped);

        // 19:00 UTC is past IST midnight (00:30 next IST day).
        f.clock
            .set(Utc.with_ymd_and_hms(2026, 7, 29, 19, 0, 0).unwrap());
        assert!(!f.service.get_circuit_state().await.tripped);
    }
}
