//! The engine loop: a fixed-cadence tick that refreshes market state,
//! generates advices, and executes surviving ones inside market hours and
//! circuit constraints. One logical worker; a tick that overruns its
//! cadence simply absorbs the missed firings.

use crate::application::advice::AdviceService;
use crate::application::decision::DecisionService;
use crate::application::market_data::MarketDataService;
use crate::application::risk::RiskService;
use crate::application::sentiment::SentimentService;
use crate::domain::market_hours;
use crate::domain::outbox::topics;
use crate::domain::ports::Clock;
use crate::domain::repositories::AdviceRepository;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_ms: u64,
    pub max_exec_per_tick: usize,
    pub scan_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 2000,
            max_exec_per_tick: 3,
            scan_limit: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    Stopped,
}

pub struct EngineLoop {
    market_data: Arc<MarketDataService>,
    decision: Arc<DecisionService>,
    risk: Arc<RiskService>,
    sentiment: Arc<SentimentService>,
    advice: Arc<AdviceService>,
    advices: Arc<dyn AdviceRepository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: EngineConfig,
    running: AtomicBool,
    ticks: AtomicU64,
    executed_total: AtomicU64,
    last_error: tokio::sync::RwLock<Option<String>>,
}

impl EngineLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market_data: Arc<MarketDataService>,
        decision: Arc<DecisionService>,
        risk: Arc<RiskService>,
        sentiment: Arc<SentimentService>,
        advice: Arc<AdviceService>,
        advices: Arc<dyn AdviceRepository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: EngineConfig,
    ) -> Self {
        Self {
            market_data,
            decision,
            risk,
            sentiment,
            advice,
            advices,
            bus,
            clock,
            metrics,
            config,
            running: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            executed_total: AtomicU64::new(0),
            last_error: tokio::sync::RwLock::new(None),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("EngineLoop: started");
        }
    }

    /// Cooperative stop: the in-flight tick completes; the next firing
    /// observes the flag and returns.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("EngineLoop: stopped");
        }
    }

    pub fn state(&self) -> EngineState {
        if self.running.load(Ordering::SeqCst) {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    async fn set_last_error(&self, error: Option<String>) {
        *self.last_error.write().await = error;
    }

    /// One tick of the decision/execution pipeline.
    pub async fn tick(&self) {
        if self.state() == EngineState::Stopped {
            return;
        }
        let now = self.clock.now();
        if !market_hours::is_market_open(now) {
            debug!("EngineLoop: market closed, tick skipped");
            self.metrics
                .engine_ticks_total
                .with_label_values(&["skipped"])
                .inc();
            return;
        }

        let snapshot = match self.risk.refresh_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("EngineLoop: risk snapshot failed: {:#}", e);
                self.set_last_error(Some(format!("risk snapshot: {}", e))).await;
                self.metrics
                    .engine_ticks_total
                    .with_label_values(&["error"])
                    .inc();
                return;
            }
        };
        if snapshot.circuit_breaker_lockout || snapshot.daily_circuit_tripped {
            let reason = "circuit breaker lockout".to_string();
            debug!("EngineLoop: {}", reason);
            self.set_last_error(Some(reason)).await;
            self.metrics
                .engine_ticks_total
                .with_label_values(&["locked"])
                .inc();
            return;
        }

        // Best-effort refreshes; failures are logged, never propagated.
        if let Err(e) = self.market_data.get_regime_now().await {
            debug!("EngineLoop: regime refresh failed: {}", e);
        }
        if let Err(e) = self.decision.generate_advice().await {
            warn!("EngineLoop: advice generation failed: {:#}", e);
        }

        // Card refreshes.
        if let Err(e) = self.risk.get_summary().await {
            debug!("EngineLoop: risk card refresh failed: {:#}", e);
        }
        if let Err(e) = self.sentiment.get_now().await {
            debug!("EngineLoop: sentiment card refresh failed: {:#}", e);
        }
        if let Err(e) = self.decision.get_quality().await {
            debug!("EngineLoop: quality card refresh failed: {:#}", e);
        }

        // Execute pending advices, newest first, capped per tick.
        let mut executed = 0usize;
        match self.advices.find_pending(self.config.scan_limit).await {
            Ok(pending) => {
                for advice in pending {
                    if executed >= self.config.max_exec_per_tick {
                        break;
                    }
                    match self.advice.execute(&advice.id).await {
                        Ok(_) => executed += 1,
                        Err(e) => {
                            warn!("EngineLoop: execute {} failed: {}", advice.id, e);
                            self.set_last_error(Some(format!("execute: {}", e))).await;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("EngineLoop: pending scan failed: {:#}", e);
                self.set_last_error(Some(format!("scan: {}", e))).await;
            }
        }

        let tick_count = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let executed_total = self
            .executed_total
            .fetch_add(executed as u64, Ordering::SeqCst)
            + executed as u64;
        self.metrics
            .engine_ticks_total
            .with_label_values(&["ok"])
            .inc();

        self.bus.publish(
            topics::ENGINE_STATE,
            "engine",
            json!({
                "as_of": now.to_rfc3339(),
                "state": "RUNNING",
                "ticks": tick_count,
                "executed_this_tick": executed,
                "executed_total": executed_total,
                "last_error": self.last_error().await,
            }),
        );
    }

    /// Cadenced loop. `Skip` missed-tick behavior keeps the engine
    /// non-reentrant: a long tick swallows the firings it overlapped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = time::interval(Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}
