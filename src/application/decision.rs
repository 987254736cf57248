//! Decision making: blends regime, sentiment and momentum under
//! per-strategy weights, consults the PCR template, and emits gated
//! `Advice` records. A daily pass nudges the weights of underperforming
//! strategies and parks A/B variants in the KV store.

use crate::application::market_data::MarketDataService;
use crate::application::option_chain::OptionChainAnalyticsService;
use crate::application::risk::RiskService;
use crate::domain::advice::Advice;
use crate::domain::market::Timeframe;
use crate::domain::market_hours;
use crate::domain::option_chain::{LiquidityMetrics, OptionChainAnalytics, OptionType};
use crate::domain::outbox::{OutboxEvent, topics};
use crate::domain::ports::{BrokerGateway, Clock, FastStateStore};
use crate::domain::repositories::{AdviceRepository, SentimentRepository, SignalRepository};
use crate::domain::signal::{MarketSignalRecord, SignalTemplate, TradingSignal};
use crate::domain::types::{RiskCategory, TxnType};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Relative weights of the three decision inputs. Always normalised so
/// `ws + wr + wm = 1` within rounding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeights {
    /// Sentiment weight.
    pub ws: f64,
    /// Regime weight.
    pub wr: f64,
    /// Momentum weight.
    pub wm: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            ws: 0.40,
            wr: 0.35,
            wm: 0.25,
        }
    }
}

impl StrategyWeights {
    /// Boost sentiment by 10% (capped), shrink regime by 10%, and give
    /// momentum the remainder (floored at zero).
    pub fn boosted(&self) -> Self {
        let ws = (self.ws * 1.10).min(1.0);
        let wr = self.wr * 0.90;
        let wm = (1.0 - ws - wr).max(0.0);
        Self { ws, wr, wm }
    }

    /// A/B variants at +/- 0.05 on the sentiment weight.
    pub fn variants(&self) -> (Self, Self) {
        let mk = |delta: f64| {
            let ws = (self.ws + delta).clamp(0.0, 1.0);
            let wr = self.wr.min(1.0 - ws);
            let wm = (1.0 - ws - wr).max(0.0);
            Self { ws, wr, wm }
        };
        (mk(0.05), mk(-0.05))
    }
}

#[derive(Debug, Clone)]
pub struct DecisionConfig {
    pub strategy: String,
    /// |score| below this produces no advice.
    pub deadband: f64,
    pub advice_ttl_minutes: i64,
    pub lot_size: i64,
    pub qty_lots: i64,
    /// NSE index strikes come in this step.
    pub strike_step: i64,
    /// Daily optimisation boosts weights below this execution accuracy.
    pub min_accuracy_for_boost: f64,
    pub accuracy_window_hours: i64,
    pub initial_weights: StrategyWeights,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            strategy: "pcr-blend".to_string(),
            deadband: 0.15,
            advice_ttl_minutes: 10,
            lot_size: 75,
            qty_lots: 1,
            strike_step: 50,
            min_accuracy_for_boost: 0.55,
            accuracy_window_hours: 24,
            initial_weights: StrategyWeights::default(),
        }
    }
}

/// Read-only card summarising recent decision outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionQuality {
    pub window_hours: i64,
    pub generated: usize,
    pub executed: usize,
    pub failed: usize,
    pub expired: usize,
    /// executed / (executed + failed); 0 with no completed outcomes.
    pub accuracy: f64,
    pub avg_priority: f64,
}

const WEIGHTS_KEY_PREFIX: &str = "decision:weights";
const VARIANT_TTL: std::time::Duration = std::time::Duration::from_secs(7 * 24 * 3600);
const OPTIMIZED_DAY_KEY: &str = "decision:optimized-day";

pub struct DecisionService {
    market_data: Arc<MarketDataService>,
    chain: Arc<OptionChainAnalyticsService>,
    gateway: Arc<dyn BrokerGateway>,
    pcr: Arc<dyn SignalTemplate>,
    sentiment_repo: Arc<dyn SentimentRepository>,
    advices: Arc<dyn AdviceRepository>,
    signals: Arc<dyn SignalRepository>,
    risk: Arc<RiskService>,
    kv: Arc<dyn FastStateStore>,
    outbox: Arc<dyn crate::domain::repositories::OutboxRepository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: DecisionConfig,
    weights: RwLock<StrategyWeights>,
}

impl DecisionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market_data: Arc<MarketDataService>,
        chain: Arc<OptionChainAnalyticsService>,
        gateway: Arc<dyn BrokerGateway>,
        pcr: Arc<dyn SignalTemplate>,
        sentiment_repo: Arc<dyn SentimentRepository>,
        advices: Arc<dyn AdviceRepository>,
        signals: Arc<dyn SignalRepository>,
        risk: Arc<RiskService>,
        kv: Arc<dyn FastStateStore>,
        outbox: Arc<dyn crate::domain::repositories::OutboxRepository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: DecisionConfig,
    ) -> Self {
        let weights = RwLock::new(config.initial_weights);
        Self {
            market_data,
            chain,
            gateway,
            pcr,
            sentiment_repo,
            advices,
            signals,
            risk,
            kv,
            outbox,
            bus,
            clock,
            metrics,
            config,
            weights,
        }
    }

    pub async fn current_weights(&self) -> StrategyWeights {
        *self.weights.read().await
    }

    /// Composite score in [-1, 1]:
    /// `ws*sentNorm + wr*regimeNorm + wm*clamp(z5/2)`.
    fn score(weights: &StrategyWeights, sentiment: f64, regime_norm: f64, z5: f64) -> f64 {
        let sentiment_norm = (sentiment - 50.0) / 50.0;
        let momentum_norm = (z5 / 2.0).clamp(-1.0, 1.0);
        weights.ws * sentiment_norm + weights.wr * regime_norm + weights.wm * momentum_norm
    }

    fn priority_bonus(atr_pct: Option<f64>, liquidity: &LiquidityMetrics) -> f64 {
        let mut bonus = 0.0;
        // Calm tape executes better.
        if let Some(atr) = atr_pct {
            if atr < 1.0 {
                bonus += 5.0;
            }
        }
        if liquidity.strikes_with_volume >= 5 {
            bonus += 5.0;
        }
        bonus
    }

    fn risk_category(confidence: f64) -> RiskCategory {
        if confidence >= 75.0 {
            RiskCategory::Low
        } else if confidence >= 50.0 {
            RiskCategory::Medium
        } else if confidence >= 25.0 {
            RiskCategory::High
        } else {
            RiskCategory::Critical
        }
    }

    /// Pick the tradeable option leg for a direction: ATM strike of the
    /// analysed expiry, CE for long bias and PE for short bias.
    async fn select_leg(
        &self,
        chain: &OptionChainAnalytics,
        ltp: Decimal,
        direction: TxnType,
    ) -> Option<(String, String)> {
        let side = match direction {
            TxnType::Buy => OptionType::Ce,
            TxnType::Sell => OptionType::Pe,
        };
        let step = Decimal::from(self.config.strike_step);
        let atm = (ltp / step).round() * step;

        let legs = self
            .gateway
            .get_option_instruments(self.market_data.instrument_key(), Some(chain.expiry))
            .await
            .ok()?;
        legs.iter()
            .filter(|l| l.option_type == side)
            .min_by_key(|l| (l.strike - atm).abs())
            .map(|l| (l.instrument_key.clone(), l.symbol.clone()))
    }

    /// One generation cycle. Returns the emitted advice, if any.
    pub async fn generate_advice(&self) -> Result<Option<Advice>> {
        let now = self.clock.now();

        let snapshot = self.risk.get_summary().await?;
        if !snapshot.risk_headroom_ok || snapshot.kill_switch_open_new {
            debug!("Decision: skipped, no risk headroom");
            return Ok(None);
        }

        let reading = match self.market_data.get_regime_now().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Decision: no regime reading ({})", e);
                return Ok(None);
            }
        };
        let z5 = reading.z.to_f64().unwrap_or(0.0);
        let sentiment = self
            .sentiment_repo
            .latest()
            .await?
            .map(|s| s.score)
            .unwrap_or(50.0);

        // PCR template over the nearest-expiry chain, priced off smart LTP.
        let underlying = self.market_data.instrument_key().to_string();
        let ltp = self.market_data.get_ltp_smart(&underlying).await.ok();
        let chain = self.chain.get_analytics_nearest(&underlying).await.ok();
        let pcr_signal: Option<TradingSignal> = match (&chain, ltp) {
            (Some(chain), Some(ltp)) => {
                let signal = self.pcr.generate_signal(chain, ltp);
                if let Some(ref s) = signal {
                    let record = MarketSignalRecord::from_signal(now, "PCR", s);
                    if let Err(e) = self.signals.save(&record).await {
                        warn!("Decision: failed to persist PCR signal: {:#}", e);
                    }
                }
                signal
            }
            _ => None,
        };

        let weights = self.current_weights().await;
        let score = Self::score(&weights, sentiment, reading.regime.as_norm(), z5);
        if score.abs() < self.config.deadband {
            debug!("Decision: score {:.3} inside deadband", score);
            return Ok(None);
        }
        let direction = if score > 0.0 {
            TxnType::Buy
        } else {
            TxnType::Sell
        };
        let confidence = (score.abs() * 100.0).clamp(0.0, 100.0);

        let (Some(chain), Some(ltp)) = (chain, ltp) else {
            debug!("Decision: no chain or price for leg selection");
            return Ok(None);
        };
        let Some((instrument_token, symbol)) = self.select_leg(&chain, ltp, direction).await
        else {
            debug!("Decision: no tradeable leg found");
            return Ok(None);
        };

        // One open advice per instrument and direction.
        // Directional advices here always BUY the chosen leg (CE for long
        // bias, PE for short); dedupe on the leg itself.
        if !self
            .advices
            .find_open_for(&instrument_token, TxnType::Buy)
            .await?
            .is_empty()
        {
            debug!("Decision: open advice exists for {}", instrument_token);
            return Ok(None);
        }

        let atr_pct = self
            .market_data
            .get_atr_pct(&underlying, Timeframe::FiveMin, 14)
            .await
            .ok()
            .and_then(|d| d.to_f64());
        let priority = (50.0 + 0.4 * confidence
            + Self::priority_bonus(atr_pct, &chain.liquidity_metrics))
        .clamp(0.0, 100.0);

        let mut advice = Advice::new(
            now,
            symbol,
            instrument_token,
            TxnType::Buy,
            self.config.qty_lots * self.config.lot_size,
            self.config.strategy.clone(),
            format!(
                "score {:.3} (sent {:.1}, regime {}, z5 {:.2}) -> {}",
                score, sentiment, reading.regime, z5, direction
            ),
        );
        advice.priority_score = priority;
        advice.risk_category = Self::risk_category(confidence);
        advice.expires_at = Some(now + Duration::minutes(self.config.advice_ttl_minutes));

        // Protective levels: template levels when it fired, else 1x/2x ATR
        // around the index entry.
        match &pcr_signal {
            Some(signal) => {
                advice.stop_loss = Some(signal.stop_loss);
                advice.take_profit = Some(signal.take_profit);
            }
            None => {
                if let Some(atr) = atr_pct {
                    let atr_abs = ltp * Decimal::from_f64(atr / 100.0).unwrap_or_default();
                    let (sl, tp) = match direction {
                        TxnType::Buy => (ltp - atr_abs, ltp + atr_abs * Decimal::from(2)),
                        TxnType::Sell => (ltp + atr_abs, ltp - atr_abs * Decimal::from(2)),
                    };
                    advice.stop_loss = Some(sl.round_dp(2));
                    advice.take_profit = Some(tp.round_dp(2));
                }
            }
        }

        self.advices.insert(&advice).await?;
        self.metrics
            .advices_total
            .with_label_values(&["advice.created"])
            .inc();
        self.outbox
            .enqueue(&OutboxEvent::new(
                now,
                topics::ADVICE,
                json!({
                    "event": "advice.created",
                    "id": advice.id,
                    "symbol": advice.symbol,
                    "instrument_token": advice.instrument_token,
                    "direction": direction.to_string(),
                    "confidence": confidence,
                    "priority": priority,
                    "strategy": advice.strategy,
                }),
            ))
            .await?;

        info!(
            "Decision: advice {} {} {} (conf {:.0}, prio {:.0})",
            advice.id, advice.txn_type, advice.symbol, confidence, priority
        );
        Ok(Some(advice))
    }

    /// Read-only decision-quality card over the accuracy window.
    pub async fn get_quality(&self) -> Result<DecisionQuality> {
        let now = self.clock.now();
        let since = now - Duration::hours(self.config.accuracy_window_hours);
        let advices = self.advices.created_since(since).await?;

        use crate::domain::advice::AdviceStatus::*;
        let executed = advices
            .iter()
            .filter(|a| matches!(a.status, Executed | PartiallyFilled | Completed))
            .count();
        let failed = advices.iter().filter(|a| a.status == Failed).count();
        let expired = advices.iter().filter(|a| a.status == Expired).count();
        let accuracy = if executed + failed > 0 {
            executed as f64 / (executed + failed) as f64
        } else {
            0.0
        };
        let avg_priority = if advices.is_empty() {
            0.0
        } else {
            advices.iter().map(|a| a.priority_score).sum::<f64>() / advices.len() as f64
        };

        Ok(DecisionQuality {
            window_hours: self.config.accuracy_window_hours,
            generated: advices.len(),
            executed,
            failed,
            expired,
            accuracy,
            avg_priority,
        })
    }

    /// Daily adaptive pass, at most once per IST day: strategies under
    /// the accuracy floor get boosted sentiment weight, and two A/B
    /// variants go to the KV store for seven days.
    pub async fn maybe_optimize_daily(&self) -> Result<bool> {
        let today = market_hours::ist_day_key(self.clock.now());
        if self.kv.get(OPTIMIZED_DAY_KEY).await.as_deref() == Some(today.as_str()) {
            return Ok(false);
        }
        self.kv.put(OPTIMIZED_DAY_KEY, &today, None).await;

        let quality = self.get_quality().await?;
        let mut weights = self.weights.write().await;
        let applied = if quality.executed + quality.failed > 0
            && quality.accuracy < self.config.min_accuracy_for_boost
        {
            let next = weights.boosted();
            info!(
                "Decision: accuracy {:.2} below {:.2}, weights {:?} -> {:?}",
                quality.accuracy, self.config.min_accuracy_for_boost, *weights, next
            );
            *weights = next;
            true
        } else {
            false
        };
        let current = *weights;
        drop(weights);

        self.kv
            .put(
                &format!("{}:{}", WEIGHTS_KEY_PREFIX, self.config.strategy),
                &serde_json::to_string(&current)?,
                None,
            )
            .await;
        let (a, b) = current.variants();
        self.kv
            .put(
                &format!("{}:{}:variant:a", WEIGHTS_KEY_PREFIX, self.config.strategy),
                &serde_json::to_string(&a)?,
                Some(VARIANT_TTL),
            )
            .await;
        self.kv
            .put(
                &format!("{}:{}:variant:b", WEIGHTS_KEY_PREFIX, self.config.strategy),
                &serde_json::to_string(&b)?,
                Some(VARIANT_TTL),
            )
            .await;

        self.bus.publish(
            topics::AUDIT,
            &self.config.strategy,
            json!({
                "kind": "decision.optimized",
                "applied_boost": applied,
                "accuracy": quality.accuracy,
                "weights": current,
            }),
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::market_data::MarketDataConfig;
    use crate::domain::repositories::OutboxRepository;
    use crate::application::signals::PcrSignalTemplate;
    use crate::domain::advice::AdviceStatus;
    use crate::domain::sentiment::{MarketSentimentSnapshot, SentimentLabel};
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use crate::infrastructure::mock::{ManualClock, MockBrokerGateway, fixtures};
    use crate::infrastructure::repositories::in_memory::{
        InMemoryAdviceRepository, InMemoryAnalyticsRepository, InMemoryCandleRepository,
        InMemoryOutboxRepository, InMemoryRiskRepository, InMemorySentimentRepository,
        InMemorySignalRepository, InMemoryTickRepository,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct Fixture {
        clock: Arc<ManualClock>,
        gateway: Arc<MockBrokerGateway>,
        sentiments: Arc<InMemorySentimentRepository>,
        advices: Arc<InMemoryAdviceRepository>,
        outbox: Arc<InMemoryOutboxRepository>,
        kv: Arc<InMemoryStateStore>,
        service: DecisionService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap(),
        ));
        let gateway = Arc::new(MockBrokerGateway::new());
        let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
        let metrics = Metrics::new().unwrap();
        let bus = EventBus::default();
        let market_data = Arc::new(MarketDataService::new(
            gateway.clone(),
            kv.clone(),
            Arc::new(InMemoryCandleRepository::new()),
            Arc::new(InMemoryTickRepository::new()),
            Arc::new(InMemorySignalRepository::new()),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            MarketDataConfig::default(),
        ));
        let chain = Arc::new(OptionChainAnalyticsService::new(
            gateway.clone(),
            kv.clone(),
            Arc::new(InMemoryAnalyticsRepository::new()),
            clock.clone(),
        ));
        let risk = Arc::new(RiskService::new(
            Arc::new(InMemoryRiskRepository::new()),
            kv.clone(),
            clock.clone(),
            metrics.clone(),
        ));
        let sentiments = Arc::new(InMemorySentimentRepository::new());
        let advices = Arc::new(InMemoryAdviceRepository::new());
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        let service = DecisionService::new(
            market_data,
            chain,
            gateway.clone(),
            Arc::new(PcrSignalTemplate::default()),
            sentiments.clone(),
            advices.clone(),
            Arc::new(InMemorySignalRepository::new()),
            risk,
            kv.clone(),
            outbox.clone(),
            bus,
            clock.clone(),
            metrics,
            DecisionConfig::default(),
        );
        Fixture {
            clock,
            gateway,
            sentiments,
            advices,
            outbox,
            kv,
            service,
        }
    }

    const UNDERLYING: &str = "NSE_INDEX|Nifty 50";

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
    }

    /// Bullish tape: alternating series with a strong last close, a
    /// bullish chain (low PCR) and an ATM CE/PE pair.
    async fn seed_bullish_world(f: &Fixture) {
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 45, 0).unwrap();
        let mut candles: Vec<_> = (0..29)
            .map(|i| {
                let c = if i % 2 == 0 { dec!(24480) } else { dec!(24520) };
                fixtures::candle(
                    UNDERLYING,
                    t0 + chrono::Duration::minutes(5 * i),
                    c,
                    c + dec!(10),
                    c - dec!(10),
                    c,
                )
            })
            .collect();
        candles.push(fixtures::candle(
            UNDERLYING,
            t0 + chrono::Duration::minutes(5 * 29),
            dec!(24560),
            dec!(24570),
            dec!(24550),
            dec!(24560),
        ));
        f.gateway
            .set_candles(UNDERLYING, Timeframe::FiveMin, candles)
            .await;

        f.gateway
            .set_ohlc_quote(UNDERLYING, fixtures::ohlc_quote(dec!(24560), f.clock.now()))
            .await;

        f.gateway
            .set_instruments(
                UNDERLYING,
                vec![
                    fixtures::leg("NIFTY", 24550, OptionType::Ce, expiry(), 100.0, 40.0, None),
                    fixtures::leg("NIFTY", 24550, OptionType::Pe, expiry(), 70.0, 28.0, None),
                    fixtures::leg("NIFTY", 24600, OptionType::Ce, expiry(), 90.0, 35.0, None),
                    fixtures::leg("NIFTY", 24600, OptionType::Pe, expiry(), 60.0, 25.0, None),
                ],
            )
            .await;

        f.sentiments
            .save(&MarketSentimentSnapshot {
                as_of: f.clock.now(),
                score: 62.0,
                confidence: Some(80.0),
                prediction_accuracy: None,
                sentiment: SentimentLabel::Bullish,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bullish_world_emits_buy_ce_advice() {
        let f = fixture();
        seed_bullish_world(&f).await;

        let advice = f.service.generate_advice().await.unwrap().unwrap();
        assert_eq!(advice.txn_type, TxnType::Buy);
        // Long bias buys the ATM call.
        assert!(advice.symbol.contains("CE"));
        assert_eq!(advice.qty, 75);
        assert_eq!(advice.status, AdviceStatus::Pending);
        assert!(advice.expires_at.is_some());
        assert!(advice.priority_score >= 50.0);
        assert!(advice.stop_loss.is_some());
        assert!(advice.take_profit.is_some());

        let rows = f.outbox.fetch_unpublished(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, topics::ADVICE);
    }

    #[tokio::test]
    async fn test_dedupe_same_direction() {
        let f = fixture();
        seed_bullish_world(&f).await;

        assert!(f.service.generate_advice().await.unwrap().is_some());
        // Second cycle: open advice for the same leg blocks a twin.
        assert!(f.service.generate_advice().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_neutral_world_inside_deadband() {
        let f = fixture();
        seed_bullish_world(&f).await;

        // Flatten everything: neutral sentiment and flat tape.
        f.sentiments
            .save(&MarketSentimentSnapshot {
                as_of: f.clock.now(),
                score: 50.0,
                confidence: None,
                prediction_accuracy: None,
                sentiment: SentimentLabel::Neutral,
            })
            .await
            .unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 45, 0).unwrap();
        let flat: Vec<_> = (0..30)
            .map(|i| {
                fixtures::candle(
                    UNDERLYING,
                    t0 + chrono::Duration::minutes(5 * i),
                    dec!(24500),
                    dec!(24510),
                    dec!(24490),
                    dec!(24500),
                )
            })
            .collect();
        f.gateway
            .set_candles(UNDERLYING, Timeframe::FiveMin, flat)
            .await;

        assert!(f.service.generate_advice().await.unwrap().is_none());
        assert_eq!(f.advices.find_pending(10).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_no_headroom_skips() {
        let f = fixture();
        seed_bullish_world(&f).await;
        f.service.risk.set_kill_switch(true).await;
        f.service.risk.refresh_snapshot().await.unwrap();

        assert!(f.service.generate_advice().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_score_formula() {
        let w = StrategyWeights::default();
        // sentiment 62 -> 0.24; regime bullish -> 1.0; z 0.8 -> 0.4.
        let score = DecisionService::score(&w, 62.0, 1.0, 0.8);
        let expected = 0.4 * 0.24 + 0.35 * 1.0 + 0.25 * 0.4;
        assert!((score - expected).abs() < 1e-12);

        // Momentum clamps at |z| = 2.
        let clamped = DecisionService::score(&w, 50.0, 0.0, 10.0);
        assert!((clamped - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_weights_boost_and_variants() {
        let w = StrategyWeights::default();
        let boosted = w.boosted();
        assert!((boosted.ws - 0.44).abs() < 1e-12);
        assert!((boosted.wr - 0.315).abs() < 1e-12);
        assert!((boosted.wm - (1.0 - 0.44 - 0.315)).abs() < 1e-12);

        let (a, b) = w.variants();
        assert!((a.ws - 0.45).abs() < 1e-12);
        assert!((b.ws - 0.35).abs() < 1e-12);
        assert!((a.ws + a.wr + a.wm - 1.0).abs() < 1e-9);
        assert!((b.ws + b.wr + b.wm - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_quality_counts() {
        let f = fixture();
        seed_bullish_world(&f).await;
        let advice = f.service.generate_advice().await.unwrap().unwrap();

        let mut executed = advice.clone();
        executed
            .transition(AdviceStatus::Executed, f.clock.now())
            .unwrap();
        f.advices.update(&executed).await.unwrap();

        let quality = f.service.get_quality().await.unwrap();
        assert_eq!(quality.generated, 1);
        assert_eq!(quality.executed, 1);
        assert_eq!(quality.failed, 0);
        assert!((quality.accuracy - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_daily_optimization_runs_once_and_stores_variants() {
        let f = fixture();
        // Seed a bad day: one terminally failed advice.
        let mut advice = Advice::new(
            f.clock.now(),
            "NIFTY24550CE",
            "NSE_FO|NIFTY24550CE",
            TxnType::Buy,
            75,
            "pcr-blend",
            "seed",
        );
        advice.retry_count = 3;
        f.advices.insert(&advice).await.unwrap();
        let mut failed = advice.clone();
        failed
            .transition(AdviceStatus::Failed, f.clock.now())
            .unwrap();
        f.advices.update(&failed).await.unwrap();

        assert!(f.service.maybe_optimize_daily().await.unwrap());
        let weights = f.service.current_weights().await;
        assert!((weights.ws - 0.44).abs() < 1e-12);

        // Same IST day: a second pass is a no-op.
        assert!(!f.service.maybe_optimize_daily().await.unwrap());

        // Variants parked in KV.
        assert!(
            f.kv.get("decision:weights:pcr-blend:variant:a")
                .await
                .is_some()
        );
        assert!(
            f.kv.get("decision:weights:pcr-blend:variant:b")
                .await
                .is_some()
        );
    }
}
