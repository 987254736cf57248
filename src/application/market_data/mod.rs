pub mod quality;
pub mod stats;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::market::{Candle, MarketRegime, Tick, Timeframe};
use crate::domain::outbox::topics;
use crate::domain::ports::{BrokerGateway, Clock, FastStateStore};
use crate::domain::repositories::{CandleRepository, SignalRepository, TickRepository};
use crate::domain::signal::{MarketSignalRecord, SignalAction};
use crate::domain::types::AlertSeverity;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

const LTP_CACHE_TTL: Duration = Duration::from_secs(2);
const ATR_CACHE_TTL: Duration = Duration::from_secs(15);
const SPIKE_CACHE_TTL: Duration = Duration::from_secs(10);
const VIX_CACHE_TTL: Duration = Duration::from_secs(60);
/// A local tick younger than this beats a quote round-trip.
const SMART_TICK_MAX_AGE_SECS: i64 = 3;
/// Bars separating the two ATR windows in the jump comparison.
const ATR_JUMP_GAP_BARS: usize = 5;
const ATR_JUMP_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    pub z: Decimal,
}

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    /// Index instrument the engine trades around.
    pub instrument_key: String,
    /// ATR jump (percent) at which a volatility spike is declared.
    pub vol_spike_atr_jump_pct: f64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            instrument_key: "NSE_INDEX|Nifty 50".to_string(),
            vol_spike_atr_jump_pct: 50.0,
        }
    }
}

/// Market state around the traded index: prices, momentum, regime,
/// volatility and the enhanced-signals broadcast.
pub struct MarketDataService {
    gateway: Arc<dyn BrokerGateway>,
    kv: Arc<dyn FastStateStore>,
    candles: Arc<dyn CandleRepository>,
    ticks: Arc<dyn TickRepository>,
    signals: Arc<dyn SignalRepository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: MarketDataConfig,
    last_regime_5m: RwLock<Option<MarketRegime>>,
    last_regime_60m: RwLock<Option<MarketRegime>>,
    last_regime_flip: RwLock<Option<DateTime<Utc>>>,
}

impl MarketDataService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        kv: Arc<dyn FastStateStore>,
        candles: Arc<dyn CandleRepository>,
        ticks: Arc<dyn TickRepository>,
        signals: Arc<dyn SignalRepository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: MarketDataConfig,
    ) -> Self {
        Self {
            gateway,
            kv,
            candles,
            ticks,
            signals,
            bus,
            clock,
            metrics,
            config,
            last_regime_5m: RwLock::new(None),
            last_regime_60m: RwLock::new(None),
            last_regime_flip: RwLock::new(None),
        }
    }

    pub fn instrument_key(&self) -> &str {
        &self.config.instrument_key
    }

    fn emit_alert(&self, kind: &str, severity: AlertSeverity, details: serde_json::Value) {
        warn!("MarketData alert [{}] {}: {}", severity, kind, details);
        self.metrics.data_anomalies_total.with_label_values(&[kind]).inc();
        self.bus.publish(
            topics::AUDIT,
            &self.config.instrument_key,
            json!({
                "kind": kind,
                "severity": severity.to_string(),
                "instrument_key": self.config.instrument_key,
                "as_of": self.clock.now().to_rfc3339(),
                "details": details,
            }),
        );
    }

    async fn observe_latency(&self, operation: &str, started: std::time::Instant) {
        self.metrics
            .api_latency_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Last traded price with a 2 s cache in front of the quote API.
    pub async fn get_ltp(&self, instrument_key: &str) -> EngineResult<Decimal> {
        if instrument_key.is_empty() {
            return Err(EngineError::bad_request("instrument key is required"));
        }
        let cache_key = format!("md:ltp:{}", instrument_key);
        if let Some(cached) = self.kv.get(&cache_key).await {
            if let Ok(price) = cached.parse::<Decimal>() {
                return Ok(price);
            }
        }

        let started = std::time::Instant::now();
        let quote = self
            .gateway
            .get_market_ohlc_quote(instrument_key, Timeframe::OneMin)
            .await?;
        self.observe_latency("ohlc_quote", started).await;

        let bar = quote.live_ohlc.as_ref().unwrap_or(&quote.ohlc);
        let price = bar.close;
        let now = self.clock.now();

        let flags = quality::assess_tick(price, bar.ts, now, None);
        if !flags.is_acceptable() {
            self.emit_alert(
                "DATA_QUALITY_ISSUE",
                AlertSeverity::Medium,
                json!({"score": flags.score, "anomalies": flags.anomalies}),
            );
        }

        self.kv
            .put(&cache_key, &price.to_string(), Some(LTP_CACHE_TTL))
            .await;
        // Record the observation as a tick so the smart path has a local
        // fallback between quote refreshes.
        let _ = self
            .ticks
            .append(&Tick {
                symbol: instrument_key.to_string(),
                ts: now,
                ltp: price,
                quantity: 0,
            })
            .await;
        Ok(price)
    }

    /// Prefer a local tick younger than 3 s; otherwise fetch a quote.
    pub async fn get_ltp_smart(&self, instrument_key: &str) -> EngineResult<Decimal> {
        let now = self.clock.now();
        if let Ok(Some(tick)) = self.ticks.latest(instrument_key).await {
            if (now - tick.ts).num_seconds() <= SMART_TICK_MAX_AGE_SECS {
                debug!("MarketData: serving {} from local tick", instrument_key);
                return Ok(tick.ltp);
            }
        }
        self.get_ltp(instrument_key).await
    }

    async fn intraday_candles(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Vec<Candle>> {
        let started = std::time::Instant::now();
        let candles = self
            .gateway
            .get_intraday_candles(instrument_key, timeframe)
            .await?;
        self.observe_latency("intraday_candles", started).await;
        Ok(candles)
    }

    /// Momentum z-score of the last close over the trailing window,
    /// rounded to 4 decimals. `NOT_FOUND` under 10 valid closes.
    pub async fn get_momentum_on(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Decimal> {
        let candles = self.intraday_candles(instrument_key, timeframe).await?;
        let closes = stats::valid_closes(&candles);
        let z = stats::momentum_zscore(&closes).ok_or_else(|| {
            EngineError::not_found(format!(
                "momentum needs {} closes, have {}",
                stats::MOMENTUM_MIN_CLOSES,
                closes.len()
            ))
        })?;
        Ok(Decimal::from_f64(z).unwrap_or_default().round_dp(4))
    }

    /// Momentum on the configured index at 5 minutes.
    pub async fn get_momentum_now(&self) -> EngineResult<Decimal> {
        self.get_momentum_on(&self.config.instrument_key, Timeframe::FiveMin)
            .await
    }

    /// Regime classification on a timeframe. The hourly timeframe also
    /// tracks the regime-flip timestamp used by the broadcast envelope.
    pub async fn get_regime_on(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<RegimeReading> {
        let z = self.get_momentum_on(instrument_key, timeframe).await?;
        let zf = z.to_f64().unwrap_or(0.0);
        let regime = MarketRegime::from_zscore(zf);

        if timeframe == Timeframe::OneHour {
            let mut last = self.last_regime_60m.write().await;
            if let Some(prev) = *last {
                if prev != regime {
                    let now = self.clock.now();
                    info!("MarketData: hourly regime flip {} -> {}", prev, regime);
                    *self.last_regime_flip.write().await = Some(now);
                }
            }
            *last = Some(regime);
        }

        Ok(RegimeReading { regime, z })
    }

    /// Current 5-minute regime with flip alerting: a transition emits a
    /// `PRICE_ANOMALY` alert and records a REGIME_CHANGE signal whose
    /// confidence follows the |z| ladder.
    pub async fn get_regime_now(&self) -> EngineResult<RegimeReading> {
        let reading = self
            .get_regime_on(&self.config.instrument_key, Timeframe::FiveMin)
            .await?;
        let zf = reading.z.to_f64().unwrap_or(0.0);

        let mut last = self.last_regime_5m.write().await;
        let changed = last.map(|prev| prev != reading.regime).unwrap_or(false);
        let prev = *last;
        *last = Some(reading.regime);
        drop(last);

        self.metrics.regime_gauge.set(reading.regime.as_norm());

        if changed {
            self.emit_alert(
                "PRICE_ANOMALY",
                AlertSeverity::Medium,
                json!({
                    "transition": format!("{} -> {}", prev.unwrap_or(MarketRegime::Neutral), reading.regime),
                    "z": zf,
                }),
            );
            let record = MarketSignalRecord {
                id: Uuid::new_v4().to_string(),
                at: self.clock.now(),
                kind: "REGIME_CHANGE".to_string(),
                instrument_key: self.config.instrument_key.clone(),
                action: match reading.regime {
                    MarketRegime::Bullish => SignalAction::Buy,
                    MarketRegime::Bearish => SignalAction::Sell,
                    MarketRegime::Neutral => SignalAction::Hold,
                },
                strength: zf.abs().clamp(0.0, 10.0),
                confidence: MarketRegime::flip_confidence(zf),
                details: json!({"from": prev.map(|r| r.to_string()), "to": reading.regime.to_string()}),
            };
            if let Err(e) = self.signals.save(&record).await {
                warn!("MarketData: failed to persist regime-change signal: {:#}", e);
            }
        }

        Ok(reading)
    }

    /// ATR over `lookback` bars as a percentage of the last close,
    /// rounded to 2 decimals. Cached 15 s.
    pub async fn get_atr_pct(
        &self,
        instrument_key: &str,
        timeframe: Timeframe,
        lookback: usize,
    ) -> EngineResult<Decimal> {
        let cache_key = format!("md:atr:{}:{}:{}", instrument_key, timeframe, lookback);
        if let Some(cached) = self.kv.get(&cache_key).await {
            if let Ok(v) = cached.parse::<Decimal>() {
                return Ok(v);
            }
        }

        let candles = self.intraday_candles(instrument_key, timeframe).await?;
        let atr = stats::atr(&candles, lookback).ok_or_else(|| {
            EngineError::not_found(format!(
                "ATR needs {} bars, have {}",
                lookback + 1,
                candles.len()
            ))
        })?;
        let last_close = candles
            .last()
            .and_then(|c| c.close.to_f64())
            .filter(|c| *c > 0.0)
            .ok_or_else(|| EngineError::not_found("no valid last close"))?;

        let pct = Decimal::from_f64(atr / last_close * 100.0)
            .unwrap_or_default()
            .round_dp(2);
        self.kv
            .put(&cache_key, &pct.to_string(), Some(ATR_CACHE_TTL))
            .await;
        Ok(pct)
    }

    /// Percent change between ATR(20) of the last 20 five-minute bars and
    /// ATR(20) of the 20 bars preceding a 5-bar gap. Cached 15 s.
    pub async fn get_atr_jump_5m_pct(&self, instrument_key: &str) -> EngineResult<Decimal> {
        let cache_key = format!("md:atrjump5m:{}", instrument_key);
        if let Some(cached) = self.kv.get(&cache_key).await {
            if let Ok(v) = cached.parse::<Decimal>() {
                return Ok(v);
            }
        }

        let candles = self
            .intraday_candles(instrument_key, Timeframe::FiveMin)
            .await?;
        // Two lookback windows plus the gap, plus one leading bar per ATR.
        let needed = 2 * (ATR_JUMP_LOOKBACK + 1) + ATR_JUMP_GAP_BARS;
        if candles.len() < needed {
            return Err(EngineError::not_found(format!(
                "ATR jump needs {} bars, have {}",
                needed,
                candles.len()
            )));
        }

        let atr_now = stats::atr(&candles, ATR_JUMP_LOOKBACK)
            .ok_or_else(|| EngineError::not_found("ATR window incomplete"))?;
        let prev_end = candles.len() - ATR_JUMP_LOOKBACK - ATR_JUMP_GAP_BARS;
        let atr_prev = stats::atr(&candles[..prev_end], ATR_JUMP_LOOKBACK)
            .ok_or_else(|| EngineError::not_found("previous ATR window incomplete"))?;

        let jump = (atr_now - atr_prev) / atr_prev.max(stats::FLAT_SIGMA_EPSILON) * 100.0;
        let jump = Decimal::from_f64(jump).unwrap_or_default().round_dp(2);
        self.kv
            .put(&cache_key, &jump.to_string(), Some(ATR_CACHE_TTL))
            .await;
        Ok(jump)
    }

    /// True iff the 5-minute ATR jump exceeds the configured threshold.
    /// A spike emits a HIGH severity anomaly alert. Cached 10 s.
    pub async fn is_volatility_spike_now(&self, instrument_key: &str) -> EngineResult<bool> {
        let cache_key = format!("md:volspike:{}", instrument_key);
        if let Some(cached) = self.kv.get(&cache_key).await {
            return Ok(cached == "1");
        }

        let jump = self.get_atr_jump_5m_pct(instrument_key).await?;
        let spike = jump.to_f64().unwrap_or(0.0) >= self.config.vol_spike_atr_jump_pct;
        if spike {
            self.emit_alert(
                "PRICE_ANOMALY",
                AlertSeverity::High,
                json!({"atr_jump_pct": jump.to_string(), "threshold_pct": self.config.vol_spike_atr_jump_pct}),
            );
        }
        self.kv
            .put(&cache_key, if spike { "1" } else { "0" }, Some(SPIKE_CACHE_TTL))
            .await;
        Ok(spike)
    }

    /// Realized-vol proxy from the last 60 five-minute bars, annualised,
    /// in percent. Cached 60 s.
    pub async fn get_vix_proxy_pct(&self, instrument_key: &str) -> EngineResult<Decimal> {
        let cache_key = format!("md:vix:{}", instrument_key);
        if let Some(cached) = self.kv.get(&cache_key).await {
            if let Ok(v) = cached.parse::<Decimal>() {
                return Ok(v);
            }
        }

        let candles = self
            .intraday_candles(instrument_key, Timeframe::FiveMin)
            .await?;
        let closes = stats::valid_closes(&candles);
        let window = &closes[closes.len().saturating_sub(60)..];
        let vol = stats::realized_vol_proxy_pct(window)
            .ok_or_else(|| EngineError::not_found("not enough closes for vol proxy"))?;

        let pct = Decimal::from_f64(vol).unwrap_or_default().round_dp(2);
        self.kv
            .put(&cache_key, &pct.to_string(), Some(VIX_CACHE_TTL))
            .await;
        Ok(pct)
    }

    /// Compose and publish the enhanced-signals envelope on
    /// `signals.enhanced`. Failures are recorded, never retried.
    pub async fn broadcast_signals_tick(&self) {
        let key = self.config.instrument_key.clone();
        let r5 = self.get_regime_on(&key, Timeframe::FiveMin).await;
        let r15 = self.get_momentum_on(&key, Timeframe::FifteenMin).await;
        let r60 = self.get_regime_on(&key, Timeframe::OneHour).await;

        let (regime5, z5) = match r5 {
            Ok(r) => (r.regime, r.z),
            Err(e) => {
                debug!("MarketData: signals broadcast skipped (5m): {}", e);
                self.metrics
                    .data_anomalies_total
                    .with_label_values(&["BROADCAST_SKIPPED"])
                    .inc();
                return;
            }
        };
        let z15 = r15.unwrap_or_default();
        let (regime60, z60) = match r60 {
            Ok(r) => (r.regime, r.z),
            Err(_) => (MarketRegime::Neutral, Decimal::ZERO),
        };

        let last_flip = *self.last_regime_flip.read().await;
        let envelope = json!({
            "as_of": self.clock.now().to_rfc3339(),
            "instrument_key": key,
            "regime5": regime5.to_string(),
            "regime60": regime60.to_string(),
            "z5": z5.to_string(),
            "z15": z15.to_string(),
            "z60": z60.to_string(),
            "system_health": "OK",
            "last_regime_flip": last_flip.map(|t| t.to_rfc3339()),
        });
        self.bus.publish(topics::SIGNALS_ENHANCED, &key, envelope);
    }

    /// Pull 1-minute candles and persist the penultimate (completed) bar.
    /// Monotonic-duplicate writes are skipped; insane OHLC rows are
    /// flagged POOR but persisted.
    pub async fn ingest_latest_1m_candle(&self) -> Result<()> {
        let key = self.config.instrument_key.clone();
        let candles = match self.intraday_candles(&key, Timeframe::OneMin).await {
            Ok(c) => c,
            Err(e) => {
                debug!("MarketData: candle ingest skipped: {}", e);
                return Ok(());
            }
        };
        if candles.len() < 2 {
            return Ok(());
        }
        let completed = &candles[candles.len() - 2];

        if !completed.is_sane() {
            self.emit_alert(
                "DATA_QUALITY_ISSUE",
                AlertSeverity::Medium,
                json!({
                    "reason": "OHLC sanity violation",
                    "open_time": completed.open_time.to_rfc3339(),
                }),
            );
        }

        let saved = self.candles.save("1m", completed).await?;
        if saved {
            self.bus.publish(
                topics::TICKS,
                &key,
                serde_json::to_value(completed).unwrap_or_default(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{ManualClock, MockBrokerGateway, fixtures};
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use crate::infrastructure::repositories::in_memory::{
        InMemoryCandleRepository, InMemorySignalRepository, InMemoryTickRepository,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    struct Fixture {
        clock: Arc<ManualClock>,
        gateway: Arc<MockBrokerGateway>,
        service: MarketDataService,
        bus: EventBus,
        signals: Arc<InMemorySignalRepository>,
        candles: Arc<InMemoryCandleRepository>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 4, 30, 0).unwrap(),
        ));
        let gateway = Arc::new(MockBrokerGateway::new());
        let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
        let candles = Arc::new(InMemoryCandleRepository::new());
        let ticks = Arc::new(InMemoryTickRepository::new());
        let signals = Arc::new(InMemorySignalRepository::new());
        let bus = EventBus::default();
        let service = MarketDataService::new(
            gateway.clone(),
            kv,
            candles.clone(),
            ticks,
            signals.clone(),
            bus.clone(),
            clock.clone(),
            Metrics::new().unwrap(),
            MarketDataConfig::default(),
        );
        Fixture {
            clock,
            gateway,
            service,
            bus,
            signals,
            candles,
        }
    }

    fn key() -> String {
        "NSE_INDEX|Nifty 50".to_string()
    }

    async fn load_5m_series(f: &Fixture, closes: &[f64]) {
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 45, 0).unwrap();
        let candles: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let d = Decimal::from_f64(c).unwrap();
                fixtures::candle(
                    &key(),
                    t0 + chrono::Duration::minutes(5 * i as i64),
                    d,
                    d + dec!(1),
                    d - dec!(1),
                    d,
                )
            })
            .collect();
        f.gateway
            .set_candles(&key(), Timeframe::FiveMin, candles)
            .await;
    }

    #[tokio::test]
    async fn test_ltp_cached_for_two_seconds() {
        let f = fixture();
        let now = f.clock.now();
        f.gateway
            .set_ohlc_quote(&key(), fixtures::ohlc_quote(dec!(24510.5), now))
            .await;

        assert_eq!(f.service.get_ltp(&key()).await.unwrap(), dec!(24510.5));

        // Change the upstream quote; the cache must still serve the old one.
        f.gateway
            .set_ohlc_quote(&key(), fixtures::ohlc_quote(dec!(24999), now))
            .await;
        assert_eq!(f.service.get_ltp(&key()).await.unwrap(), dec!(24510.5));

        f.clock.advance(Duration::from_secs(3));
        assert_eq!(f.service.get_ltp(&key()).await.unwrap(), dec!(24999));
    }

    #[tokio::test]
    async fn test_ltp_requires_key() {
        let f = fixture();
        assert!(matches!(
            f.service.get_ltp("").await,
            Err(EngineError::BadRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_ltp_smart_prefers_fresh_tick() {
        let f = fixture();
        let now = f.clock.now();
        f.gateway
            .set_ohlc_quote(&key(), fixtures::ohlc_quote(dec!(24500), now))
            .await;

        // Seed a tick via get_ltp, then move the quote.
        f.service.get_ltp(&key()).await.unwrap();
        f.gateway
            .set_ohlc_quote(&key(), fixtures::ohlc_quote(dec!(24999), now))
            .await;

        // Inside 3 s the local tick wins.
        assert_eq!(f.service.get_ltp_smart(&key()).await.unwrap(), dec!(24500));

        // After 4 s the tick is too old; falls through to the (cached then
        // expired) quote path.
        f.clock.advance(Duration::from_secs(4));
        assert_eq!(f.service.get_ltp_smart(&key()).await.unwrap(), dec!(24999));
    }

    #[tokio::test]
    async fn test_momentum_not_found_under_ten_closes() {
        let f = fixture();
        load_5m_series(&f, &[100.0; 9]).await;
        assert!(matches!(
            f.service.get_momentum_on(&key(), Timeframe::FiveMin).await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_momentum_zero_on_flat_series() {
        let f = fixture();
        load_5m_series(&f, &[100.0; 30]).await;
        let z = f
            .service
            .get_momentum_on(&key(), Timeframe::FiveMin)
            .await
            .unwrap();
        assert_eq!(z, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_regime_flip_emits_alert_and_signal() {
        let f = fixture();
        let mut audit_rx = f.bus.subscribe();

        // Flat series: neutral regime, no alert (first observation).
        load_5m_series(&f, &[100.0; 30]).await;
        let r = f.service.get_regime_now().await.unwrap();
        assert_eq!(r.regime, MarketRegime::Neutral);

        // Spike the last close so z crosses +0.5: NEUTRAL -> BULLISH.
        let mut closes = vec![100.0; 29];
        closes.push(101.0);
        load_5m_series(&f, &closes).await;
        let r = f.service.get_regime_now().await.unwrap();
        assert_eq!(r.regime, MarketRegime::Bullish);

        let alert = audit_rx.recv().await.unwrap();
        assert_eq!(alert.topic, topics::AUDIT);
        assert_eq!(alert.payload["kind"], "PRICE_ANOMALY");

        let records = f.signals.recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, "REGIME_CHANGE");
        assert_eq!(records[0].action, SignalAction::Buy);
    }

    /// 29 closes alternating 98/102 put sigma near 2, so a last close of
    /// 101 lands z in [0.5, 1.0): a NEUTRAL -> BULLISH flip at the 0.55
    /// confidence band.
    fn alternating_series(last: f64) -> Vec<f64> {
        let mut closes: Vec<f64> = (0..29)
            .map(|i| if i % 2 == 0 { 98.0 } else { 102.0 })
            .collect();
        closes.push(last);
        closes
    }

    #[tokio::test]
    async fn test_regime_flip_confidence_ladder() {
        let f = fixture();
        // Last close at the mean: neutral.
        load_5m_series(&f, &alternating_series(100.0)).await;
        let r = f.service.get_regime_now().await.unwrap();
        assert_eq!(r.regime, MarketRegime::Neutral);

        // Last close one point up: z just over 0.5.
        load_5m_series(&f, &alternating_series(101.0)).await;
        let r = f.service.get_regime_now().await.unwrap();
        assert_eq!(r.regime, MarketRegime::Bullish);
        let z = r.z.to_f64().unwrap();
        assert!((0.5..1.0).contains(&z), "engineered z out of band: {}", z);

        let records = f.signals.recent(10).await.unwrap();
        let flip = records.first().unwrap();
        assert_eq!(flip.confidence, 0.55);
    }

    #[tokio::test]
    async fn test_atr_pct_value_and_cache() {
        let f = fixture();
        // Constant closes, high-low = 2: ATR = 2, close = 100 -> 2.00%.
        load_5m_series(&f, &[100.0; 30]).await;
        let pct = f
            .service
            .get_atr_pct(&key(), Timeframe::FiveMin, 20)
            .await
            .unwrap();
        assert_eq!(pct, dec!(2.00));

        // Served from cache for 15 s even if upstream changes.
        load_5m_series(&f, &[200.0; 30]).await;
        let pct = f
            .service
            .get_atr_pct(&key(), Timeframe::FiveMin, 20)
            .await
            .unwrap();
        assert_eq!(pct, dec!(2.00));
    }

    #[tokio::test]
    async fn test_volatility_spike_fires_high_alert() {
        let f = fixture();
        let mut audit_rx = f.bus.subscribe();

        // 25 calm bars (range 2), gap, then wild bars (range 12):
        // ATR prev = 2, ATR now = 12, jump = 500% >= 50%.
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 0, 0).unwrap();
        let mut candles = Vec::new();
        for i in 0..47 {
            let (hi, lo) = if i < 25 { (dec!(1), dec!(1)) } else { (dec!(6), dec!(6)) };
            candles.push(fixtures::candle(
                &key(),
                t0 + chrono::Duration::minutes(5 * i),
                dec!(100),
                dec!(100) + hi,
                dec!(100) - lo,
                dec!(100),
            ));
        }
        f.gateway
            .set_candles(&key(), Timeframe::FiveMin, candles)
            .await;

        assert!(f.service.is_volatility_spike_now(&key()).await.unwrap());
        let alert = audit_rx.recv().await.unwrap();
        assert_eq!(alert.payload["severity"], "HIGH");
    }

    #[tokio::test]
    async fn test_vix_proxy_flat_is_zero() {
        let f = fixture();
        load_5m_series(&f, &[100.0; 61]).await;
        let vix = f.service.get_vix_proxy_pct(&key()).await.unwrap();
        assert_eq!(vix, dec!(0.00));
    }

    #[tokio::test]
    async fn test_broadcast_envelope_shape() {
        let f = fixture();
        let mut rx = f.bus.subscribe();

        load_5m_series(&f, &[100.0; 30]).await;
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 0, 0).unwrap();
        let hourly: Vec<Candle> = (0..12)
            .map(|i| {
                fixtures::candle(
                    &key(),
                    t0 + chrono::Duration::hours(i),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                )
            })
            .collect();
        f.gateway.set_candles(&key(), Timeframe::OneHour, hourly).await;
        let fifteen: Vec<Candle> = (0..12)
            .map(|i| {
                fixtures::candle(
                    &key(),
                    t0 + chrono::Duration::minutes(15 * i),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                )
            })
            .collect();
        f.gateway
            .set_candles(&key(), Timeframe::FifteenMin, fifteen)
            .await;

        f.service.broadcast_signals_tick().await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.topic, topics::SIGNALS_ENHANCED);
        assert_eq!(ev.payload["instrument_key"], key());
        assert_eq!(ev.payload["regime5"], "NEUTRAL");
        assert_eq!(ev.payload["system_health"], "OK");
        assert!(ev.payload.get("z15").is_some());
    }

    #[tokio::test]
    async fn test_ingest_persists_penultimate_bar_once() {
        let f = fixture();
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 4, 0, 0).unwrap();
        let one_min: Vec<Candle> = (0..3)
            .map(|i| {
                fixtures::candle(
                    &key(),
                    t0 + chrono::Duration::minutes(i),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                )
            })
            .collect();
        f.gateway
            .set_candles(&key(), Timeframe::OneMin, one_min)
            .await;

        f.service.ingest_latest_1m_candle().await.unwrap();
        let latest = f.candles.latest(&key(), "1m").await.unwrap().unwrap();
        // Penultimate bar of three is minute 1.
        assert_eq!(latest.open_time, t0 + chrono::Duration::minutes(1));

        // Re-ingest: duplicate write skipped, latest unchanged.
        f.service.ingest_latest_1m_candle().await.unwrap();
        let latest2 = f.candles.latest(&key(), "1m").await.unwrap().unwrap();
        assert_eq!(latest.open_time, latest2.open_time);
    }
}
