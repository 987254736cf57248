//! Market sentiment aggregation: provider scores blended with price
//! momentum, then smoothed against an exponentially decayed in-memory ring.

use crate::application::market_data::MarketDataService;
use crate::domain::outbox::{OutboxEvent, topics};
use crate::domain::ports::Clock;
use crate::domain::repositories::{OutboxRepository, SentimentRepository};
use crate::domain::sentiment::{
    MarketSentimentSnapshot, SentimentLabel, SentimentProvider, SentimentSample,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Weight of the multi-source score against the price score.
const MULTI_SOURCE_WEIGHT: f64 = 0.6;
const PRICE_WEIGHT: f64 = 0.4;
/// Weight of the fresh blend against the decayed ring average.
const BLEND_WEIGHT: f64 = 0.7;
const DECAYED_WEIGHT: f64 = 0.3;
/// Ring entries older than the window are trimmed.
const HARD_RING_CAP: usize = 2000;

#[derive(Debug, Clone)]
pub struct SentimentConfig {
    pub window_minutes: i64,
    pub half_life_minutes: f64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            half_life_minutes: 20.0,
        }
    }
}

/// Exponentially decayed mean over the sample ring:
/// `w_i = 0.5^(age_min_i / half_life)`.
pub fn decayed_average(
    samples: &VecDeque<SentimentSample>,
    now: DateTime<Utc>,
    half_life_minutes: f64,
) -> Option<f64> {
    if samples.is_empty() || half_life_minutes <= 0.0 {
        return None;
    }
    let mut weighted = 0.0;
    let mut total = 0.0;
    for sample in samples {
        let age_min = (now - sample.at).num_milliseconds().max(0) as f64 / 60_000.0;
        let w = 0.5_f64.powf(age_min / half_life_minutes);
        weighted += w * sample.score;
        total += w;
    }
    if total <= 0.0 {
        return None;
    }
    Some(weighted / total)
}

pub struct SentimentService {
    providers: Vec<Arc<dyn SentimentProvider>>,
    market_data: Arc<MarketDataService>,
    repo: Arc<dyn SentimentRepository>,
    outbox: Arc<dyn OutboxRepository>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: SentimentConfig,
    ring: Mutex<VecDeque<SentimentSample>>,
}

impl SentimentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        providers: Vec<Arc<dyn SentimentProvider>>,
        market_data: Arc<MarketDataService>,
        repo: Arc<dyn SentimentRepository>,
        outbox: Arc<dyn OutboxRepository>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: SentimentConfig,
    ) -> Self {
        Self {
            providers,
            market_data,
            repo,
            outbox,
            bus,
            clock,
            metrics,
            config,
            ring: Mutex::new(VecDeque::new()),
        }
    }

    /// Price-derived score: `clip(50 + 20 * z, 0, 100)`; neutral 50 when
    /// momentum is unavailable.
    async fn price_score(&self) -> f64 {
        match self.market_data.get_momentum_now().await {
            Ok(z) => (50.0 + 20.0 * z.to_f64().unwrap_or(0.0)).clamp(0.0, 100.0),
            Err(e) => {
                debug!("Sentiment: momentum unavailable ({}), price score neutral", e);
                50.0
            }
        }
    }

    /// Equal-weighted mean of the provider scores that arrived this cycle.
    async fn multi_source_score(&self) -> Option<f64> {
        let mut scores = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.fetch_sentiment().await {
                Ok(Some(score)) => scores.push(score.clamp(0.0, 100.0)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Sentiment: provider {} failed: {:#}", provider.name(), e);
                }
            }
        }
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }

    /// One full scoring pass, always in [0, 100].
    pub async fn compute_score_now(&self) -> f64 {
        let now = self.clock.now();
        let price = self.price_score().await;
        let multi = self.multi_source_score().await.unwrap_or(price);
        let blended = MULTI_SOURCE_WEIGHT * multi + PRICE_WEIGHT * price;

        let mut ring = self.ring.lock().await;
        let decayed = decayed_average(&ring, now, self.config.half_life_minutes);
        let final_score = match decayed {
            Some(avg) => BLEND_WEIGHT * blended + DECAYED_WEIGHT * avg,
            None => blended,
        }
        .clamp(0.0, 100.0);

        ring.push_back(SentimentSample {
            at: now,
            score: final_score,
        });
        let window_start = now - chrono::Duration::minutes(self.config.window_minutes);
        while let Some(front) = ring.front() {
            if front.at < window_start || ring.len() > HARD_RING_CAP {
                ring.pop_front();
            } else {
                break;
            }
        }

        final_score
    }

    /// Scheduled refresh: score, persist a snapshot, publish on the stream
    /// and the `sentiment` topic, and write an audit row via the outbox.
    pub async fn refresh(&self) -> Result<MarketSentimentSnapshot> {
        let now = self.clock.now();
        let score = self.compute_score_now().await;
        let snapshot = MarketSentimentSnapshot {
            as_of: now,
            score,
            confidence: Some(self.confidence().await),
            prediction_accuracy: None,
            sentiment: SentimentLabel::from_score(score),
        };

        self.repo.save(&snapshot).await?;
        self.metrics.sentiment_score.set(score);

        let payload = json!({
            "as_of": now.to_rfc3339(),
            "score": score,
            "sentiment": snapshot.sentiment.to_string(),
        });
        self.bus.publish(
            topics::SENTIMENT,
            self.market_data.instrument_key(),
            payload.clone(),
        );
        self.outbox
            .enqueue(&OutboxEvent::with_key(
                now,
                topics::AUDIT,
                self.market_data.instrument_key(),
                json!({"kind": "sentiment.update", "snapshot": payload}),
            ))
            .await?;

        Ok(snapshot)
    }

    /// Confidence grows with ring depth: more corroborating samples, more
    /// trust, capped at 100.
    async fn confidence(&self) -> f64 {
        let ring = self.ring.lock().await;
        ((ring.len() as f64 / 10.0) * 100.0).min(100.0)
    }

    /// Latest persisted snapshot for the decision path and cards.
    pub async fn get_now(&self) -> Result<Option<MarketSentimentSnapshot>> {
        self.repo.latest().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::market_data::{MarketDataConfig, MarketDataService};
    use crate::infrastructure::memory_store::InMemoryStateStore;
    use crate::infrastructure::mock::{ManualClock, MockBrokerGateway, fixtures};
    use crate::infrastructure::repositories::in_memory::{
        InMemoryCandleRepository, InMemoryOutboxRepository, InMemorySentimentRepository,
        InMemorySignalRepository, InMemoryTickRepository,
    };
    use crate::domain::market::Timeframe;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;

    struct StaticProvider {
        score: Option<f64>,
        fail: bool,
    }

    #[async_trait]
    impl SentimentProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        async fn fetch_sentiment(&self) -> Result<Option<f64>> {
            if self.fail {
                anyhow::bail!("provider down");
            }
            Ok(self.score)
        }
    }

    struct Fixture {
        clock: Arc<ManualClock>,
        gateway: Arc<MockBrokerGateway>,
        service: SentimentService,
        repo: Arc<InMemorySentimentRepository>,
        outbox: Arc<InMemoryOutboxRepository>,
    }

    fn fixture(providers: Vec<Arc<dyn SentimentProvider>>) -> Fixture {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap(),
        ));
        let gateway = Arc::new(MockBrokerGateway::new());
        let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
        let metrics = Metrics::new().unwrap();
        let bus = EventBus::default();
        let market_data = Arc::new(MarketDataService::new(
            gateway.clone(),
            kv,
            Arc::new(InMemoryCandleRepository::new()),
            Arc::new(InMemoryTickRepository::new()),
            Arc::new(InMemorySignalRepository::new()),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            MarketDataConfig::default(),
        ));
        let repo = Arc::new(InMemorySentimentRepository::new());
        let outbox = Arc::new(InMemoryOutboxRepository::new());
        let service = SentimentService::new(
            providers,
            market_data,
            repo.clone(),
            outbox.clone(),
            bus,
            clock.clone(),
            metrics,
            SentimentConfig::default(),
        );
        Fixture {
            clock,
            gateway,
            service,
            repo,
            outbox,
        }
    }

    async fn load_flat_candles(f: &Fixture) {
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 45, 0).unwrap();
        let candles: Vec<_> = (0..30)
            .map(|i| {
                fixtures::candle(
                    "NSE_INDEX|Nifty 50",
                    t0 + chrono::Duration::minutes(5 * i),
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                )
            })
            .collect();
        f.gateway
            .set_candles("NSE_INDEX|Nifty 50", Timeframe::FiveMin, candles)
            .await;
    }

    #[test]
    fn test_decayed_average_half_life() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap();
        let mut ring = VecDeque::new();
        // One sample exactly one half-life old (weight 0.5), one fresh
        // (weight 1.0): mean = (0.5*40 + 1.0*70) / 1.5 = 60.
        ring.push_back(SentimentSample {
            at: now - chrono::Duration::minutes(20),
            score: 40.0,
        });
        ring.push_back(SentimentSample { at: now, score: 70.0 });
        let avg = decayed_average(&ring, now, 20.0).unwrap();
        assert!((avg - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_decayed_average_empty_is_none() {
        assert!(decayed_average(&VecDeque::new(), Utc::now(), 20.0).is_none());
    }

    #[tokio::test]
    async fn test_score_bounded_and_neutral_without_signal() {
        // No candles (momentum unavailable), no providers: everything
        // degrades to the neutral 50.
        let f = fixture(vec![]);
        let score = f.service.compute_score_now().await;
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_provider_blend() {
        let f = fixture(vec![Arc::new(StaticProvider {
            score: Some(80.0),
            fail: false,
        })]);
        load_flat_candles(&f).await;
        // price score = 50 (flat momentum); blended = 0.6*80 + 0.4*50 = 68.
        let score = f.service.compute_score_now().await;
        assert!((score - 68.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_provider_degrades_to_price() {
        let f = fixture(vec![Arc::new(StaticProvider {
            score: None,
            fail: true,
        })]);
        load_flat_candles(&f).await;
        let score = f.service.compute_score_now().await;
        assert!((score - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_second_sample_blends_with_ring() {
        let f = fixture(vec![Arc::new(StaticProvider {
            score: Some(80.0),
            fail: false,
        })]);
        load_flat_candles(&f).await;

        let first = f.service.compute_score_now().await; // 68.0
        f.clock.advance(std::time::Duration::from_secs(60));
        let second = f.service.compute_score_now().await;
        // final = 0.7*68 + 0.3*decayed(ring=[68]) = 68 exactly here, since
        // the only ring entry equals the blend.
        assert!((second - first).abs() < 1e-6);

        // A provider swing is damped by the ring.
        // (Can't swap providers on the same fixture; assert bounds only.)
        assert!((0.0..=100.0).contains(&second));
    }

    #[tokio::test]
    async fn test_refresh_persists_publishes_and_audits() {
        let f = fixture(vec![Arc::new(StaticProvider {
            score: Some(80.0),
            fail: false,
        })]);
        load_flat_candles(&f).await;
        let mut rx = f.service.bus.subscribe();

        let snapshot = f.service.refresh().await.unwrap();
        assert_eq!(snapshot.sentiment, SentimentLabel::Bullish);

        let stored = f.repo.latest().await.unwrap().unwrap();
        assert!((stored.score - snapshot.score).abs() < 1e-9);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.topic, topics::SENTIMENT);

        let audits = f.outbox.fetch_unpublished(10).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].topic, topics::AUDIT);
    }

    #[tokio::test]
    async fn test_ring_trims_outside_window() {
        let f = fixture(vec![]);
        for _ in 0..5 {
            f.service.compute_score_now().await;
            f.clock.advance(std::time::Duration::from_secs(20 * 60));
        }
        let ring = f.service.ring.lock().await;
        // With 20-minute steps and a 60-minute inclusive window, the
        // oldest sample has rolled off but four still fit.
        assert_eq!(ring.len(), 4);
    }

    #[tokio::test]
    async fn test_label_maps_from_momentum() {
        // Strongly negative momentum drives the price score bearish.
        let f = fixture(vec![]);
        let t0 = Utc.with_ymd_and_hms(2026, 7, 29, 3, 45, 0).unwrap();
        let mut candles: Vec<_> = (0..29)
            .map(|i| {
                let c = if i % 2 == 0 { dec!(98) } else { dec!(102) };
                fixtures::candle(
                    "NSE_INDEX|Nifty 50",
                    t0 + chrono::Duration::minutes(5 * i),
                    c,
                    c + dec!(1),
                    c - dec!(1),
                    c,
                )
            })
            .collect();
        let last = Decimal::from_f64(94.0).unwrap();
        candles.push(fixtures::candle(
            "NSE_INDEX|Nifty 50",
            t0 + chrono::Duration::minutes(5 * 29),
            last,
            last + dec!(1),
            last - dec!(1),
            last,
        ));
        f.gateway
            .set_candles("NSE_INDEX|Nifty 50", Timeframe::FiveMin, candles)
            .await;

        let snapshot = f.service.refresh().await.unwrap();
        assert!(snapshot.score < 50.0);
    }
}
