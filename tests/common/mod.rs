//! Shared end-to-end fixture: every service wired against the mock
//! broker gateway, in-memory repositories and a manual clock.
#![allow(dead_code)]

use chrono::{NaiveDate, TimeZone, Utc};
use optra::application::advice::{AdviceConfig, AdviceService};
use optra::application::decision::{DecisionConfig, DecisionService};
use optra::application::engine::{EngineConfig, EngineLoop};
use optra::application::market_data::{MarketDataConfig, MarketDataService};
use optra::application::option_chain::OptionChainAnalyticsService;
use optra::domain::ports::Clock;
use optra::application::orders::{OrdersConfig, OrdersService};
use optra::application::outbox::OutboxRelay;
use optra::application::risk::RiskService;
use optra::application::sentiment::{SentimentConfig, SentimentService};
use optra::application::signals::PcrSignalTemplate;
use optra::domain::market::{Candle, Timeframe};
use optra::domain::option_chain::OptionType;
use optra::domain::repositories::SentimentRepository;
use optra::domain::sentiment::{MarketSentimentSnapshot, SentimentLabel};
use optra::infrastructure::event_bus::EventBus;
use optra::infrastructure::memory_store::InMemoryStateStore;
use optra::infrastructure::mock::{ManualClock, MockBrokerGateway, fixtures};
use optra::infrastructure::observability::Metrics;
use optra::infrastructure::repositories::in_memory::*;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;

pub const UNDERLYING: &str = "NSE_INDEX|Nifty 50";

pub struct World {
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<MockBrokerGateway>,
    pub kv: Arc<InMemoryStateStore>,
    pub advices: Arc<InMemoryAdviceRepository>,
    pub orders_repo: Arc<InMemoryOrderRepository>,
    pub risk_repo: Arc<InMemoryRiskRepository>,
    pub sentiments: Arc<InMemorySentimentRepository>,
    pub signals: Arc<InMemorySignalRepository>,
    pub outbox: Arc<InMemoryOutboxRepository>,
    pub bus: EventBus,
    pub metrics: Metrics,
    pub market_data: Arc<MarketDataService>,
    pub risk: Arc<RiskService>,
    pub orders: Arc<OrdersService>,
    pub advice: Arc<AdviceService>,
    pub sentiment: Arc<SentimentService>,
    pub decision: Arc<DecisionService>,
    pub engine: Arc<EngineLoop>,
    pub relay: Arc<OutboxRelay>,
}

/// Wednesday 2026-07-29, 10:30 IST: market open.
pub fn market_open_instant() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 29, 5, 0, 0).unwrap()
}

pub fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
}

pub fn world() -> World {
    world_with(DecisionConfig::default(), AdviceConfig {
        slippage_guard_enabled: false,
    })
}

pub fn world_with(decision_config: DecisionConfig, advice_config: AdviceConfig) -> World {
    let clock = Arc::new(ManualClock::at(market_open_instant()));
    let gateway = Arc::new(MockBrokerGateway::new());
    let kv = Arc::new(InMemoryStateStore::new(clock.clone()));
    let metrics = Metrics::new().unwrap();
    let bus = EventBus::default();

    let candles = Arc::new(InMemoryCandleRepository::new());
    let ticks = Arc::new(InMemoryTickRepository::new());
    let signals = Arc::new(InMemorySignalRepository::new());
    let market_data = Arc::new(MarketDataService::new(
        gateway.clone(),
        kv.clone(),
        candles,
        ticks,
        signals.clone(),
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

    let risk_repo = Arc::new(InMemoryRiskRepository::new());
    let risk = Arc::new(RiskService::new(
        risk_repo.clone(),
        kv.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    let orders_repo = Arc::new(InMemoryOrderRepository::new());
    let outbox = Arc::new(InMemoryOutboxRepository::new());
    let orders = Arc::new(OrdersService::new(
        gateway.clone(),
        risk.clone(),
        kv.clone(),
        orders_repo.clone(),
        outbox.clone(),
        clock.clone(),
        metrics.clone(),
        OrdersConfig::default(),
    ));

    let advices = Arc::new(InMemoryAdviceRepository::new());
    let advice = Arc::new(AdviceService::new(
        advices.clone(),
        orders.clone(),
        outbox.clone(),
        clock.clone(),
        metrics.clone(),
        advice_config,
    ));

    let sentiments = Arc::new(InMemorySentimentRepository::new());
    let sentiment = Arc::new(SentimentService::new(
        Vec::new(),
        market_data.clone(),
        sentiments.clone(),
        outbox.clone(),
        bus.clone(),
        clock.clone(),
        metrics.clone(),
        SentimentConfig::default(),
    ));

    let decision = Arc::new(DecisionService::new(
        market_data.clone(),
        chain,
        gateway.clone(),
        Arc::new(PcrSignalTemplate::default()),
        sentiments.clone(),
        advices.clone(),
        signals.clone(),
        risk.clone(),
        kv.clone(),
        outbox.clone(),
        bus.clone(),
        clock.clone(),
        metrics.clone(),
        decision_config,
    ));

    let engine = Arc::new(EngineLoop::new(
        market_data.clone(),
        decision.clone(),
        risk.clone(),
        sentiment.clone(),
        advice.clone(),
        advices.clone(),
        bus.clone(),
        clock.clone(),
        metrics.clone(),
        EngineConfig::default(),
    ));

    let relay = Arc::new(OutboxRelay::new(
        outbox.clone(),
        bus.clone(),
        clock.clone(),
        metrics.clone(),
    ));

    World {
        clock,
        gateway,
        kv,
        advices,
        orders_repo,
        risk_repo,
        sentiments,
        signals,
        outbox,
        bus,
        metrics,
        market_data,
        risk,
        orders,
        advice,
        sentiment,
        decision,
        engine,
        relay,
    }
}

/// Load a 5-minute series whose closes alternate 98/102-style around
/// `base`, with an overridden final close, so the z-score is controllable.
pub async fn load_alternating_5m(world: &World, base: f64, amplitude: f64, last_close: f64) {
    let t0 = market_open_instant() - chrono::Duration::minutes(150);
    let mut candles: Vec<Candle> = (0..29)
        .map(|i| {
            let c = if i % 2 == 0 {
                base - amplitude
            } else {
                base + amplitude
            };
            let d = Decimal::from_f64(c).unwrap();
            fixtures::candle(
                UNDERLYING,
                t0 + chrono::Duration::minutes(5 * i),
                d,
                d + Decimal::ONE,
                d - Decimal::ONE,
                d,
            )
        })
        .collect();
    let last = Decimal::from_f64(last_close).unwrap();
    candles.push(fixtures::candle(
        UNDERLYING,
        t0 + chrono::Duration::minutes(5 * 29),
        last,
        last + Decimal::ONE,
        last - Decimal::ONE,
        last,
    ));
    world
        .gateway
        .set_candles(UNDERLYING, Timeframe::FiveMin, candles)
        .await;
}

/// Seed a happy-path world: bullish tape, sentiment 62, OI and volume
/// PCR at 0.7, an ATM strike pair, and a live quote.
pub async fn seed_bullish_world(world: &World) {
    load_alternating_5m(world, 24500.0, 20.0, 24560.0).await;

    world
        .gateway
        .set_ohlc_quote(
            UNDERLYING,
            fixtures::ohlc_quote(Decimal::from(24560), world.clock.now()),
        )
        .await;

    // OI PCR = 70/100, volume PCR = 28/40 = 0.7 on both ATM strikes.
    world
        .gateway
        .set_instruments(
            UNDERLYING,
            vec![
                fixtures::leg("NIFTY", 24550, OptionType::Ce, expiry(), 100.0, 40.0, None),
                fixtures::leg("NIFTY", 24550, OptionType::Pe, expiry(), 70.0, 28.0, None),
                fixtures::leg("NIFTY", 24600, OptionType::Ce, expiry(), 90.0, 36.0, None),
                fixtures::leg("NIFTY", 24600, OptionType::Pe, expiry(), 63.0, 25.2, None),
            ],
        )
        .await;

    world
        .sentiments
        .save(&MarketSentimentSnapshot {
            as_of: world.clock.now(),
            score: 62.0,
            confidence: Some(80.0),
            prediction_accuracy: None,
            sentiment: SentimentLabel::Bullish,
        })
        .await
        .unwrap();
}
