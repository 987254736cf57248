//! Application wiring: build every service against the configured
//! infrastructure and start the worker tasks.

use crate::application::advice::{AdviceConfig, AdviceService};
use crate::application::decision::{DecisionConfig, DecisionService};
use crate::application::engine::{EngineConfig, EngineLoop};
use crate::application::market_data::{MarketDataConfig, MarketDataService};
use crate::application::option_chain::OptionChainAnalyticsService;
use crate::application::orders::{OrdersConfig, OrdersService};
use crate::application::outbox::OutboxRelay;
use crate::application::risk::RiskService;
use crate::application::sentiment::{SentimentConfig, SentimentService};
use crate::application::signals::{PcrSignalTemplate, PcrThresholds};
use crate::application::token_refresh::{TokenRefreshConfig, TokenRefreshJob};
use crate::config::{Config, Mode};
use crate::domain::ports::{BrokerGateway, Clock, FastStateStore, SystemClock};
use crate::domain::repositories::{
    AdviceRepository, AnalyticsRepository, CandleRepository, OrderRepository, OutboxRepository,
    RiskRepository, SentimentRepository, SignalRepository, TickRepository,
};
use crate::domain::sentiment::SentimentProvider;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::memory_store::InMemoryStateStore;
use crate::infrastructure::mock::MockBrokerGateway;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::Database;
use crate::infrastructure::persistence::repositories::{
    SqliteAdviceRepository, SqliteAnalyticsRepository, SqliteCandleRepository,
    SqliteOrderRepository, SqliteOutboxRepository, SqliteRiskRepository,
    SqliteSentimentRepository, SqliteSignalRepository, SqliteTickRepository,
};
use crate::infrastructure::repositories::in_memory::{
    InMemoryAdviceRepository, InMemoryAnalyticsRepository, InMemoryCandleRepository,
    InMemoryOrderRepository, InMemoryOutboxRepository, InMemoryRiskRepository,
    InMemorySentimentRepository, InMemorySignalRepository, InMemoryTickRepository,
};
use crate::infrastructure::sentiment::{RssNewsSentimentProvider, SocialApiSentimentProvider};
use crate::infrastructure::upstox::UpstoxGateway;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

struct Repositories {
    candles: Arc<dyn CandleRepository>,
    ticks: Arc<dyn TickRepository>,
    advices: Arc<dyn AdviceRepository>,
    orders: Arc<dyn OrderRepository>,
    risk: Arc<dyn RiskRepository>,
    sentiment: Arc<dyn SentimentRepository>,
    signals: Arc<dyn SignalRepository>,
    analytics: Arc<dyn AnalyticsRepository>,
    outbox: Arc<dyn OutboxRepository>,
}

async fn build_repositories(config: &Config) -> Result<Repositories> {
    match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            Ok(Repositories {
                candles: Arc::new(SqliteCandleRepository::new(db.clone())),
                ticks: Arc::new(SqliteTickRepository::new(db.clone())),
                advices: Arc::new(SqliteAdviceRepository::new(db.clone())),
                orders: Arc::new(SqliteOrderRepository::new(db.clone())),
                risk: Arc::new(SqliteRiskRepository::new(db.clone())),
                sentiment: Arc::new(SqliteSentimentRepository::new(db.clone())),
                signals: Arc::new(SqliteSignalRepository::new(db.clone())),
                analytics: Arc::new(SqliteAnalyticsRepository::new(db.clone())),
                outbox: Arc::new(SqliteOutboxRepository::new(db)),
            })
        }
        None => {
            info!("Application: no DATABASE_URL, using in-memory repositories");
            Ok(Repositories {
                candles: Arc::new(InMemoryCandleRepository::new()),
                ticks: Arc::new(InMemoryTickRepository::new()),
                advices: Arc::new(InMemoryAdviceRepository::new()),
                orders: Arc::new(InMemoryOrderRepository::new()),
                risk: Arc::new(InMemoryRiskRepository::new()),
                sentiment: Arc::new(InMemorySentimentRepository::new()),
                signals: Arc::new(InMemorySignalRepository::new()),
                analytics: Arc::new(InMemoryAnalyticsRepository::new()),
                outbox: Arc::new(InMemoryOutboxRepository::new()),
            })
        }
    }
}

fn build_gateway(config: &Config, clock: Arc<dyn Clock>) -> Arc<dyn BrokerGateway> {
    match config.mode {
        Mode::Mock => Arc::new(MockBrokerGateway::new()),
        Mode::Upstox => Arc::new(UpstoxGateway::new(
            config.upstox_base_url.clone(),
            config.upstox_api_key.clone(),
            config.upstox_api_secret.clone(),
            config.upstox_refresh_token.clone(),
            config.upstox_access_token.clone(),
            clock,
        )),
    }
}

fn build_sentiment_providers(config: &Config) -> Vec<Arc<dyn SentimentProvider>> {
    let mut providers: Vec<Arc<dyn SentimentProvider>> = Vec::new();
    if let Some(url) = &config.news_rss_url {
        providers.push(Arc::new(RssNewsSentimentProvider::new(url.clone(), 25)));
    }
    if config.social_api_enabled {
        if let (Some(url), Some(key)) = (&config.social_api_url, &config.social_api_key) {
            providers.push(Arc::new(SocialApiSentimentProvider::new(
                url.clone(),
                key.clone(),
                config.social_search_keywords.clone(),
            )));
        }
    }
    providers
}

/// Handles to the running system, for the binary and for tests.
pub struct SystemHandle {
    pub engine: Arc<EngineLoop>,
    pub bus: EventBus,
    pub metrics: Metrics,
    tasks: Vec<JoinHandle<()>>,
}

impl SystemHandle {
    /// Stop the engine cooperatively and abort the background workers.
    pub fn shutdown(&self) {
        self.engine.stop();
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct Application {
    pub config: Config,
    pub bus: EventBus,
    pub metrics: Metrics,
    pub engine: Arc<EngineLoop>,
    pub market_data: Arc<MarketDataService>,
    pub sentiment: Arc<SentimentService>,
    pub advice: Arc<AdviceService>,
    pub decision: Arc<DecisionService>,
    pub chain: Arc<OptionChainAnalyticsService>,
    relay: Arc<OutboxRelay>,
    token_refresh: Arc<TokenRefreshJob>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building application (mode: {:?})...", config.mode);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Metrics::new()?;
        let bus = EventBus::default();
        let kv: Arc<dyn FastStateStore> = Arc::new(InMemoryStateStore::new(clock.clone()));
        let repos = build_repositories(&config).await?;
        let gateway = build_gateway(&config, clock.clone());

        let market_data = Arc::new(MarketDataService::new(
            gateway.clone(),
            kv.clone(),
            repos.candles.clone(),
            repos.ticks.clone(),
            repos.signals.clone(),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            MarketDataConfig {
                instrument_key: config.instrument_key.clone(),
                vol_spike_atr_jump_pct: config.vol_spike_atr_jump_pct,
            },
        ));

        let chain = Arc::new(OptionChainAnalyticsService::new(
            gateway.clone(),
            kv.clone(),
            repos.analytics.clone(),
            clock.clone(),
        ));

        let risk = Arc::new(RiskService::new(
            repos.risk.clone(),
            kv.clone(),
            clock.clone(),
            metrics.clone(),
        ));

        let orders = Arc::new(OrdersService::new(
            gateway.clone(),
            risk.clone(),
            kv.clone(),
            repos.orders.clone(),
            repos.outbox.clone(),
            clock.clone(),
            metrics.clone(),
            OrdersConfig {
                lot_size: config.lot_size,
                max_spread_pct: config.max_spread_pct,
            },
        ));

        let advice = Arc::new(AdviceService::new(
            repos.advices.clone(),
            orders,
            repos.outbox.clone(),
            clock.clone(),
            metrics.clone(),
            AdviceConfig {
                slippage_guard_enabled: config.slippage_guard_enabled,
            },
        ));

        let sentiment = Arc::new(SentimentService::new(
            build_sentiment_providers(&config),
            market_data.clone(),
            repos.sentiment.clone(),
            repos.outbox.clone(),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            SentimentConfig::default(),
        ));

        let decision = Arc::new(DecisionService::new(
            market_data.clone(),
            chain.clone(),
            gateway.clone(),
            Arc::new(PcrSignalTemplate::new(PcrThresholds::default())),
            repos.sentiment.clone(),
            repos.advices.clone(),
            repos.signals.clone(),
            risk.clone(),
            kv.clone(),
            repos.outbox.clone(),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            DecisionConfig {
                lot_size: config.lot_size,
                ..DecisionConfig::default()
            },
        ));

        let engine = Arc::new(EngineLoop::new(
            market_data.clone(),
            decision.clone(),
            risk.clone(),
            sentiment.clone(),
            advice.clone(),
            repos.advices.clone(),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
            EngineConfig {
                tick_ms: config.engine_tick_ms,
                max_exec_per_tick: config.max_exec_per_tick,
                scan_limit: config.scan_limit,
            },
        ));

        let relay = Arc::new(OutboxRelay::new(
            repos.outbox.clone(),
            bus.clone(),
            clock.clone(),
            metrics.clone(),
        ));

        let token_refresh = Arc::new(TokenRefreshJob::new(
            gateway,
            repos.outbox.clone(),
            clock,
            TokenRefreshConfig {
                enabled: config.refresh_enabled,
                run_on_startup: config.refresh_on_startup,
                hour_ist: config.refresh_hour_ist,
                minute_ist: config.refresh_minute_ist,
            },
        ));

        Ok(Self {
            config,
            bus,
            metrics,
            engine,
            market_data,
            sentiment,
            advice,
            decision,
            chain,
            relay,
            token_refresh,
        })
    }

    /// Spawn every worker and start the engine loop.
    pub async fn start(&self) -> Result<SystemHandle> {
        let mut tasks = Vec::new();

        self.engine.start();
        tasks.push(tokio::spawn(self.engine.clone().run()));

        tasks.push(tokio::spawn(self.relay.clone().run(Duration::from_millis(
            self.config.outbox_poll_ms,
        ))));

        let market_data = self.market_data.clone();
        let signals_every = Duration::from_millis(self.config.signals_refresh_ms);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(signals_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                market_data.broadcast_signals_tick().await;
            }
        }));

        let market_data = self.market_data.clone();
        let candles_every = Duration::from_millis(self.config.candles_refresh_ms);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(candles_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = market_data.ingest_latest_1m_candle().await {
                    tracing::warn!("candle ingest failed: {:#}", e);
                }
            }
        }));

        let sentiment = self.sentiment.clone();
        let sentiment_every = Duration::from_millis(self.config.sentiment_refresh_ms);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sentiment_every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = sentiment.refresh().await {
                    tracing::warn!("sentiment refresh failed: {:#}", e);
                }
            }
        }));

        let advice = self.advice.clone();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = advice.sweep_expired().await {
                    tracing::warn!("expiry sweep failed: {:#}", e);
                }
            }
        }));

        let decision = self.decision.clone();
        let chain = self.chain.clone();
        let retention_days = self.config.retention_days;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = decision.maybe_optimize_daily().await {
                    tracing::warn!("daily optimisation failed: {:#}", e);
                }
                if let Err(e) = chain.purge(retention_days).await {
                    tracing::warn!("analytics purge failed: {:#}", e);
                }
            }
        }));

        tasks.push(tokio::spawn(self.token_refresh.clone().run()));

        info!("Application: {} worker tasks started", tasks.len());
        Ok(SystemHandle {
            engine: self.engine.clone(),
            bus: self.bus.clone(),
            metrics: self.metrics.clone(),
            tasks,
        })
    }
}
