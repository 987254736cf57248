//! Repository contracts for the durable aggregates. Infrastructure ships
//! both SQLite and in-memory implementations; the application layer only
//! sees these traits.

use crate::domain::advice::{Advice, AdviceStatus};
use crate::domain::market::{Candle, Tick};
use crate::domain::option_chain::OptionChainAnalytics;
use crate::domain::order::Order;
use crate::domain::outbox::OutboxEvent;
use crate::domain::risk::{RiskConfig, RiskEvent, RiskSnapshot};
use crate::domain::sentiment::MarketSentimentSnapshot;
use crate::domain::signal::MarketSignalRecord;
use crate::domain::types::TxnType;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Persisted candles, monotonic per `(symbol, timeframe)`.
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Persists the candle unless its open time does not advance the
    /// series; returns false when the write was skipped.
    async fn save(&self, timeframe: &str, candle: &Candle) -> Result<bool>;

    async fn latest(&self, symbol: &str, timeframe: &str) -> Result<Option<Candle>>;

    /// Rows in `[from, to]`, oldest first.
    async fn range(
        &self,
        symbol: &str,
        timeframe: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait TickRepository: Send + Sync {
    async fn append(&self, tick: &Tick) -> Result<()>;

    async fn latest(&self, symbol: &str) -> Result<Option<Tick>>;
}

#[async_trait]
pub trait AdviceRepository: Send + Sync {
    async fn insert(&self, advice: &Advice) -> Result<()>;

    async fn update(&self, advice: &Advice) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Advice>>;

    /// Pending advices, newest first, up to `limit`.
    async fn find_pending(&self, limit: usize) -> Result<Vec<Advice>>;

    /// Non-terminal advices for the instrument in the given direction.
    async fn find_open_for(&self, instrument_token: &str, txn_type: TxnType)
        -> Result<Vec<Advice>>;

    /// Advices whose expiry has passed while still awaiting execution.
    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Advice>>;

    async fn count_by_status(&self, status: AdviceStatus) -> Result<usize>;

    /// Advices created at or after `since`, any status.
    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<Advice>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn upsert(&self, order: &Order) -> Result<()>;

    async fn get(&self, broker_order_id: &str) -> Result<Option<Order>>;

    async fn recent(&self, limit: usize) -> Result<Vec<Order>>;
}

/// Risk config (singleton-most-recent), per-tick snapshots and the
/// append-only audit of gate decisions.
#[async_trait]
pub trait RiskRepository: Send + Sync {
    async fn current_config(&self) -> Result<Option<RiskConfig>>;

    async fn save_config(&self, config: &RiskConfig) -> Result<()>;

    async fn save_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()>;

    async fn latest_snapshot(&self) -> Result<Option<RiskSnapshot>>;

    async fn append_event(&self, event: &RiskEvent) -> Result<()>;

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<RiskEvent>>;
}

#[async_trait]
pub trait SentimentRepository: Send + Sync {
    async fn save(&self, snapshot: &MarketSentimentSnapshot) -> Result<()>;

    async fn latest(&self) -> Result<Option<MarketSentimentSnapshot>>;

    async fn history(&self, limit: usize) -> Result<Vec<MarketSentimentSnapshot>>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn save(&self, record: &MarketSignalRecord) -> Result<()>;

    async fn recent(&self, limit: usize) -> Result<Vec<MarketSignalRecord>>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn save(&self, analytics: &OptionChainAnalytics) -> Result<()>;

    async fn latest(
        &self,
        underlying_key: &str,
        expiry: NaiveDate,
    ) -> Result<Option<OptionChainAnalytics>>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(&self, event: &OutboxEvent) -> Result<()>;

    /// Unpublished rows, oldest first, up to `limit`.
    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>>;

    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}
