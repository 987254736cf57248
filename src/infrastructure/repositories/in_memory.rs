//! Thread-safe in-memory implementations of the repository traits.
//! Used by tests and mock mode; production wires the SQLite versions.

use crate::domain::advice::{Advice, AdviceStatus};
use crate::domain::market::{Candle, Tick};
use crate::domain::option_chain::OptionChainAnalytics;
use crate::domain::order::Order;
use crate::domain::outbox::OutboxEvent;
use crate::domain::repositories::{
    AdviceRepository, AnalyticsRepository, CandleRepository, OrderRepository, OutboxRepository,
    RiskRepository, SentimentRepository, SignalRepository, TickRepository,
};
use crate::domain::risk::{RiskConfig, RiskEvent, RiskSnapshot};
use crate::domain::sentiment::MarketSentimentSnapshot;
use crate::domain::signal::MarketSignalRecord;
use crate::domain::types::TxnType;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Default)]
pub struct InMemoryCandleRepository {
    rows: RwLock<HashMap<(String, String), Vec<Candle>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn save(&self, timeframe: &str, candle: &Candle) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let series = rows
            .entry((candle.symbol.clone(), timeframe.to_string()))
            .or_default();
        if let Some(last) = series.last() {
            if candle.open_time <= last.open_time {
                warn!(
                    "CandleRepository: rejected non-monotonic write for {} ({} <= {})",
                    candle.symbol, candle.open_time, last.open_time
                );
                return Ok(false);
            }
        }
        series.push(candle.clone());
        Ok(true)
    }

    async fn latest(&self, symbol: &str, timeframe: &str) -> Result<Option<Candle>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(symbol.to_string(), timeframe.to_string()))
            .and_then(|s| s.last().cloned()))
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(symbol.to_string(), timeframe.to_string()))
            .map(|s| {
                s.iter()
                    .filter(|c| c.open_time >= from && c.open_time <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryTickRepository {
    rows: RwLock<Vec<Tick>>,
}

impl InMemoryTickRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TickRepository for InMemoryTickRepository {
    async fn append(&self, tick: &Tick) -> Result<()> {
        self.rows.write().await.push(tick.clone());
        Ok(())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<Tick>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|t| t.symbol == symbol)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryAdviceRepository {
    rows: RwLock<Vec<Advice>>,
}

impl InMemoryAdviceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdviceRepository for InMemoryAdviceRepository {
    async fn insert(&self, advice: &Advice) -> Result<()> {
        self.rows.write().await.push(advice.clone());
        Ok(())
    }

    async fn update(&self, advice: &Advice) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|a| a.id == advice.id) {
            Some(slot) => {
                *slot = advice.clone();
                Ok(())
            }
            None => anyhow::bail!("advice {} not found", advice.id),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Advice>> {
        Ok(self.rows.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Advice>> {
        let rows = self.rows.read().await;
        let mut pending: Vec<Advice> = rows
            .iter()
            .filter(|a| a.status == AdviceStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn find_open_for(
        &self,
        instrument_token: &str,
        txn_type: TxnType,
    ) -> Result<Vec<Advice>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|a| {
                a.instrument_token == instrument_token
                    && a.txn_type == txn_type
                    && !a.is_terminal()
                    && a.status != AdviceStatus::Executed
                    && a.status != AdviceStatus::PartiallyFilled
            })
            .cloned()
            .collect())
    }

    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Advice>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|a| {
                matches!(
                    a.status,
                    AdviceStatus::Pending | AdviceStatus::Validated | AdviceStatus::Queued
                ) && a.is_expired(now)
            })
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: AdviceStatus) -> Result<usize> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|a| a.status == status)
            .count())
    }

    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<Advice>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|a| a.created_at >= since)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    rows: RwLock<Vec<Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn upsert(&self, order: &Order) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows
            .iter_mut()
            .find(|o| o.broker_order_id == order.broker_order_id)
        {
            Some(slot) => *slot = order.clone(),
            None => rows.push(order.clone()),
        }
        Ok(())
    }

    async fn get(&self, broker_order_id: &str) -> Result<Option<Order>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .find(|o| o.broker_order_id == broker_order_id)
            .cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryRiskRepository {
    config: RwLock<Option<RiskConfig>>,
    snapshots: RwLock<Vec<RiskSnapshot>>,
    events: RwLock<Vec<RiskEvent>>,
}

impl InMemoryRiskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskRepository for InMemoryRiskRepository {
    async fn current_config(&self) -> Result<Option<RiskConfig>> {
        Ok(self.config.read().await.clone())
    }

    async fn save_config(&self, config: &RiskConfig) -> Result<()> {
        *self.config.write().await = Some(config.clone());
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
        self.snapshots.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<RiskSnapshot>> {
        Ok(self.snapshots.read().await.last().cloned())
    }

    async fn append_event(&self, event: &RiskEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<RiskEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.ts >= since)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemorySentimentRepository {
    rows: RwLock<Vec<MarketSentimentSnapshot>>,
}

impl InMemorySentimentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SentimentRepository for InMemorySentimentRepository {
    async fn save(&self, snapshot: &MarketSentimentSnapshot) -> Result<()> {
        self.rows.write().await.push(snapshot.clone());
        Ok(())
    }

    async fn latest(&self) -> Result<Option<MarketSentimentSnapshot>> {
        Ok(self.rows.read().await.last().cloned())
    }

    async fn history(&self, limit: usize) -> Result<Vec<MarketSentimentSnapshot>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemorySignalRepository {
    rows: RwLock<Vec<MarketSignalRecord>>,
}

impl InMemorySignalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalRepository for InMemorySignalRepository {
    async fn save(&self, record: &MarketSignalRecord) -> Result<()> {
        self.rows.write().await.push(record.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MarketSignalRecord>> {
        let rows = self.rows.read().await;
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryAnalyticsRepository {
    rows: RwLock<Vec<OptionChainAnalytics>>,
}

impl InMemoryAnalyticsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalyticsRepository for InMemoryAnalyticsRepository {
    async fn save(&self, analytics: &OptionChainAnalytics) -> Result<()> {
        self.rows.write().await.push(analytics.clone());
        Ok(())
    }

    async fn latest(
        &self,
        underlying_key: &str,
        expiry: NaiveDate,
    ) -> Result<Option<OptionChainAnalytics>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .rev()
            .find(|a| a.underlying_key == underlying_key && a.expiry == expiry)
            .cloned())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| r.calculated_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    rows: RwLock<Vec<OutboxEvent>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn enqueue(&self, event: &OutboxEvent) -> Result<()> {
        self.rows.write().await.push(event.clone());
        Ok(())
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = self.rows.read().await;
        let mut unpublished: Vec<OutboxEvent> =
            rows.iter().filter(|e| !e.published).cloned().collect();
        unpublished.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        unpublished.truncate(limit);
        Ok(unpublished)
    }

    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|e| e.id == id) {
            Some(event) => {
                event.published = true;
                event.published_at = Some(at);
                Ok(())
            }
            None => anyhow::bail!("outbox event {} not found", id),
        }
    }
}
