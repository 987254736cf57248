//! Capability ports the application layer depends on. Infrastructure
//! provides the implementations; tests substitute mocks and manual clocks.

use crate::domain::errors::EngineResult;
use crate::domain::market::{Candle, OhlcQuote, Timeframe};
use crate::domain::option_chain::{Greeks, OptionLeg};
use crate::domain::order::{
    CancelOrderResponse, ModifyOrderRequest, ModifyOrderResponse, Order, PlaceOrderRequest,
    PlaceOrderResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

/// Time source. Production wires [`SystemClock`]; tests drive a manual one
/// so TTLs, market hours and expiries are deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Typed broker operations. Implementations own session state and must
/// enforce a per-request timeout of at most 10 seconds; the engine loop is
/// never blocked indefinitely.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    async fn place_order(&self, req: &PlaceOrderRequest) -> EngineResult<PlaceOrderResponse>;

    async fn modify_order(&self, req: &ModifyOrderRequest) -> EngineResult<ModifyOrderResponse>;

    async fn cancel_order(&self, order_id: &str) -> EngineResult<CancelOrderResponse>;

    async fn get_order_details(&self, order_id: &str) -> EngineResult<Order>;

    async fn get_order_history(
        &self,
        order_id: Option<&str>,
        tag: Option<&str>,
    ) -> EngineResult<Vec<Order>>;

    async fn is_order_working(&self, order_id: &str) -> EngineResult<bool>;

    /// Last traded price for each requested instrument key.
    async fn get_ltp_quote(&self, keys: &[String]) -> EngineResult<HashMap<String, Decimal>>;

    async fn get_market_ohlc_quote(&self, key: &str, timeframe: Timeframe)
        -> EngineResult<OhlcQuote>;

    /// Intraday candles, oldest first; the last row may still be forming.
    async fn get_intraday_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Vec<Candle>>;

    async fn get_historical_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Candle>>;

    /// Option contracts for the underlying, optionally narrowed to one expiry.
    async fn get_option_instruments(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> EngineResult<Vec<OptionLeg>>;

    async fn get_option_greeks(&self, keys: &[String]) -> EngineResult<HashMap<String, Greeks>>;

    /// Top-of-book, if the broker exposes depth for the instrument.
    async fn get_best_bid_ask(&self, key: &str) -> EngineResult<Option<(Decimal, Decimal)>>;

    async fn refresh_access_token(&self) -> EngineResult<()>;

    async fn is_authenticated(&self) -> bool;
}

/// Fast KV with TTL and the two atomic primitives the engine relies on:
/// set-if-absent (idempotency) and create-or-increment (rolling counters).
///
/// `ttl: None` stores without expiry. `incr` applies `ttl_if_new` only when
/// it creates the key, which yields rolling-window counter semantics.
#[async_trait]
pub trait FastStateStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>);

    async fn delete(&self, key: &str);

    /// Returns true iff the key did not previously exist (or had expired).
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool;

    /// Creates the key at 1 (applying `ttl_if_new`) or increments it,
    /// returning the new value.
    async fn incr(&self, key: &str, ttl_if_new: Option<Duration>) -> i64;
}
