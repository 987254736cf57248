//! Deterministic broker gateway and clock for tests and mock mode.
//!
//! The mock gateway is scriptable: tests preload candles, quotes, chains
//! and failure modes, then assert on the orders it recorded.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::market::{Candle, Ohlc, OhlcQuote, Timeframe};
use crate::domain::option_chain::{Greeks, OptionLeg};
use crate::domain::order::{
    CancelOrderResponse, ModifyOrderRequest, ModifyOrderResponse, Order, OrderStatus,
    PlaceOrderRequest, PlaceOrderResponse,
};
use crate::domain::ports::{BrokerGateway, Clock};
use crate::domain::types::{OrderType, Product, TxnType, Validity};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::RwLock;

/// Clock that only moves when told to; drives TTLs, market hours and
/// expiry deterministically in tests.
pub struct ManualClock {
    now: StdMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: StdMutex::new(now),
        }
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(d).unwrap();
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// How the next broker call should fail, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    #[default]
    None,
    BrokerError,
    Timeout,
}

#[derive(Default)]
struct MockState {
    authenticated: bool,
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    ltp: HashMap<String, Decimal>,
    ohlc: HashMap<String, OhlcQuote>,
    bid_ask: HashMap<String, (Decimal, Decimal)>,
    instruments: HashMap<String, Vec<OptionLeg>>,
    greeks: HashMap<String, Greeks>,
    placed: Vec<PlaceOrderRequest>,
    modified: Vec<ModifyOrderRequest>,
    cancelled: Vec<String>,
    next_order_seq: u64,
    place_failure: FailureMode,
    refresh_failure: FailureMode,
}

pub struct MockBrokerGateway {
    state: RwLock<MockState>,
}

impl Default for MockBrokerGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrokerGateway {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockState {
                authenticated: true,
                next_order_seq: 1,
                ..Default::default()
            }),
        }
    }

    pub async fn set_authenticated(&self, authenticated: bool) {
        self.state.write().await.authenticated = authenticated;
    }

    pub async fn set_candles(&self, key: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.state
            .write()
            .await
            .candles
            .insert((key.to_string(), timeframe), candles);
    }

    pub async fn set_ltp(&self, key: &str, ltp: Decimal) {
        self.state.write().await.ltp.insert(key.to_string(), ltp);
    }

    pub async fn set_ohlc_quote(&self, key: &str, quote: OhlcQuote) {
        self.state.write().await.ohlc.insert(key.to_string(), quote);
    }

    pub async fn set_bid_ask(&self, key: &str, bid: Decimal, ask: Decimal) {
        self.state
            .write()
            .await
            .bid_ask
            .insert(key.to_string(), (bid, ask));
    }

    pub async fn set_instruments(&self, underlying: &str, legs: Vec<OptionLeg>) {
        self.state
            .write()
            .await
            .instruments
            .insert(underlying.to_string(), legs);
    }

    pub async fn set_greeks(&self, key: &str, greeks: Greeks) {
        self.state
            .write()
            .await
            .greeks
            .insert(key.to_string(), greeks);
    }

    pub async fn fail_next_place(&self, mode: FailureMode) {
        self.state.write().await.place_failure = mode;
    }

    pub async fn fail_refresh(&self, mode: FailureMode) {
        self.state.write().await.refresh_failure = mode;
    }

    pub async fn placed_orders(&self) -> Vec<PlaceOrderRequest> {
        self.state.read().await.placed.clone()
    }

    pub async fn cancelled_orders(&self) -> Vec<String> {
        self.state.read().await.cancelled.clone()
    }

    fn failure_error(mode: FailureMode) -> Option<EngineError> {
        match mode {
            FailureMode::None => None,
            FailureMode::BrokerError => Some(EngineError::broker("mock broker failure")),
            FailureMode::Timeout => Some(EngineError::BrokerTimeout { millis: 10_000 }),
        }
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn place_order(&self, req: &PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
        let mut state = self.state.write().await;
        if !state.authenticated {
            return Err(EngineError::Unauthenticated);
        }
        let failure = std::mem::take(&mut state.place_failure);
        if let Some(err) = Self::failure_error(failure) {
            return Err(err);
        }
        req.validate()?;
        let seq = state.next_order_seq;
        state.next_order_seq += 1;
        state.placed.push(req.clone());
        Ok(PlaceOrderResponse {
            order_ids: vec![format!("MOCK-{:06}", seq)],
            latency_ms: 5,
        })
    }

    async fn modify_order(&self, req: &ModifyOrderRequest) -> EngineResult<ModifyOrderResponse> {
        let mut state = self.state.write().await;
        if !state.authenticated {
            return Err(EngineError::Unauthenticated);
        }
        req.validate()?;
        state.modified.push(req.clone());
        Ok(ModifyOrderResponse {
            order_id: req.order_id.clone(),
            latency_ms: 4,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> EngineResult<CancelOrderResponse> {
        let mut state = self.state.write().await;
        if !state.authenticated {
            return Err(EngineError::Unauthenticated);
        }
        state.cancelled.push(order_id.to_string());
        Ok(CancelOrderResponse {
            order_id: order_id.to_string(),
            latency_ms: 4,
        })
    }

    async fn get_order_details(&self, order_id: &str) -> EngineResult<Order> {
        let state = self.state.read().await;
        let idx = order_id
            .strip_prefix("MOCK-")
            .and_then(|s| s.parse::<usize>().ok())
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(|| EngineError::not_found(format!("order {}", order_id)))?;
        let req = state
            .placed
            .get(idx)
            .ok_or_else(|| EngineError::not_found(format!("order {}", order_id)))?;
        Ok(Order {
            broker_order_id: order_id.to_string(),
            parent_order_id: None,
            advice_id: req.advice_id.clone(),
            instrument_token: req.instrument_token.clone(),
            symbol: req.symbol.clone(),
            order_type: req.order_type,
            txn_type: req.txn_type,
            qty: req.quantity,
            filled_qty: req.quantity,
            pending_qty: 0,
            product: req.product,
            validity: req.validity,
            price: req.price,
            trigger_price: req.trigger_price,
            status: OrderStatus::Complete,
            average_price: req.price,
            message: None,
            placed_at: Utc::now(),
            updated_at: Utc::now(),
            exchange_ts: None,
        })
    }

    async fn get_order_history(
        &self,
        order_id: Option<&str>,
        _tag: Option<&str>,
    ) -> EngineResult<Vec<Order>> {
        match order_id {
            Some(id) => Ok(vec![self.get_order_details(id).await?]),
            None => Ok(Vec::new()),
        }
    }

    async fn is_order_working(&self, order_id: &str) -> EngineResult<bool> {
        Ok(self.get_order_details(order_id).await.is_ok())
    }

    async fn get_ltp_quote(&self, keys: &[String]) -> EngineResult<HashMap<String, Decimal>> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| state.ltp.get(k).map(|p| (k.clone(), *p)))
            .collect())
    }

    async fn get_market_ohlc_quote(
        &self,
        key: &str,
        _timeframe: Timeframe,
    ) -> EngineResult<OhlcQuote> {
        let state = self.state.read().await;
        state
            .ohlc
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("ohlc quote for {}", key)))
    }

    async fn get_intraday_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
    ) -> EngineResult<Vec<Candle>> {
        let state = self.state.read().await;
        state
            .candles
            .get(&(key.to_string(), timeframe))
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("candles for {}", key)))
    }

    async fn get_historical_candles(
        &self,
        key: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<Vec<Candle>> {
        let all = self.get_intraday_candles(key, timeframe).await?;
        Ok(all
            .into_iter()
            .filter(|c| c.open_time >= from && c.open_time <= to)
            .collect())
    }

    async fn get_option_instruments(
        &self,
        underlying: &str,
        expiry: Option<NaiveDate>,
    ) -> EngineResult<Vec<OptionLeg>> {
        let state = self.state.read().await;
        let legs = state
            .instruments
            .get(underlying)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("chain for {}", underlying)))?;
        Ok(match expiry {
            Some(e) => legs.into_iter().filter(|l| l.expiry == e).collect(),
            None => legs,
        })
    }

    async fn get_option_greeks(&self, keys: &[String]) -> EngineResult<HashMap<String, Greeks>> {
        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| state.greeks.get(k).map(|g| (k.clone(), *g)))
            .collect())
    }

    async fn get_best_bid_ask(&self, key: &str) -> EngineResult<Option<(Decimal, Decimal)>> {
        Ok(self.state.read().await.bid_ask.get(key).copied())
    }

    async fn refresh_access_token(&self) -> EngineResult<()> {
        let mut state = self.state.write().await;
        let failure = std::mem::take(&mut state.refresh_failure);
        match Self::failure_error(failure) {
            Some(err) => Err(err),
            None => {
                state.authenticated = true;
                Ok(())
            }
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.state.read().await.authenticated
    }
}

/// Builders for chain/candle fixtures shared across tests.
pub mod fixtures {
    use super::*;
    use crate::domain::option_chain::OptionType;

    pub fn candle(
        symbol: &str,
        open_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    ) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            open_time,
            open,
            high,
            low,
            close,
            volume: 100_000,
        }
    }

    pub fn ohlc_quote(close: Decimal, ts: DateTime<Utc>) -> OhlcQuote {
        let bar = Ohlc {
            open: close,
            high: close,
            low: close,
            close,
            volume: 10_000,
            ts,
        };
        OhlcQuote {
            ohlc: bar.clone(),
            prev_ohlc: None,
            live_ohlc: Some(bar),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn leg(
        underlying: &str,
        strike: i64,
        option_type: OptionType,
        expiry: NaiveDate,
        oi: f64,
        volume: f64,
        greeks: Option<Greeks>,
    ) -> OptionLeg {
        OptionLeg {
            instrument_key: format!("NSE_FO|{}{}{}", underlying, strike, option_type),
            symbol: format!("{}{}{}", underlying, strike, option_type),
            strike: Decimal::from(strike),
            option_type,
            expiry,
            oi,
            volume,
            ltp: None,
            greeks,
        }
    }

    pub fn market_order(token: &str, symbol: &str, txn: TxnType, qty: i64) -> PlaceOrderRequest {
        PlaceOrderRequest {
            instrument_token: token.to_string(),
            symbol: symbol.to_string(),
            txn_type: txn,
            order_type: OrderType::Market,
            quantity: qty,
            product: Product::Mis,
            validity: Validity::Day,
            price: None,
            trigger_price: None,
            is_amo: false,
            slice: false,
            tag: None,
            disclosed_quantity: None,
            advice_id: None,
        }
    }
}
