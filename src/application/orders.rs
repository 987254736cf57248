//! Order write path: idempotency guard, risk gate, market-hours/AMO gate,
//! broker call, then side effects (rate counter, order row, outbox event).

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::market::Timeframe;
use crate::domain::market_hours;
use crate::domain::order::{
    CancelOrderResponse, ModifyOrderRequest, ModifyOrderResponse, Order, OrderStatus,
    PlaceOrderRequest, PlaceOrderResponse,
};
use crate::domain::outbox::{OutboxEvent, topics};
use crate::domain::ports::{BrokerGateway, Clock, FastStateStore};
use crate::domain::repositories::{OrderRepository, OutboxRepository};
use crate::domain::risk::OrderIntent;
use crate::application::risk::RiskService;
use crate::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const IDEMPOTENCY_TTL: Duration = Duration::from_secs(120);
const WORKING_ORDER_TTL: Duration = Duration::from_secs(120 * 60);

#[derive(Debug, Clone)]
pub struct OrdersConfig {
    /// Contract lot size used to express quantity as lots for the gate.
    pub lot_size: i64,
    /// Spread ceiling for the preflight guard, percent of mid.
    pub max_spread_pct: f64,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            lot_size: 75,
            max_spread_pct: 0.35,
        }
    }
}

pub struct OrdersService {
    gateway: Arc<dyn BrokerGateway>,
    risk: Arc<RiskService>,
    kv: Arc<dyn FastStateStore>,
    orders: Arc<dyn OrderRepository>,
    outbox: Arc<dyn OutboxRepository>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    config: OrdersConfig,
}

impl OrdersService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        risk: Arc<RiskService>,
        kv: Arc<dyn FastStateStore>,
        orders: Arc<dyn OrderRepository>,
        outbox: Arc<dyn OutboxRepository>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: OrdersConfig,
    ) -> Self {
        Self {
            gateway,
            risk,
            kv,
            orders,
            outbox,
            clock,
            metrics,
            config,
        }
    }

    /// Estimate the intent notional: explicit price, else trigger, else a
    /// best-effort LTP lookup.
    async fn intent_notional(&self, req: &PlaceOrderRequest) -> Decimal {
        let unit = if let Some(price) = req.price.or(req.trigger_price) {
            price
        } else {
            self.gateway
                .get_ltp_quote(&[req.instrument_token.clone()])
                .await
                .ok()
                .and_then(|quotes| quotes.get(&req.instrument_token).copied())
                .unwrap_or(Decimal::ZERO)
        };
        unit * Decimal::from(req.quantity)
    }

    fn intent_lots(&self, quantity: i64) -> u32 {
        if self.config.lot_size <= 0 {
            return 0;
        }
        (quantity / self.config.lot_size).max(1) as u32
    }

    /// Place an order. See the gate order in the module docs; a replayed
    /// identical intent inside the 120 s window returns `DUPLICATE`
    /// without touching risk or the broker.
    pub async fn place_order(&self, req: &PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
        req.validate()?;

        if !self.gateway.is_authenticated().await {
            return Err(EngineError::Unauthenticated);
        }

        // Idempotency claim. SET-IF-ABSENT is the authority; a lost race
        // reports DUPLICATE to exactly one caller.
        let idempotency_key = format!("order:idemp:{}", req.idempotency_key());
        if !self
            .kv
            .set_if_absent(&idempotency_key, "1", Some(IDEMPOTENCY_TTL))
            .await
        {
            info!(
                "OrdersService: duplicate intent for {} suppressed",
                req.symbol
            );
            return Err(EngineError::Duplicate);
        }

        match self.place_claimed(req).await {
            Ok(response) => Ok(response),
            Err(err) => {
                // No order reached the broker; release the claim so a
                // corrected retry is not misreported as DUPLICATE.
                self.kv.delete(&idempotency_key).await;
                Err(err)
            }
        }
    }

    /// The gated tail of `place_order`, entered only with the idempotency
    /// claim held.
    async fn place_claimed(&self, req: &PlaceOrderRequest) -> EngineResult<PlaceOrderResponse> {
        let intent = OrderIntent {
            symbol: req.symbol.clone(),
            notional: self.intent_notional(req).await,
            lots: self.intent_lots(req.quantity),
            is_new_open: true,
            order_ref: req.advice_id.clone(),
        };
        self.risk.check_order(&intent).await?;

        let now = self.clock.now();
        if !market_hours::is_market_open(now) && !req.is_amo {
            return Err(EngineError::MarketClosed);
        }

        let result = self.gateway.place_order(req).await;
        self.risk.note_broker_call(result.is_ok()).await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let side = req.txn_type.to_string();
                self.metrics
                    .orders_total
                    .with_label_values(&[side.as_str(), "failed"])
                    .inc();
                return Err(err);
            }
        };

        let broker_order_id = response
            .order_ids
            .first()
            .cloned()
            .unwrap_or_default();
        self.kv
            .put(
                &format!("order:working:{}", broker_order_id),
                "1",
                Some(WORKING_ORDER_TTL),
            )
            .await;

        self.risk.note_order_placed().await;
        self.risk.note_lots_used(intent.lots).await;
        let side = req.txn_type.to_string();
        self.metrics
            .orders_total
            .with_label_values(&[side.as_str(), "placed"])
            .inc();

        let order = Order {
            broker_order_id: broker_order_id.clone(),
            parent_order_id: None,
            advice_id: req.advice_id.clone(),
            instrument_token: req.instrument_token.clone(),
            symbol: req.symbol.clone(),
            order_type: req.order_type,
            txn_type: req.txn_type,
            qty: req.quantity,
            filled_qty: 0,
            pending_qty: req.quantity,
            product: req.product,
            validity: req.validity,
            price: req.price,
            trigger_price: req.trigger_price,
            status: OrderStatus::Open,
            average_price: None,
            message: None,
            placed_at: now,
            updated_at: now,
            exchange_ts: None,
        };
        if let Err(e) = self.orders.upsert(&order).await {
            warn!("OrdersService: failed to persist order row: {:#}", e);
        }
        if let Err(e) = self
            .outbox
            .enqueue(&OutboxEvent::new(
                now,
                topics::ORDER,
                json!({
                    "event": "order.placed",
                    "symbol": req.symbol,
                    "order_id": broker_order_id,
                    "txn_type": req.txn_type.to_string(),
                    "qty": req.quantity,
                    "advice_id": req.advice_id,
                    "latency_ms": response.latency_ms,
                }),
            ))
            .await
        {
            warn!("OrdersService: failed to enqueue order.placed: {:#}", e);
        }

        info!(
            "OrdersService: placed {} {} x{} -> {}",
            req.txn_type, req.symbol, req.quantity, broker_order_id
        );
        Ok(response)
    }

    /// Modify targets a specific broker order, so no idempotency key; the
    /// market must be open.
    pub async fn modify_order(&self, req: &ModifyOrderRequest) -> EngineResult<ModifyOrderResponse> {
        req.validate()?;
        if !self.gateway.is_authenticated().await {
            return Err(EngineError::Unauthenticated);
        }
        if !market_hours::is_market_open(self.clock.now()) {
            return Err(EngineError::MarketClosed);
        }

        let result = self.gateway.modify_order(req).await;
        self.risk.note_broker_call(result.is_ok()).await;
        let response = result?;

        let now = self.clock.now();
        if let Err(e) = self
            .outbox
            .enqueue(&OutboxEvent::new(
                now,
                topics::ORDER,
                json!({
                    "event": "order.modified",
                    "order_id": response.order_id,
                    "latency_ms": response.latency_ms,
                }),
            ))
            .await
        {
            warn!("OrdersService: failed to enqueue order.modified: {:#}", e);
        }
        Ok(response)
    }

    pub async fn cancel_order(&self, order_id: &str) -> EngineResult<CancelOrderResponse> {
        if order_id.is_empty() {
            return Err(EngineError::bad_request("order id is required"));
        }
        if !self.gateway.is_authenticated().await {
            return Err(EngineError::Unauthenticated);
        }
        if !market_hours::is_market_open(self.clock.now()) {
            return Err(EngineError::MarketClosed);
        }

        let result = self.gateway.cancel_order(order_id).await;
        self.risk.note_broker_call(result.is_ok()).await;
        let response = result?;

        self.kv
            .delete(&format!("order:working:{}", response.order_id))
            .await;
        let now = self.clock.now();
        if let Err(e) = self
            .outbox
            .enqueue(&OutboxEvent::new(
                now,
                topics::ORDER,
                json!({
                    "event": "order.cancelled",
                    "order_id": response.order_id,
                    "latency_ms": response.latency_ms,
                }),
            ))
            .await
        {
            warn!("OrdersService: failed to enqueue order.cancelled: {:#}", e);
        }
        Ok(response)
    }

    /// Spread preflight. Prefers top-of-book; falls back to the latest
    /// 1-minute bar's range over close. Permissive when nothing can be
    /// evaluated.
    pub async fn preflight_slippage_guard(&self, instrument_key: &str) -> bool {
        let max = self.config.max_spread_pct;

        if let Ok(Some((bid, ask))) = self.gateway.get_best_bid_ask(instrument_key).await {
            let bid = bid.to_f64().unwrap_or(0.0);
            let ask = ask.to_f64().unwrap_or(0.0);
            let mid = (bid + ask) / 2.0;
            if mid > 0.0 && ask >= bid {
                let spread_pct = (ask - bid) / mid * 100.0;
                if spread_pct > max {
                    warn!(
                        "OrdersService: spread {:.2}% > {:.2}% for {}",
                        spread_pct, max, instrument_key
                    );
                    return false;
                }
                return true;
            }
        }

        match self
            .gateway
            .get_intraday_candles(instrument_key, Timeframe::OneMin)
            .await
        {
            Ok(candles) => {
                let Some(bar) = candles.last() else {
                    return true;
                };
                let (Some(high), Some(low), Some(close)) =
                    (bar.high.to_f64(), bar.low.to_f64(), bar.close.to_f64())
                else {
                    return true;
                };
                if close <= 0.0 {
                    return true;
                }
                let range_pct = (high - low) / close * 100.0;
                range_pct <= max
            }
            // Unable to evaluate: allow.
            Err(_) => true,
        }
    }
}
