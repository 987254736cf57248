use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::types::{OrderType, Product, TxnType, Validity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Broker-side order state as reported by the order feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Complete,
    Cancelled,
    Rejected,
    Partial,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "OPEN",
            Self::Complete => "COMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
            Self::Partial => "PARTIAL",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "COMPLETE" => Ok(Self::Complete),
            "CANCELLED" => Ok(Self::Cancelled),
            "REJECTED" => Ok(Self::Rejected),
            "PARTIAL" => Ok(Self::Partial),
            other => anyhow::bail!("unknown order status: {}", other),
        }
    }
}

/// An order as known to the broker; owned by the orders service, mutated
/// by the broker feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub broker_order_id: String,
    pub parent_order_id: Option<String>,
    pub advice_id: Option<String>,
    pub instrument_token: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub txn_type: TxnType,
    pub qty: i64,
    pub filled_qty: i64,
    pub pending_qty: i64,
    pub product: Product,
    pub validity: Validity,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub status: OrderStatus,
    pub average_price: Option<Decimal>,
    pub message: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub exchange_ts: Option<DateTime<Utc>>,
}

/// Request to place an order through the broker gateway.
///
/// `is_amo` is a plain typed boolean; after-market handling never relies
/// on field introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub instrument_token: String,
    pub symbol: String,
    pub txn_type: TxnType,
    pub order_type: OrderType,
    pub quantity: i64,
    pub product: Product,
    pub validity: Validity,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub is_amo: bool,
    pub slice: bool,
    pub tag: Option<String>,
    pub disclosed_quantity: Option<i64>,
    pub advice_id: Option<String>,
}

impl PlaceOrderRequest {
    /// Price/trigger requirements per order type:
    /// LIMIT needs price; SL-M needs trigger and no price; SL needs both;
    /// MARKET forbids both. Quantity must be positive.
    pub fn validate(&self) -> EngineResult<()> {
        if self.instrument_token.is_empty() {
            return Err(EngineError::bad_request("instrument token is required"));
        }
        if self.quantity <= 0 {
            return Err(EngineError::bad_request("quantity must be positive"));
        }
        match self.order_type {
            OrderType::Limit => {
                if self.price.is_none() {
                    return Err(EngineError::bad_request("LIMIT order requires price"));
                }
            }
            OrderType::StopMarket => {
                if self.trigger_price.is_none() {
                    return Err(EngineError::bad_request("SL-M order requires trigger price"));
                }
                if self.price.is_some() {
                    return Err(EngineError::bad_request("SL-M order must not carry price"));
                }
            }
            OrderType::StopLimit => {
                if self.price.is_none() || self.trigger_price.is_none() {
                    return Err(EngineError::bad_request(
                        "SL order requires both price and trigger price",
                    ));
                }
            }
            OrderType::Market => {
                if self.price.is_some() || self.trigger_price.is_some() {
                    return Err(EngineError::bad_request(
                        "MARKET order must not carry price or trigger price",
                    ));
                }
            }
        }
        Ok(())
    }

    /// SHA-256 over the canonical intent
    /// `instrument_token|txn_type|order_type|price|qty`. Stable across
    /// identical intents, so a replay inside the idempotency window maps to
    /// the same key.
    pub fn idempotency_key(&self) -> String {
        let price_part = self
            .price
            .map(|p| p.normalize().to_string())
            .unwrap_or_else(|| "-".to_string());
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            self.instrument_token, self.txn_type, self.order_type, price_part, self.quantity
        );
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyOrderRequest {
    pub order_id: String,
    pub quantity: Option<i64>,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub order_type: Option<OrderType>,
    pub validity: Option<Validity>,
}

impl ModifyOrderRequest {
    pub fn validate(&self) -> EngineResult<()> {
        if self.order_id.is_empty() {
            return Err(EngineError::bad_request("order id is required"));
        }
        if self.quantity.is_some_and(|q| q <= 0) {
            return Err(EngineError::bad_request("quantity must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub order_ids: Vec<String>,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyOrderResponse {
    pub order_id: String,
    pub latency_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub order_id: String,
    pub latency_ms: i64,
}
