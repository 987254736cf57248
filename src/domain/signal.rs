use crate::domain::option_chain::OptionChainAnalytics;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Actionable signal emitted by a template, priced off the current LTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub instrument_key: String,
    pub action: SignalAction,
    /// Signal strength in [0, 10].
    pub strength: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Position-size multiplier: 0.5 + strength/10.
    pub risk_adjusted_size: f64,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Persisted record of any emitted signal (template output or
/// regime-change marker), kept for audit and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignalRecord {
    pub id: String,
    pub at: DateTime<Utc>,
    /// Signal family, e.g. "PCR" or "REGIME_CHANGE".
    pub kind: String,
    pub instrument_key: String,
    pub action: SignalAction,
    pub strength: f64,
    pub confidence: f64,
    pub details: serde_json::Value,
}

impl MarketSignalRecord {
    pub fn from_signal(at: DateTime<Utc>, kind: &str, signal: &TradingSignal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            at,
            kind: kind.to_string(),
            instrument_key: signal.instrument_key.clone(),
            action: signal.action,
            strength: signal.strength,
            confidence: signal.confidence,
            details: serde_json::json!({
                "entry_price": signal.entry_price.to_string(),
                "stop_loss": signal.stop_loss.to_string(),
                "take_profit": signal.take_profit.to_string(),
                "risk_adjusted_size": signal.risk_adjusted_size,
            }),
        }
    }
}

/// A pure signal template: decides whether the chain state triggers it and,
/// if so, produces a priced signal.
pub trait SignalTemplate: Send + Sync {
    fn name(&self) -> &str;

    fn is_triggered(&self, chain: &OptionChainAnalytics) -> bool;

    /// `ltp` prices the entry; templates derive stop/target from it.
    fn generate_signal(
        &self,
        chain: &OptionChainAnalytics,
        ltp: Decimal,
    ) -> Option<TradingSignal>;
}
