use crate::domain::errors::ErrorKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operator-supplied risk limits. Singleton-most-recent; hot-reloaded on
/// write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_daily_loss: Decimal,
    pub lots_cap: u32,
    pub orders_per_min_cap: u32,
    /// Percentage of an order's notional charged against the risk budget.
    pub per_order_risk_pct: Decimal,
    pub enabled: bool,
    pub as_of: DateTime<Utc>,
}

impl RiskConfig {
    pub fn defaults(now: DateTime<Utc>) -> Self {
        Self {
            max_daily_loss: Decimal::from(25_000),
            lots_cap: 10,
            orders_per_min_cap: 10,
            per_order_risk_pct: Decimal::from(100),
            enabled: true,
            as_of: now,
        }
    }
}

/// Point-in-time risk posture; written each engine tick and read by the
/// admission path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSnapshot {
    pub as_of: DateTime<Utc>,
    pub risk_headroom_ok: bool,
    pub kill_switch_open_new: bool,
    pub circuit_breaker_lockout: bool,
    pub daily_circuit_tripped: bool,
    pub realized_pnl_today: Decimal,
    pub daily_loss_abs: Decimal,
    pub daily_loss_pct: f64,
    pub risk_budget_left: Decimal,
    pub lots_used: u32,
    pub lots_cap: u32,
    pub orders_per_min: u32,
    pub orders_per_min_pct: f64,
    pub minutes_since_last_sl: Option<i64>,
    pub restrikes_today: u32,
}

impl RiskSnapshot {
    /// A snapshot that blocks nothing; used before the first refresh.
    pub fn permissive(now: DateTime<Utc>, config: &RiskConfig) -> Self {
        Self {
            as_of: now,
            risk_headroom_ok: true,
            kill_switch_open_new: false,
            circuit_breaker_lockout: false,
            daily_circuit_tripped: false,
            realized_pnl_today: Decimal::ZERO,
            daily_loss_abs: Decimal::ZERO,
            daily_loss_pct: 0.0,
            risk_budget_left: config.max_daily_loss,
            lots_used: 0,
            lots_cap: config.lots_cap,
            orders_per_min: 0,
            orders_per_min_pct: 0.0,
            minutes_since_last_sl: None,
            restrikes_today: 0,
        }
    }
}

/// Append-only audit row for every gate decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub ts: DateTime<Utc>,
    pub event_type: ErrorKind,
    pub reason: String,
    pub order_ref: Option<String>,
    pub value: f64,
    pub breached: bool,
}

impl RiskEvent {
    pub fn pass(ts: DateTime<Utc>, order_ref: Option<String>) -> Self {
        Self {
            ts,
            event_type: ErrorKind::Internal,
            reason: "gate passed".to_string(),
            order_ref,
            value: 0.0,
            breached: false,
        }
    }

    pub fn breach(
        ts: DateTime<Utc>,
        event_type: ErrorKind,
        reason: impl Into<String>,
        order_ref: Option<String>,
        value: f64,
    ) -> Self {
        Self {
            ts,
            event_type,
            reason: reason.into(),
            order_ref,
            value,
            breached: true,
        }
    }
}

/// Trading circuit-breaker state (distinct from the HTTP breaker guarding
/// broker calls).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub tripped: bool,
    pub reason: Option<String>,
    pub as_of: DateTime<Utc>,
}

impl CircuitState {
    pub fn closed(now: DateTime<Utc>) -> Self {
        Self {
            tripped: false,
            reason: None,
            as_of: now,
        }
    }

    pub fn tripped(now: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            tripped: true,
            reason: Some(reason.into()),
            as_of: now,
        }
    }
}

/// The sizing facts the risk gate needs about an order intent.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub notional: Decimal,
    pub lots: u32,
    /// True when the intent opens new exposure (vs. reduces or closes).
    pub is_new_open: bool,
    pub order_ref: Option<String>,
}
