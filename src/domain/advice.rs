use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::types::{ExecutionContext, OrderType, Product, RiskCategory, TxnType, Validity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const MAX_RETRIES: u32 = 3;

/// Closed lifecycle set for an advice.
///
/// `Pending -> (Validated|Queued) -> (Executed|PartiallyFilled|Failed|
/// Dismissed|Expired) -> Completed`. Completed, Dismissed and Expired never
/// regress; Failed may requeue while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdviceStatus {
    Pending,
    Validated,
    Queued,
    Executed,
    PartiallyFilled,
    Failed,
    Dismissed,
    Expired,
    Completed,
}

impl fmt::Display for AdviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Validated => "VALIDATED",
            Self::Queued => "QUEUED",
            Self::Executed => "EXECUTED",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Failed => "FAILED",
            Self::Dismissed => "DISMISSED",
            Self::Expired => "EXPIRED",
            Self::Completed => "COMPLETED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AdviceStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VALIDATED" => Ok(Self::Validated),
            "QUEUED" => Ok(Self::Queued),
            "EXECUTED" => Ok(Self::Executed),
            "PARTIALLY_FILLED" => Ok(Self::PartiallyFilled),
            "FAILED" => Ok(Self::Failed),
            "DISMISSED" => Ok(Self::Dismissed),
            "EXPIRED" => Ok(Self::Expired),
            "COMPLETED" => Ok(Self::Completed),
            other => anyhow::bail!("unknown advice status: {}", other),
        }
    }
}

/// A trading recommendation produced by the decision service and carried
/// through risk gating to execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub symbol: String,
    pub instrument_token: String,
    pub order_type: OrderType,
    pub txn_type: TxnType,
    pub qty: i64,
    pub product: Product,
    pub validity: Validity,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub tag: Option<String>,
    pub is_amo: bool,
    pub status: AdviceStatus,
    pub priority_score: f64,
    pub risk_category: RiskCategory,
    pub execution_context: ExecutionContext,
    pub expires_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub max_holding_minutes: Option<i64>,
    pub strategy: String,
    pub reason: String,
    pub parent_advice_id: Option<String>,
    pub broker_order_id: Option<String>,
    pub execution_price: Option<Decimal>,
    pub execution_latency_ms: Option<i64>,
    pub realized_pnl: Option<Decimal>,
    pub performance_notes: Option<String>,
}

impl Advice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        now: DateTime<Utc>,
        symbol: impl Into<String>,
        instrument_token: impl Into<String>,
        txn_type: TxnType,
        qty: i64,
        strategy: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            symbol: symbol.into(),
            instrument_token: instrument_token.into(),
            order_type: OrderType::Market,
            txn_type,
            qty,
            product: Product::Mis,
            validity: Validity::Day,
            price: None,
            trigger_price: None,
            tag: None,
            is_amo: false,
            status: AdviceStatus::Pending,
            priority_score: 50.0,
            risk_category: RiskCategory::Medium,
            execution_context: ExecutionContext::Strategy,
            expires_at: None,
            retry_count: 0,
            last_error: None,
            stop_loss: None,
            take_profit: None,
            max_holding_minutes: None,
            strategy: strategy.into(),
            reason: reason.into(),
            parent_advice_id: None,
            broker_order_id: None,
            execution_price: None,
            execution_latency_ms: None,
            realized_pnl: None,
            performance_notes: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    /// Terminal states are immutable except `realized_pnl`/`performance_notes`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            AdviceStatus::Completed | AdviceStatus::Dismissed | AdviceStatus::Expired
        ) || (self.status == AdviceStatus::Failed && !self.can_retry())
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    /// Guarded status transition. Rejects regressions out of terminal
    /// states and moves not present in the lifecycle graph.
    pub fn transition(&mut self, to: AdviceStatus, now: DateTime<Utc>) -> EngineResult<()> {
        if self.status == to {
            return Ok(());
        }
        let allowed = match self.status {
            AdviceStatus::Pending => matches!(
                to,
                AdviceStatus::Validated
                    | AdviceStatus::Queued
                    | AdviceStatus::Executed
                    | AdviceStatus::PartiallyFilled
                    | AdviceStatus::Failed
                    | AdviceStatus::Dismissed
                    | AdviceStatus::Expired
            ),
            AdviceStatus::Validated | AdviceStatus::Queued => matches!(
                to,
                AdviceStatus::Executed
                    | AdviceStatus::PartiallyFilled
                    | AdviceStatus::Failed
                    | AdviceStatus::Dismissed
                    | AdviceStatus::Expired
            ),
            AdviceStatus::Executed | AdviceStatus::PartiallyFilled => {
                matches!(to, AdviceStatus::Completed)
            }
            // A failed advice may requeue while retries remain.
            AdviceStatus::Failed => self.can_retry() && matches!(to, AdviceStatus::Pending),
            AdviceStatus::Completed | AdviceStatus::Dismissed | AdviceStatus::Expired => false,
        };
        if !allowed {
            return Err(EngineError::bad_request(format!(
                "illegal advice transition {} -> {}",
                self.status, to
            )));
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }
}
