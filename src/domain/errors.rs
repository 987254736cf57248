use std::fmt;
use thiserror::Error;

/// Machine-readable classification of an [`EngineError`].
///
/// The kind string is what risk events, advice `last_error` fields and
/// outbox payloads carry; the error itself keeps the human-readable detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Unauthenticated,
    BadRequest,
    NotFound,
    MarketClosed,
    Duplicate,
    RiskDisabled,
    KillSwitch,
    CircuitLockout,
    DailyLossBreach,
    PerOrderRisk,
    LotsCap,
    RateLimit,
    BrokerError,
    BrokerTimeout,
    WideSpread,
    DataQuality,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::MarketClosed => "MARKET_CLOSED",
            Self::Duplicate => "DUPLICATE",
            Self::RiskDisabled => "RISK_DISABLED",
            Self::KillSwitch => "KILL_SWITCH",
            Self::CircuitLockout => "CIRCUIT_LOCKOUT",
            Self::DailyLossBreach => "DAILY_LOSS_BREACH",
            Self::PerOrderRisk => "PER_ORDER_RISK",
            Self::LotsCap => "LOTS_CAP",
            Self::RateLimit => "RATE_LIMIT",
            Self::BrokerError => "BROKER_ERROR",
            Self::BrokerTimeout => "BROKER_TIMEOUT",
            Self::WideSpread => "WIDE_SPREAD",
            Self::DataQuality => "DATA_QUALITY",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// Unified error type for every write path in the engine.
///
/// Read paths (card refreshes, cache lookups) degrade gracefully and do not
/// surface these; write paths (orders, risk gate, advice lifecycle)
/// propagate them to the caller and into the audit trail.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not authenticated with broker")]
    Unauthenticated,

    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("market is closed and order is not AMO")]
    MarketClosed,

    #[error("duplicate order within idempotency window")]
    Duplicate,

    #[error("risk engine is disabled")]
    RiskDisabled,

    #[error("kill switch blocks new open orders")]
    KillSwitch,

    #[error("circuit breaker lockout: {reason}")]
    CircuitLockout { reason: String },

    #[error("daily loss limit breached: {loss_pct:.2}% of budget")]
    DailyLossBreach { loss_pct: f64 },

    #[error("per-order risk {required} exceeds remaining budget {left}")]
    PerOrderRisk { required: String, left: String },

    #[error("lots cap exceeded: {used} used + {requested} requested > {cap}")]
    LotsCap { used: u32, requested: u32, cap: u32 },

    #[error("order rate limit: {current} orders in the last minute >= cap {cap}")]
    RateLimit { current: u32, cap: u32 },

    #[error("broker error: {message}")]
    Broker { message: String },

    #[error("broker call timed out after {millis}ms")]
    BrokerTimeout { millis: u64 },

    #[error("spread too wide: {spread_pct:.2}% > {max_pct:.2}%")]
    WideSpread { spread_pct: f64, max_pct: f64 },

    #[error("data quality failure: {reason}")]
    DataQuality { reason: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated => ErrorKind::Unauthenticated,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::MarketClosed => ErrorKind::MarketClosed,
            Self::Duplicate => ErrorKind::Duplicate,
            Self::RiskDisabled => ErrorKind::RiskDisabled,
            Self::KillSwitch => ErrorKind::KillSwitch,
            Self::CircuitLockout { .. } => ErrorKind::CircuitLockout,
            Self::DailyLossBreach { .. } => ErrorKind::DailyLossBreach,
            Self::PerOrderRisk { .. } => ErrorKind::PerOrderRisk,
            Self::LotsCap { .. } => ErrorKind::LotsCap,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Broker { .. } => ErrorKind::BrokerError,
            Self::BrokerTimeout { .. } => ErrorKind::BrokerTimeout,
            Self::WideSpread { .. } => ErrorKind::WideSpread,
            Self::DataQuality { .. } => ErrorKind::DataQuality,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::BadRequest {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker {
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
