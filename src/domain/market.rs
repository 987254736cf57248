use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single OHLC bar. Unique by `(symbol, open_time)`; immutable after
/// persistence. The timeframe is carried separately where it matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

impl Candle {
    /// OHLC sanity: high covers the body, low covers the body, all legs
    /// strictly positive. Rows failing this are flagged POOR but persisted.
    pub fn is_sane(&self) -> bool {
        let body_hi = self.open.max(self.close);
        let body_lo = self.open.min(self.close);
        self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.high >= body_hi
            && self.low <= body_lo
    }
}

/// A raw trade print; append-only, used as a low-latency LTP fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub ltp: Decimal,
    pub quantity: i64,
}

/// Candle timeframes understood by the broker intraday API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    OneDay,
}

impl Timeframe {
    /// Broker API unit segment ("minutes", "hours", "days").
    pub fn unit(&self) -> &'static str {
        match self {
            Self::OneMin | Self::FiveMin | Self::FifteenMin | Self::ThirtyMin => "minutes",
            Self::OneHour => "hours",
            Self::OneDay => "days",
        }
    }

    /// Broker API interval segment within the unit.
    pub fn interval(&self) -> &'static str {
        match self {
            Self::OneMin => "1",
            Self::FiveMin => "5",
            Self::FifteenMin => "15",
            Self::ThirtyMin => "30",
            Self::OneHour => "1",
            Self::OneDay => "1",
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Self::OneMin => 1,
            Self::FiveMin => 5,
            Self::FifteenMin => 15,
            Self::ThirtyMin => 30,
            Self::OneHour => 60,
            Self::OneDay => 1440,
        }
    }

    pub fn from_parts(unit: &str, interval: &str) -> Option<Self> {
        match (unit, interval) {
            ("minutes", "1") => Some(Self::OneMin),
            ("minutes", "5") => Some(Self::FiveMin),
            ("minutes", "15") => Some(Self::FifteenMin),
            ("minutes", "30") => Some(Self::ThirtyMin),
            ("hours", "1") => Some(Self::OneHour),
            ("days", "1") => Some(Self::OneDay),
            _ => None,
        }
    }

    /// Short label used in stream envelopes and cache keys ("1m", "5m", ...).
    pub fn label(&self) -> &'static str {
        match self {
            Self::OneMin => "1m",
            Self::FiveMin => "5m",
            Self::FifteenMin => "15m",
            Self::ThirtyMin => "30m",
            Self::OneHour => "60m",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Coarse market state derived from the momentum z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    Bullish,
    Bearish,
    Neutral,
}

impl MarketRegime {
    /// z >= +0.5 bullish, z <= -0.5 bearish, else neutral.
    pub fn from_zscore(z: f64) -> Self {
        if z >= 0.5 {
            Self::Bullish
        } else if z <= -0.5 {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    /// Confidence ladder for a regime-change signal by |z|.
    pub fn flip_confidence(z: f64) -> f64 {
        let abs = z.abs();
        if abs >= 2.0 {
            0.95
        } else if abs >= 1.5 {
            0.85
        } else if abs >= 1.0 {
            0.70
        } else if abs >= 0.5 {
            0.55
        } else {
            0.30
        }
    }

    /// Normalised direction used in decision scoring: +1 / 0 / -1.
    pub fn as_norm(&self) -> f64 {
        match self {
            Self::Bullish => 1.0,
            Self::Neutral => 0.0,
            Self::Bearish => -1.0,
        }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => write!(f, "BULLISH"),
            Self::Bearish => write!(f, "BEARISH"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Validated,
    Failed,
    Pending,
    Anomaly,
}

/// Derived quality assessment for a tick or quote. Never the source of
/// truth; the underlying data is persisted regardless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub score: f64,
    pub has_gaps: bool,
    pub has_spikes: bool,
    pub is_stale: bool,
    pub has_latency_issues: bool,
    pub anomalies: BTreeSet<String>,
    pub latency_ms: i64,
    pub validation_status: ValidationStatus,
}

impl QualityFlags {
    pub fn is_high_quality(&self) -> bool {
        self.score >= 0.9 && self.anomalies.is_empty()
    }

    pub fn is_acceptable(&self) -> bool {
        self.score >= 0.7
    }
}

/// A single OHLC quote row from the broker, with optional previous and
/// live (still-forming) bars as the quote API returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcQuote {
    pub ohlc: Ohlc,
    pub prev_ohlc: Option<Ohlc>,
    pub live_ohlc: Option<Ohlc>,
}
