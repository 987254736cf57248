use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Call or put. A tagged field on every leg; consumers match on it rather
/// than probing instrument names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ce => write!(f, "CE"),
            Self::Pe => write!(f, "PE"),
        }
    }
}

impl std::str::FromStr for OptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CE" | "CALL" => Ok(Self::Ce),
            "PE" | "PUT" => Ok(Self::Pe),
            other => anyhow::bail!("unknown option type: {}", other),
        }
    }
}

/// First-order sensitivities plus implied volatility for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    pub iv: f64,
}

/// One strike/side of the option chain with open interest and volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionLeg {
    pub instrument_key: String,
    pub symbol: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub expiry: NaiveDate,
    pub oi: f64,
    pub volume: f64,
    pub ltp: Option<Decimal>,
    pub greeks: Option<Greeks>,
}

/// A strike ranked in the top-OI table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OiEntry {
    pub instrument_key: String,
    pub strike: Decimal,
    pub option_type: OptionType,
    pub oi: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GreeksSummary {
    pub call_delta_oi: f64,
    pub put_delta_oi: f64,
    pub call_gamma_oi: f64,
    pub put_gamma_oi: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub mean_call_iv: f64,
    pub mean_put_iv: f64,
    pub iv_skew: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiquidityMetrics {
    pub total_oi: f64,
    pub total_volume: f64,
    pub strikes_with_volume: usize,
}

/// Computed analytics for one `(underlying, expiry)` chain; cached ~30 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainAnalytics {
    pub underlying_key: String,
    pub expiry: NaiveDate,
    pub calculated_at: DateTime<Utc>,
    pub max_pain: Option<Decimal>,
    pub oi_pcr: f64,
    pub volume_pcr: f64,
    pub iv_skew: f64,
    pub gamma_exposure: f64,
    pub delta_neutral_level: f64,
    pub top_oi_increases: Vec<OiEntry>,
    pub greeks_summary: GreeksSummary,
    pub volatility_metrics: VolatilityMetrics,
    pub liquidity_metrics: LiquidityMetrics,
}
