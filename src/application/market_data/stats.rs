//! Pure statistics over candle series: momentum z-score, average true
//! range and the realized-volatility proxy.

use crate::domain::market::Candle;
use rust_decimal::prelude::ToPrimitive;
use statrs::statistics::{Data, Distribution};

/// Stddev below this is treated as a flat series (z = 0).
pub const FLAT_SIGMA_EPSILON: f64 = 1e-8;
/// Minimum number of valid closes for a momentum reading.
pub const MOMENTUM_MIN_CLOSES: usize = 10;
/// Momentum looks back at most this many closes.
pub const MOMENTUM_MAX_WINDOW: usize = 60;

/// Closes that are positive and finite, in series order.
pub fn valid_closes(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .filter_map(|c| c.close.to_f64())
        .filter(|c| c.is_finite() && *c > 0.0)
        .collect()
}

/// Z-score of the last close against the mean of the trailing window
/// (population stddev). `None` when fewer than [`MOMENTUM_MIN_CLOSES`]
/// closes are available; `0.0` when the window is flat.
pub fn momentum_zscore(closes: &[f64]) -> Option<f64> {
    if closes.len() < MOMENTUM_MIN_CLOSES {
        return None;
    }
    let window = &closes[closes.len().saturating_sub(MOMENTUM_MAX_WINDOW)..];
    let last = *window.last()?;
    let mean = Data::new(window.to_vec()).mean()?;
    // Population sigma: the score is against the realized window itself,
    // not a sample estimate of a wider process.
    let variance = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / window.len() as f64;
    let sigma = variance.sqrt();
    if sigma <= FLAT_SIGMA_EPSILON {
        return Some(0.0);
    }
    Some((last - mean) / sigma)
}

/// True range of a bar against the previous close.
fn true_range(bar: &Candle, prev_close: f64) -> Option<f64> {
    let high = bar.high.to_f64()?;
    let low = bar.low.to_f64()?;
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    Some(hl.max(hc).max(lc))
}

/// ATR as the plain mean of true ranges over the last `lookback` bars.
/// Needs `lookback + 1` bars for the leading previous close.
pub fn atr(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }
    let tail = &candles[candles.len() - lookback - 1..];
    let mut trs = Vec::with_capacity(lookback);
    for pair in tail.windows(2) {
        let prev_close = pair[0].close.to_f64()?;
        trs.push(true_range(&pair[1], prev_close)?);
    }
    Some(trs.iter().sum::<f64>() / trs.len() as f64)
}

/// Realized-vol proxy: stddev of log returns over the series, annualised
/// for 5-minute bars (75 bars/session, 252 sessions), in percent.
pub fn realized_vol_proxy_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let log_returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if log_returns.len() < 2 {
        return None;
    }
    let sigma = Data::new(log_returns).std_dev()?;
    Some(sigma * 75.0_f64.sqrt() * 252.0_f64.sqrt() * 100.0)
}
