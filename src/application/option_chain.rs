//! Option-chain analytics: max pain, put-call ratios, IV skew, gamma
//! exposure, delta-neutral level and the top-OI table, computed per
//! `(underlying, expiry)` and cached briefly in the KV store.

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::option_chain::{
    GreeksSummary, LiquidityMetrics, OiEntry, OptionChainAnalytics, OptionLeg, OptionType,
    VolatilityMetrics,
};
use crate::domain::ports::{BrokerGateway, Clock, FastStateStore};
use crate::domain::repositories::AnalyticsRepository;
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_TTL: Duration = Duration::from_secs(30);
const TOP_OI_COUNT: usize = 5;

/// Strike minimising total option-writer loss: for candidate settlement
/// `K*`, every CE pays `max(K* - K, 0) * OI` and every PE pays
/// `max(K - K*, 0) * OI`.
pub fn max_pain(legs: &[OptionLeg]) -> Option<Decimal> {
    let mut strikes: Vec<Decimal> = legs.iter().map(|l| l.strike).collect();
    strikes.sort();
    strikes.dedup();
    if strikes.is_empty() {
        return None;
    }

    let mut best: Option<(Decimal, f64)> = None;
    for candidate in &strikes {
        let candidate_f = candidate.to_f64()?;
        let mut writer_loss = 0.0;
        for leg in legs {
            let strike = leg.strike.to_f64()?;
            let payoff = match leg.option_type {
                OptionType::Ce => (candidate_f - strike).max(0.0),
                OptionType::Pe => (strike - candidate_f).max(0.0),
            };
            writer_loss += leg.oi * payoff;
        }
        match best {
            Some((_, loss)) if loss <= writer_loss => {}
            _ => best = Some((*candidate, writer_loss)),
        }
    }
    best.map(|(strike, _)| strike)
}

fn side_sum(legs: &[OptionLeg], side: OptionType, f: impl Fn(&OptionLeg) -> f64) -> f64 {
    legs.iter()
        .filter(|l| l.option_type == side)
        .map(f)
        .sum()
}

/// `sum(OI_PE) / sum(OI_CE)`; 0 when the call side is empty.
pub fn oi_pcr(legs: &[OptionLeg]) -> f64 {
    let ce = side_sum(legs, OptionType::Ce, |l| l.oi);
    let pe = side_sum(legs, OptionType::Pe, |l| l.oi);
    if ce == 0.0 { 0.0 } else { pe / ce }
}

/// `sum(vol_PE) / sum(vol_CE)`; 0 when the call side is empty.
pub fn volume_pcr(legs: &[OptionLeg]) -> f64 {
    let ce = side_sum(legs, OptionType::Ce, |l| l.volume);
    let pe = side_sum(legs, OptionType::Pe, |l| l.volume);
    if ce == 0.0 { 0.0 } else { pe / ce }
}

fn mean_iv(legs: &[OptionLeg], side: OptionType) -> Option<f64> {
    let ivs: Vec<f64> = legs
        .iter()
        .filter(|l| l.option_type == side)
        .filter_map(|l| l.greeks.map(|g| g.iv))
        .filter(|iv| *iv > 0.0)
        .collect();
    if ivs.is_empty() {
        return None;
    }
    Some(ivs.iter().sum::<f64>() / ivs.len() as f64)
}

/// `mean(IV_PE) - mean(IV_CE)`; 0 when either side is empty.
pub fn iv_skew(legs: &[OptionLeg]) -> f64 {
    match (mean_iv(legs, OptionType::Pe), mean_iv(legs, OptionType::Ce)) {
        (Some(pe), Some(ce)) => pe - ce,
        _ => 0.0,
    }
}

/// `sum(gamma * OI)_CE - sum(gamma * OI)_PE`.
pub fn gamma_exposure(legs: &[OptionLeg]) -> f64 {
    let g = |l: &OptionLeg| l.greeks.map(|g| g.gamma).unwrap_or(0.0) * l.oi;
    side_sum(legs, OptionType::Ce, g) - side_sum(legs, OptionType::Pe, g)
}

/// `sum(delta * OI)_CE - sum(delta * OI)_PE`.
pub fn delta_neutral_level(legs: &[OptionLeg]) -> f64 {
    let d = |l: &OptionLeg| l.greeks.map(|g| g.delta).unwrap_or(0.0) * l.oi;
    side_sum(legs, OptionType::Ce, d) - side_sum(legs, OptionType::Pe, d)
}

/// Top strikes by absolute current OI, descending. Stands in for OI deltas
/// until historical snapshots are joined.
pub fn top_oi_entries(legs: &[OptionLeg], k: usize) -> Vec<OiEntry> {
    let mut entries: Vec<OiEntry> = legs
        .iter()
        .map(|l| OiEntry {
            instrument_key: l.instrument_key.clone(),
            strike: l.strike,
            option_type: l.option_type,
            oi: l.oi,
        })
        .collect();
    entries.sort_by(|a, b| b.oi.abs().total_cmp(&a.oi.abs()));
    entries.truncate(k);
    entries
}

pub fn compute_analytics(
    underlying_key: &str,
    expiry: NaiveDate,
    calculated_at: chrono::DateTime<chrono::Utc>,
    legs: &[OptionLeg],
) -> OptionChainAnalytics {
    let delta_oi = |side: OptionType| {
        side_sum(legs, side, |l| l.greeks.map(|g| g.delta).unwrap_or(0.0) * l.oi)
    };
    let gamma_oi = |side: OptionType| {
        side_sum(legs, side, |l| l.greeks.map(|g| g.gamma).unwrap_or(0.0) * l.oi)
    };
    OptionChainAnalytics {
        underlying_key: underlying_key.to_string(),
        expiry,
        calculated_at,
        max_pain: max_pain(legs),
        oi_pcr: oi_pcr(legs),
        volume_pcr: volume_pcr(legs),
        iv_skew: iv_skew(legs),
        gamma_exposure: gamma_exposure(legs),
        delta_neutral_level: delta_neutral_level(legs),
        top_oi_increases: top_oi_entries(legs, TOP_OI_COUNT),
        greeks_summary: GreeksSummary {
            call_delta_oi: delta_oi(OptionType::Ce),
            put_delta_oi: delta_oi(OptionType::Pe),
            call_gamma_oi: gamma_oi(OptionType::Ce),
            put_gamma_oi: gamma_oi(OptionType::Pe),
        },
        volatility_metrics: VolatilityMetrics {
            mean_call_iv: mean_iv(legs, OptionType::Ce).unwrap_or(0.0),
            mean_put_iv: mean_iv(legs, OptionType::Pe).unwrap_or(0.0),
            iv_skew: iv_skew(legs),
        },
        liquidity_metrics: LiquidityMetrics {
            total_oi: legs.iter().map(|l| l.oi).sum(),
            total_volume: legs.iter().map(|l| l.volume).sum(),
            strikes_with_volume: legs.iter().filter(|l| l.volume > 0.0).count(),
        },
    }
}

pub struct OptionChainAnalyticsService {
    gateway: Arc<dyn BrokerGateway>,
    kv: Arc<dyn FastStateStore>,
    repo: Arc<dyn AnalyticsRepository>,
    clock: Arc<dyn Clock>,
}

impl OptionChainAnalyticsService {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        kv: Arc<dyn FastStateStore>,
        repo: Arc<dyn AnalyticsRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            kv,
            repo,
            clock,
        }
    }

    fn cache_key(underlying_key: &str, expiry: NaiveDate) -> String {
        format!("analytics:{}:{}", underlying_key, expiry)
    }

    /// Analytics for one `(underlying, expiry)`. Serves the 30 s KV cache
    /// when fresh; otherwise fetches the chain, computes, caches and
    /// persists a snapshot.
    pub async fn get_analytics(
        &self,
        underlying_key: &str,
        expiry: NaiveDate,
    ) -> EngineResult<OptionChainAnalytics> {
        let cache_key = Self::cache_key(underlying_key, expiry);
        if let Some(cached) = self.kv.get(&cache_key).await {
            if let Ok(analytics) = serde_json::from_str::<OptionChainAnalytics>(&cached) {
                debug!("OptionChain: cache hit for {} {}", underlying_key, expiry);
                return Ok(analytics);
            }
        }

        let legs = self
            .gateway
            .get_option_instruments(underlying_key, Some(expiry))
            .await?;
        if legs.is_empty() {
            return Err(EngineError::not_found(format!(
                "no option chain for {} {}",
                underlying_key, expiry
            )));
        }

        let analytics = compute_analytics(underlying_key, expiry, self.clock.now(), &legs);

        if let Ok(encoded) = serde_json::to_string(&analytics) {
            self.kv.put(&cache_key, &encoded, Some(CACHE_TTL)).await;
        }
        if let Err(e) = self.repo.save(&analytics).await {
            warn!("OptionChain: failed to persist analytics snapshot: {:#}", e);
        }
        Ok(analytics)
    }

    /// Analytics for the nearest listed expiry of the underlying.
    pub async fn get_analytics_nearest(
        &self,
        underlying_key: &str,
    ) -> EngineResult<OptionChainAnalytics> {
        let instruments = self
            .gateway
            .get_option_instruments(underlying_key, None)
            .await?;
        let expiry = instruments
            .iter()
            .map(|l| l.expiry)
            .min()
            .ok_or_else(|| {
                EngineError::not_found(format!("no option instruments for {}", underlying_key))
            })?;
        self.get_analytics(underlying_key, expiry).await
    }

    /// Drop persisted snapshots older than the retention window.
    pub async fn purge(&self, retention_days: i64) -> Result<u64> {
        let cutoff = self.clock.now() - chrono::Duration::days(retention_days);
        self.repo.purge_older_than(cutoff).await
    }
}
