//! Tick/quote quality assessment.
//!
//! Produces derived [`QualityFlags`]; the underlying data is persisted and
//! returned regardless of the verdict. High quality needs score >= 0.9 with
//! no anomalies; acceptable needs score >= 0.7.

use crate::domain::market::{QualityFlags, ValidationStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeSet;

/// A tick older than this is stale.
const STALE_AFTER_SECS: i64 = 5;
/// Spread wider than this fraction of mid flags the quote.
const WIDE_SPREAD_RATIO: f64 = 0.01;
/// Latency above this is an ingestion problem of its own.
const LATENCY_ISSUE_MS: i64 = 2_000;

const STALE_PENALTY: f64 = 0.3;
const SPREAD_PENALTY: f64 = 0.2;
const LATENCY_PENALTY: f64 = 0.1;

/// Assess one price observation. `ts` is the observation's own timestamp,
/// `now` the assessment instant, `bid_ask` optional top-of-book.
pub fn assess_tick(
    price: Decimal,
    ts: DateTime<Utc>,
    now: DateTime<Utc>,
    bid_ask: Option<(Decimal, Decimal)>,
) -> QualityFlags {
    let mut anomalies = BTreeSet::new();
    let latency_ms = (now - ts).num_milliseconds().max(0);

    // Plausibility dominates everything else.
    let plausible = price > Decimal::ZERO && price.to_f64().map(f64::is_finite).unwrap_or(false);
    if !plausible {
        anomalies.insert("IMPLAUSIBLE_PRICE".to_string());
        return QualityFlags {
            score: 0.0,
            has_gaps: false,
            has_spikes: false,
            is_stale: false,
            has_latency_issues: false,
            anomalies,
            latency_ms,
            validation_status: ValidationStatus::Failed,
        };
    }

    let mut score = 1.0;

    let is_stale = (now - ts).num_seconds() > STALE_AFTER_SECS;
    if is_stale {
        anomalies.insert("STALE".to_string());
        score -= STALE_PENALTY;
    }

    let mut wide_spread = false;
    if let Some((bid, ask)) = bid_ask {
        if bid > Decimal::ZERO && ask > bid {
            let bid = bid.to_f64().unwrap_or(0.0);
            let ask = ask.to_f64().unwrap_or(0.0);
            let mid = (bid + ask) / 2.0;
            if mid > 0.0 && (ask - bid) / mid > WIDE_SPREAD_RATIO {
                wide_spread = true;
                anomalies.insert("WIDE_SPREAD".to_string());
                score -= SPREAD_PENALTY;
            }
        } else {
            anomalies.insert("CROSSED_BOOK".to_string());
            score -= SPREAD_PENALTY;
        }
    }

    let has_latency_issues = latency_ms > LATENCY_ISSUE_MS;
    if has_latency_issues {
        score -= LATENCY_PENALTY;
    }

    let score = score.clamp(0.0, 1.0);
    QualityFlags {
        score,
        has_gaps: false,
        has_spikes: wide_spread,
        is_stale,
        has_latency_issues,
        validation_status: if anomalies.is_empty() {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Anomaly
        },
        anomalies,
        latency_ms,
    }
}
