//! Put-call-ratio signal template.
//!
//! Triggers when both PCR metrics lean the same way, or when a single
//! metric prints an extreme. Direction is the majority vote of the two
//! metrics; strength is the average normalised distance past the
//! thresholds, scaled to [0, 10].

use crate::domain::option_chain::OptionChainAnalytics;
use crate::domain::signal::{SignalAction, SignalTemplate, TradingSignal};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

#[derive(Debug, Clone)]
pub struct PcrThresholds {
    pub oi_bullish_max: f64,
    pub oi_bearish_min: f64,
    pub volume_bullish_max: f64,
    pub volume_bearish_min: f64,
    /// A single metric at or past an extreme fires the trigger alone:
    /// 0.64 = 0.80 * 0.8 and 1.44 = 1.20 * 1.2 at the defaults.
    pub extreme_bullish_max: f64,
    pub extreme_bearish_min: f64,
}

impl Default for PcrThresholds {
    fn default() -> Self {
        Self {
            oi_bullish_max: 0.80,
            oi_bearish_min: 1.20,
            volume_bullish_max: 0.75,
            volume_bearish_min: 1.25,
            extreme_bullish_max: 0.64,
            extreme_bearish_min: 1.44,
        }
    }
}

const STOP_LOSS_PCT: f64 = 0.02;
const TAKE_PROFIT_PCT: f64 = 0.03;
const AGREEMENT_CONFIDENCE_BOOST: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lean {
    Bullish,
    Bearish,
    Neutral,
}

pub struct PcrSignalTemplate {
    thresholds: PcrThresholds,
}

impl Default for PcrSignalTemplate {
    fn default() -> Self {
        Self::new(PcrThresholds::default())
    }
}

impl PcrSignalTemplate {
    pub fn new(thresholds: PcrThresholds) -> Self {
        Self { thresholds }
    }

    fn lean(value: f64, bullish_max: f64, bearish_min: f64) -> Lean {
        if value <= bullish_max {
            Lean::Bullish
        } else if value >= bearish_min {
            Lean::Bearish
        } else {
            Lean::Neutral
        }
    }

    fn oi_lean(&self, chain: &OptionChainAnalytics) -> Lean {
        Self::lean(
            chain.oi_pcr,
            self.thresholds.oi_bullish_max,
            self.thresholds.oi_bearish_min,
        )
    }

    fn volume_lean(&self, chain: &OptionChainAnalytics) -> Lean {
        Self::lean(
            chain.volume_pcr,
            self.thresholds.volume_bullish_max,
            self.thresholds.volume_bearish_min,
        )
    }

    fn is_extreme(&self, value: f64) -> bool {
        value <= self.thresholds.extreme_bullish_max
            || value >= self.thresholds.extreme_bearish_min
    }

    /// Normalised distance past the metric's directional threshold,
    /// clamped to [0, 1].
    fn distance(value: f64, bullish_max: f64, bearish_min: f64, direction: Lean) -> f64 {
        match direction {
            Lean::Bullish => ((bullish_max - value) / bullish_max).clamp(0.0, 1.0),
            Lean::Bearish => ((value - bearish_min) / bearish_min).clamp(0.0, 1.0),
            Lean::Neutral => 0.0,
        }
    }

    fn direction(&self, chain: &OptionChainAnalytics) -> Lean {
        let votes = [self.oi_lean(chain), self.volume_lean(chain)];
        let bulls = votes.iter().filter(|v| **v == Lean::Bullish).count();
        let bears = votes.iter().filter(|v| **v == Lean::Bearish).count();
        if bulls > bears {
            Lean::Bullish
        } else if bears > bulls {
            Lean::Bearish
        } else {
            Lean::Neutral
        }
    }
}

impl SignalTemplate for PcrSignalTemplate {
    fn name(&self) -> &str {
        "pcr"
    }

    fn is_triggered(&self, chain: &OptionChainAnalytics) -> bool {
        let oi = self.oi_lean(chain);
        let volume = self.volume_lean(chain);
        let both_agree = oi == volume && oi != Lean::Neutral;
        both_agree || self.is_extreme(chain.oi_pcr) || self.is_extreme(chain.volume_pcr)
    }

    fn generate_signal(
        &self,
        chain: &OptionChainAnalytics,
        ltp: Decimal,
    ) -> Option<TradingSignal> {
        if !self.is_triggered(chain) {
            return None;
        }
        let direction = self.direction(chain);
        if direction == Lean::Neutral {
            return None;
        }

        let oi_distance = Self::distance(
            chain.oi_pcr,
            self.thresholds.oi_bullish_max,
            self.thresholds.oi_bearish_min,
            direction,
        );
        let volume_distance = Self::distance(
            chain.volume_pcr,
            self.thresholds.volume_bullish_max,
            self.thresholds.volume_bearish_min,
            direction,
        );
        let strength = (oi_distance + volume_distance) / 2.0 * 10.0;

        let both_agree = self.oi_lean(chain) == self.volume_lean(chain);
        let mut confidence = strength / 10.0;
        if both_agree {
            confidence *= AGREEMENT_CONFIDENCE_BOOST;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let (action, sl_mult, tp_mult) = match direction {
            Lean::Bullish => (
                SignalAction::Buy,
                1.0 - STOP_LOSS_PCT,
                1.0 + TAKE_PROFIT_PCT,
            ),
            Lean::Bearish => (
                SignalAction::Sell,
                1.0 + STOP_LOSS_PCT,
                1.0 - TAKE_PROFIT_PCT,
            ),
            Lean::Neutral => unreachable!(),
        };

        let mult = |m: f64| ltp * Decimal::from_f64(m).unwrap_or(Decimal::ONE);
        Some(TradingSignal {
            instrument_key: chain.underlying_key.clone(),
            action,
            strength,
            confidence,
            risk_adjusted_size: 0.5 + strength / 10.0,
            entry_price: ltp,
            stop_loss: mult(sl_mult).round_dp(2),
            take_profit: mult(tp_mult).round_dp(2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::option_chain::{GreeksSummary, LiquidityMetrics, VolatilityMetrics};
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;

    fn chain(oi_pcr: f64, volume_pcr: f64) -> OptionChainAnalytics {
        OptionChainAnalytics {
            underlying_key: "NSE_INDEX|Nifty 50".to_string(),
            expiry: NaiveDate::from_ymd_opt(2026, 8, 27).unwrap(),
            calculated_at: Utc::now(),
            max_pain: Some(dec!(24500)),
            oi_pcr,
            volume_pcr,
            iv_skew: 0.0,
            gamma_exposure: 0.0,
            delta_neutral_level: 0.0,
            top_oi_increases: Vec::new(),
            greeks_summary: GreeksSummary::default(),
            volatility_metrics: VolatilityMetrics::default(),
            liquidity_metrics: LiquidityMetrics::default(),
        }
    }

    fn template() -> PcrSignalTemplate {
        PcrSignalTemplate::default()
    }

    #[test]
    fn test_both_bullish_triggers_buy() {
        let signal = template()
            .generate_signal(&chain(0.70, 0.70), dec!(24500))
            .unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
        assert!(signal.strength > 0.0);
        assert!(signal.confidence > 0.0);
        // Direction-correct protective levels.
        assert_eq!(signal.stop_loss, dec!(24010.00));
        assert_eq!(signal.take_profit, dec!(25235.00));
    }

    #[test]
    fn test_both_bearish_triggers_sell() {
        let signal = template()
            .generate_signal(&chain(1.30, 1.35), dec!(24500))
            .unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
        assert!(signal.stop_loss > signal.entry_price);
        assert!(signal.take_profit < signal.entry_price);
    }

    #[test]
    fn test_boundary_oi_exactly_080_is_bullish() {
        // OI exactly on the threshold takes the bullish branch.
        let t = template();
        let c = chain(0.80, 0.70);
        assert!(t.is_triggered(&c));
        let signal = t.generate_signal(&c, dec!(24500)).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn test_mid_range_does_not_trigger() {
        let t = template();
        assert!(!t.is_triggered(&chain(1.0, 1.0)));
        assert!(t.generate_signal(&chain(1.0, 1.0), dec!(24500)).is_none());
    }

    #[test]
    fn test_single_extreme_triggers_alone() {
        let t = template();
        // Volume neutral, OI extreme bullish.
        let c = chain(0.60, 1.0);
        assert!(t.is_triggered(&c));
        let signal = t.generate_signal(&c, dec!(24500)).unwrap();
        assert_eq!(signal.action, SignalAction::Buy);
    }

    #[test]
    fn test_opposing_metrics_tie_yields_no_signal() {
        let t = template();
        // OI extreme bullish, volume bearish: trigger fires, direction ties.
        let c = chain(0.60, 1.30);
        assert!(t.is_triggered(&c));
        assert!(t.generate_signal(&c, dec!(24500)).is_none());
    }

    #[test]
    fn test_agreement_boosts_confidence() {
        let t = template();
        // Same OI reading; volume agreeing vs neutral-extreme trigger.
        let agreeing = t.generate_signal(&chain(0.60, 0.60), dec!(24500)).unwrap();
        let alone = t.generate_signal(&chain(0.60, 1.0), dec!(24500)).unwrap();
        assert!(agreeing.confidence > alone.confidence);
    }

    #[test]
    fn test_confidence_clamped_to_one() {
        let t = template();
        let signal = t.generate_signal(&chain(0.01, 0.01), dec!(24500)).unwrap();
        assert!(signal.confidence <= 1.0);
        assert!(signal.strength <= 10.0);
        assert!((signal.risk_adjusted_size - (0.5 + signal.strength / 10.0)).abs() < 1e-12);
    }
}
