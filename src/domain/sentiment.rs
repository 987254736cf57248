use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional label for a blended sentiment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 60.0 {
            Self::Bullish
        } else if score <= 40.0 {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bullish => write!(f, "Bullish"),
            Self::Bearish => write!(f, "Bearish"),
            Self::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Blended market sentiment at a point in time. Latest row feeds the
/// decision service; history is kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSentimentSnapshot {
    pub as_of: DateTime<Utc>,
    /// Blended score in [0, 100]; 50 is neutral.
    pub score: f64,
    pub confidence: Option<f64>,
    pub prediction_accuracy: Option<f64>,
    pub sentiment: SentimentLabel,
}

/// One entry in the in-memory decay ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentSample {
    pub at: DateTime<Utc>,
    pub score: f64,
}

/// A single external sentiment source. Providers are polled during each
/// refresh; a provider returning `Ok(None)` simply has nothing to
/// contribute this cycle, and provider errors degrade to absence.
#[async_trait]
pub trait SentimentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Current sentiment in [0, 100], if the source has an opinion.
    async fn fetch_sentiment(&self) -> anyhow::Result<Option<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_thresholds() {
        assert_eq!(SentimentLabel::from_score(60.0), SentimentLabel::Bullish);
        assert_eq!(SentimentLabel::from_score(59.9), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(40.0), SentimentLabel::Bearish);
        assert_eq!(SentimentLabel::from_score(40.1), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(50.0), SentimentLabel::Neutral);
    }
}
