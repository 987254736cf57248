//! VADER-based headline scoring with Indian-market keyword boosting.
//!
//! VADER's general lexicon misses most NSE jargon, so a small financial
//! lexicon shifts the compound score before it is mapped to [0, 100].

use vader_sentiment::SentimentIntensityAnalyzer;

const BULLISH_KEYWORDS: &[(&str, f64)] = &[
    ("surge", 0.4),
    ("surges", 0.4),
    ("rally", 0.4),
    ("rallies", 0.4),
    ("soar", 0.5),
    ("soars", 0.5),
    ("bullish", 0.5),
    ("record high", 0.4),
    ("all-time high", 0.5),
    ("breakout", 0.3),
    ("upgrade", 0.3),
    ("fii inflow", 0.4),
    ("fii buying", 0.4),
    ("dii buying", 0.3),
    ("rate cut", 0.3),
    ("stimulus", 0.3),
    ("gst cut", 0.3),
    ("strong earnings", 0.4),
    ("beats estimates", 0.4),
];

const BEARISH_KEYWORDS: &[(&str, f64)] = &[
    ("crash", -0.5),
    ("crashes", -0.5),
    ("plunge", -0.5),
    ("plunges", -0.5),
    ("bearish", -0.5),
    ("sell-off", -0.4),
    ("selloff", -0.4),
    ("fii outflow", -0.4),
    ("fii selling", -0.4),
    ("rate hike", -0.3),
    ("inflation", -0.2),
    ("downgrade", -0.4),
    ("misses estimates", -0.4),
    ("panic", -0.4),
    ("circuit lower", -0.5),
    ("sanction", -0.3),
    ("tariff", -0.3),
    ("crude spike", -0.3),
];

pub struct HeadlineAnalyzer {
    analyzer: SentimentIntensityAnalyzer<'static>,
}

impl Default for HeadlineAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlineAnalyzer {
    pub fn new() -> Self {
        Self {
            analyzer: SentimentIntensityAnalyzer::new(),
        }
    }

    fn keyword_boost(&self, text: &str) -> f64 {
        let text_lower = text.to_lowercase();
        let mut boost = 0.0;
        for (keyword, score) in BULLISH_KEYWORDS {
            if text_lower.contains(keyword) {
                boost += score;
            }
        }
        for (keyword, score) in BEARISH_KEYWORDS {
            if text_lower.contains(keyword) {
                boost += score;
            }
        }
        boost.clamp(-1.0, 1.0)
    }

    /// Compound score in [-1, 1] with the financial boost applied.
    pub fn compound(&self, text: &str) -> f64 {
        let scores = self.analyzer.polarity_scores(text);
        let base = scores.get("compound").copied().unwrap_or(0.0);
        (base + 0.5 * self.keyword_boost(text)).clamp(-1.0, 1.0)
    }

    /// Headline score mapped to the engine's [0, 100] sentiment scale.
    pub fn score_0_100(&self, text: &str) -> f64 {
        50.0 + 50.0 * self.compound(text)
    }
}
