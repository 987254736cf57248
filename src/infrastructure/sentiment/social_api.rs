use crate::domain::sentiment::SentimentProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SocialSentimentResponse {
    /// Aggregate score in [0, 100].
    score: f64,
    #[serde(default)]
    sample_size: Option<u64>,
}

/// Social-media sentiment source, gated by `TRADING_SOCIAL_API_ENABLED`.
/// The endpoint aggregates posts matching the configured keywords and
/// returns one score per call.
pub struct SocialApiSentimentProvider {
    client: Client,
    url: String,
    api_key: String,
    keywords: Vec<String>,
}

impl SocialApiSentimentProvider {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            api_key: api_key.into(),
            keywords,
        }
    }
}

#[async_trait]
impl SentimentProvider for SocialApiSentimentProvider {
    fn name(&self) -> &str {
        "social-api"
    }

    async fn fetch_sentiment(&self) -> Result<Option<f64>> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.api_key)
            .query(&[("keywords", self.keywords.join(","))])
            .send()
            .await
            .context("Failed to call social sentiment API")?;

        if !response.status().is_success() {
            anyhow::bail!("social sentiment API returned {}", response.status());
        }

        let body: SocialSentimentResponse = response
            .json()
            .await
            .context("Failed to parse social sentiment response")?;

        if !(0.0..=100.0).contains(&body.score) {
            anyhow::bail!("social sentiment score out of range: {}", body.score);
        }
        info!(
            "SocialApiSentiment: {:.1} (sample {})",
            body.score,
            body.sample_size.unwrap_or(0)
        );
        Ok(Some(body.score))
    }
}
