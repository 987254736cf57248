use crate::domain::sentiment::SentimentProvider;
use crate::infrastructure::sentiment::analyzer::HeadlineAnalyzer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rss::Channel;
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info};

/// Scores the most recent headlines of a market-news RSS feed with the
/// VADER analyzer and averages them into one [0, 100] reading.
pub struct RssNewsSentimentProvider {
    client: Client,
    url: String,
    max_items: usize,
    analyzer: HeadlineAnalyzer,
}

impl RssNewsSentimentProvider {
    pub fn new(url: impl Into<String>, max_items: usize) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into(),
            max_items,
            analyzer: HeadlineAnalyzer::new(),
        }
    }

    fn score_channel(&self, channel: &Channel) -> Option<f64> {
        let scores: Vec<f64> = channel
            .items()
            .iter()
            .take(self.max_items)
            .filter_map(|item| item.title())
            .map(|title| {
                let s = self.analyzer.score_0_100(title);
                debug!("RssNewsSentiment: {:.1} <- {}", s, title);
                s
            })
            .collect();
        if scores.is_empty() {
            return None;
        }
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

#[async_trait]
impl SentimentProvider for RssNewsSentimentProvider {
    fn name(&self) -> &str {
        "news-rss"
    }

    async fn fetch_sentiment(&self) -> Result<Option<f64>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Failed to fetch RSS feed")?;
        if !response.status().is_success() {
            anyhow::bail!("RSS feed returned status {}", response.status());
        }
        let bytes = response.bytes().await.context("Failed to read RSS bytes")?;
        let channel =
            Channel::read_from(Cursor::new(bytes)).context("Failed to parse RSS feed")?;

        let score = self.score_channel(&channel);
        if let Some(s) = score {
            info!(
                "RssNewsSentiment: {:.1} from {} headlines",
                s,
                channel.items().len().min(self.max_items)
            );
        }
        Ok(score)
    }
}
