use crate::domain::repositories::SentimentRepository;
use crate::domain::sentiment::MarketSentimentSnapshot;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;

pub struct SqliteSentimentRepository {
    database: Database,
}

impl SqliteSentimentRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl SentimentRepository for SqliteSentimentRepository {
    async fn save(&self, snapshot: &MarketSentimentSnapshot) -> Result<()> {
        sqlx::query("INSERT INTO sentiment_snapshots (as_of, score, body) VALUES ($1, $2, $3)")
            .bind(snapshot.as_of.timestamp_millis())
            .bind(snapshot.score)
            .bind(serde_json::to_string(snapshot)?)
            .execute(&self.database.pool)
            .await
            .context("Failed to save sentiment snapshot")?;
        Ok(())
    }

    async fn latest(&self) -> Result<Option<MarketSentimentSnapshot>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM sentiment_snapshots ORDER BY as_of DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest sentiment")?;
        row.map(|(body,)| {
            serde_json::from_str(&body).context("Failed to decode sentiment body")
        })
        .transpose()
    }

    async fn history(&self, limit: usize) -> Result<Vec<MarketSentimentSnapshot>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM sentiment_snapshots ORDER BY as_of DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load sentiment history")?;
        rows.iter()
            .map(|(body,)| serde_json::from_str(body).context("Failed to decode sentiment body"))
            .collect()
    }
}
