use crate::domain::option_chain::OptionChainAnalytics;
use crate::domain::repositories::AnalyticsRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub struct SqliteAnalyticsRepository {
    database: Database,
}

impl SqliteAnalyticsRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl AnalyticsRepository for SqliteAnalyticsRepository {
    async fn save(&self, analytics: &OptionChainAnalytics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chain_analytics (underlying_key, expiry, calculated_at, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&analytics.underlying_key)
        .bind(analytics.expiry.to_string())
        .bind(analytics.calculated_at.timestamp_millis())
        .bind(serde_json::to_string(analytics)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save chain analytics")?;
        Ok(())
    }

    async fn latest(
        &self,
        underlying_key: &str,
        expiry: NaiveDate,
    ) -> Result<Option<OptionChainAnalytics>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT body FROM chain_analytics
            WHERE underlying_key = $1 AND expiry = $2
            ORDER BY calculated_at DESC
            LIMIT 1
            "#,
        )
        .bind(underlying_key)
        .bind(expiry.to_string())
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load chain analytics")?;
        row.map(|(body,)| {
            serde_json::from_str(&body).context("Failed to decode analytics body")
        })
        .transpose()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chain_analytics WHERE calculated_at < $1")
            .bind(cutoff.timestamp_millis())
            .execute(&self.database.pool)
            .await
            .context("Failed to purge chain analytics")?;
        Ok(result.rows_affected())
    }
}
