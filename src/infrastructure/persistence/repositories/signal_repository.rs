use crate::domain::repositories::SignalRepository;
use crate::domain::signal::MarketSignalRecord;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct SqliteSignalRepository {
    database: Database,
}

impl SqliteSignalRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn save(&self, record: &MarketSignalRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_signals (id, at, kind, instrument_key, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.id)
        .bind(record.at.timestamp_millis())
        .bind(&record.kind)
        .bind(&record.instrument_key)
        .bind(serde_json::to_string(record)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to save market signal")?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MarketSignalRecord>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM market_signals ORDER BY at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent signals")?;
        rows.iter()
            .map(|(body,)| serde_json::from_str(body).context("Failed to decode signal body"))
            .collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM market_signals WHERE at < $1")
            .bind(cutoff.timestamp_millis())
            .execute(&self.database.pool)
            .await
            .context("Failed to purge signals")?;
        Ok(result.rows_affected())
    }
}
