use crate::domain::repositories::RiskRepository;
use crate::domain::risk::{RiskConfig, RiskEvent, RiskSnapshot};
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct SqliteRiskRepository {
    database: Database,
}

impl SqliteRiskRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl RiskRepository for SqliteRiskRepository {
    async fn current_config(&self) -> Result<Option<RiskConfig>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM risk_config ORDER BY as_of DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load risk config")?;
        row.map(|(body,)| {
            serde_json::from_str(&body).context("Failed to decode risk config body")
        })
        .transpose()
    }

    async fn save_config(&self, config: &RiskConfig) -> Result<()> {
        sqlx::query("INSERT INTO risk_config (as_of, body) VALUES ($1, $2)")
            .bind(config.as_of.timestamp_millis())
            .bind(serde_json::to_string(config)?)
            .execute(&self.database.pool)
            .await
            .context("Failed to save risk config")?;
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &RiskSnapshot) -> Result<()> {
        sqlx::query("INSERT INTO risk_snapshots (as_of, body) VALUES ($1, $2)")
            .bind(snapshot.as_of.timestamp_millis())
            .bind(serde_json::to_string(snapshot)?)
            .execute(&self.database.pool)
            .await
            .context("Failed to save risk snapshot")?;
        Ok(())
    }

    async fn latest_snapshot(&self) -> Result<Option<RiskSnapshot>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM risk_snapshots ORDER BY as_of DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest risk snapshot")?;
        row.map(|(body,)| {
            serde_json::from_str(&body).context("Failed to decode risk snapshot body")
        })
        .transpose()
    }

    async fn append_event(&self, event: &RiskEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO risk_events (ts, event_type, breached, body) VALUES ($1, $2, $3, $4)",
        )
        .bind(event.ts.timestamp_millis())
        .bind(event.event_type.to_string())
        .bind(event.breached as i64)
        .bind(serde_json::to_string(event)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to append risk event")?;
        Ok(())
    }

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<RiskEvent>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM risk_events WHERE ts >= $1 ORDER BY ts ASC",
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load risk events")?;
        rows.iter()
            .map(|(body,)| {
                serde_json::from_str(body).context("Failed to decode risk event body")
            })
            .collect()
    }
}
