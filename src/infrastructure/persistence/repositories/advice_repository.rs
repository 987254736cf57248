use crate::domain::advice::{Advice, AdviceStatus};
use crate::domain::repositories::AdviceRepository;
use crate::domain::types::TxnType;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Advices persisted with indexed lifecycle columns plus the full entity as
/// a JSON body, so schema churn on advisory fields never needs a migration.
pub struct SqliteAdviceRepository {
    database: Database,
}

impl SqliteAdviceRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    fn decode(body: &str) -> Result<Advice> {
        serde_json::from_str(body).context("Failed to decode advice body")
    }
}

#[async_trait]
impl AdviceRepository for SqliteAdviceRepository {
    async fn insert(&self, advice: &Advice) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO advices
                (id, created_at, updated_at, symbol, instrument_token, txn_type,
                 status, expires_at, retry_count, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&advice.id)
        .bind(advice.created_at.timestamp_millis())
        .bind(advice.updated_at.timestamp_millis())
        .bind(&advice.symbol)
        .bind(&advice.instrument_token)
        .bind(advice.txn_type.to_string())
        .bind(advice.status.to_string())
        .bind(advice.expires_at.map(|t| t.timestamp_millis()))
        .bind(advice.retry_count as i64)
        .bind(serde_json::to_string(advice)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert advice")?;
        Ok(())
    }

    async fn update(&self, advice: &Advice) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE advices
            SET updated_at = $2, status = $3, expires_at = $4, retry_count = $5, body = $6
            WHERE id = $1
            "#,
        )
        .bind(&advice.id)
        .bind(advice.updated_at.timestamp_millis())
        .bind(advice.status.to_string())
        .bind(advice.expires_at.map(|t| t.timestamp_millis()))
        .bind(advice.retry_count as i64)
        .bind(serde_json::to_string(advice)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to update advice")?;

        anyhow::ensure!(result.rows_affected() == 1, "advice {} not found", advice.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Advice>> {
        let row = sqlx::query_as::<_, (String,)>("SELECT body FROM advices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.database.pool)
            .await
            .context("Failed to load advice")?;
        row.map(|(body,)| Self::decode(&body)).transpose()
    }

    async fn find_pending(&self, limit: usize) -> Result<Vec<Advice>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT body FROM advices
            WHERE status = 'PENDING'
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load pending advices")?;
        rows.iter().map(|(body,)| Self::decode(body)).collect()
    }

    async fn find_open_for(
        &self,
        instrument_token: &str,
        txn_type: TxnType,
    ) -> Result<Vec<Advice>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT body FROM advices
            WHERE instrument_token = $1
              AND txn_type = $2
              AND status IN ('PENDING', 'VALIDATED', 'QUEUED', 'FAILED')
            "#,
        )
        .bind(instrument_token)
        .bind(txn_type.to_string())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load open advices")?;

        let advices: Result<Vec<Advice>> =
            rows.iter().map(|(body,)| Self::decode(body)).collect();
        // Exhausted-retry FAILED rows are terminal and no longer "open".
        Ok(advices?.into_iter().filter(|a| !a.is_terminal()).collect())
    }

    async fn find_expirable(&self, now: DateTime<Utc>) -> Result<Vec<Advice>> {
        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT body FROM advices
            WHERE status IN ('PENDING', 'VALIDATED', 'QUEUED')
              AND expires_at IS NOT NULL
              AND expires_at < $1
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load expirable advices")?;
        rows.iter().map(|(body,)| Self::decode(body)).collect()
    }

    async fn count_by_status(&self, status: AdviceStatus) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM advices WHERE status = $1")
                .bind(status.to_string())
                .fetch_one(&self.database.pool)
                .await
                .context("Failed to count advices")?;
        Ok(count as usize)
    }

    async fn created_since(&self, since: DateTime<Utc>) -> Result<Vec<Advice>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM advices WHERE created_at >= $1 ORDER BY created_at ASC",
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load advices since")?;
        rows.iter().map(|(body,)| Self::decode(body)).collect()
    }
}
