use crate::domain::outbox::OutboxEvent;
use crate::domain::repositories::OutboxRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

pub struct SqliteOutboxRepository {
    database: Database,
}

impl SqliteOutboxRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl OutboxRepository for SqliteOutboxRepository {
    async fn enqueue(&self, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox (id, topic, key, payload, created_at, published, published_at)
            VALUES ($1, $2, $3, $4, $5, 0, NULL)
            "#,
        )
        .bind(&event.id)
        .bind(&event.topic)
        .bind(&event.key)
        .bind(event.payload.to_string())
        .bind(event.created_at.timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to enqueue outbox event")?;
        Ok(())
    }

    async fn fetch_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, i64)>(
            r#"
            SELECT id, topic, key, payload, created_at
            FROM outbox
            WHERE published = 0
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to fetch unpublished outbox rows")?;

        rows.into_iter()
            .map(|(id, topic, key, payload, created_at)| {
                Ok(OutboxEvent {
                    id,
                    topic,
                    key,
                    payload: serde_json::from_str(&payload)
                        .context("Failed to decode outbox payload")?,
                    created_at: Utc.timestamp_millis_opt(created_at).unwrap(),
                    published: false,
                    published_at: None,
                })
            })
            .collect()
    }

    async fn mark_published(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox SET published = 1, published_at = $2 WHERE id = $1 AND published = 0",
        )
        .bind(id)
        .bind(at.timestamp_millis())
        .execute(&self.database.pool)
        .await
        .context("Failed to mark outbox event published")?;
        anyhow::ensure!(
            result.rows_affected() == 1,
            "outbox event {} not found or already published",
            id
        );
        Ok(())
    }
}
