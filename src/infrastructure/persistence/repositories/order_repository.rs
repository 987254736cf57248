use crate::domain::order::Order;
use crate::domain::repositories::OrderRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;

pub struct SqliteOrderRepository {
    database: Database,
}

impl SqliteOrderRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn upsert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (broker_order_id, placed_at, symbol, status, body)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(broker_order_id) DO UPDATE SET
                status = excluded.status,
                body = excluded.body
            "#,
        )
        .bind(&order.broker_order_id)
        .bind(order.placed_at.timestamp_millis())
        .bind(&order.symbol)
        .bind(order.status.to_string())
        .bind(serde_json::to_string(order)?)
        .execute(&self.database.pool)
        .await
        .context("Failed to upsert order")?;
        Ok(())
    }

    async fn get(&self, broker_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM orders WHERE broker_order_id = $1",
        )
        .bind(broker_order_id)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load order")?;
        row.map(|(body,)| serde_json::from_str(&body).context("Failed to decode order body"))
            .transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT body FROM orders ORDER BY placed_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load recent orders")?;
        rows.iter()
            .map(|(body,)| serde_json::from_str(body).context("Failed to decode order body"))
            .collect()
    }
}
