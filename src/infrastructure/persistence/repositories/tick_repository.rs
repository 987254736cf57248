use crate::domain::market::Tick;
use crate::domain::repositories::TickRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;

pub struct SqliteTickRepository {
    database: Database,
}

impl SqliteTickRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

#[async_trait]
impl TickRepository for SqliteTickRepository {
    async fn append(&self, tick: &Tick) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ticks (symbol, ts, ltp, quantity)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&tick.symbol)
        .bind(tick.ts.timestamp_millis())
        .bind(tick.ltp.to_string())
        .bind(tick.quantity)
        .execute(&self.database.pool)
        .await
        .context("Failed to append tick")?;
        Ok(())
    }

    async fn latest(&self, symbol: &str) -> Result<Option<Tick>> {
        let row = sqlx::query_as::<_, (String, i64, String, i64)>(
            r#"
            SELECT symbol, ts, ltp, quantity
            FROM ticks
            WHERE symbol = $1
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest tick")?;

        Ok(row.map(|(symbol, ts, ltp, quantity)| Tick {
            symbol,
            ts: Utc.timestamp_millis_opt(ts).unwrap(),
            ltp: Decimal::from_str(&ltp).unwrap_or_default(),
            quantity,
        }))
    }
}
