use crate::domain::market::Candle;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::persistence::database::Database;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

pub struct SqliteCandleRepository {
    database: Database,
}

impl SqliteCandleRepository {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

fn row_to_candle(
    symbol: String,
    open_time: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: i64,
) -> Candle {
    Candle {
        symbol,
        open_time: Utc.timestamp_millis_opt(open_time).unwrap(),
        open: Decimal::from_str(&open).unwrap_or_default(),
        high: Decimal::from_str(&high).unwrap_or_default(),
        low: Decimal::from_str(&low).unwrap_or_default(),
        close: Decimal::from_str(&close).unwrap_or_default(),
        volume,
    }
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn save(&self, timeframe: &str, candle: &Candle) -> Result<bool> {
        // Monotonic guard: a new bar must advance the series.
        if let Some(last) = self.latest(&candle.symbol, timeframe).await? {
            if candle.open_time <= last.open_time {
                warn!(
                    "CandleRepository: rejected non-monotonic write for {} ({} <= {})",
                    candle.symbol, candle.open_time, last.open_time
                );
                return Ok(false);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO candles (symbol, timeframe, open_time, open, high, low, close, volume)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&candle.symbol)
        .bind(timeframe)
        .bind(candle.open_time.timestamp_millis())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume)
        .execute(&self.database.pool)
        .await
        .context("Failed to insert candle")?;

        Ok(true)
    }

    async fn latest(&self, symbol: &str, timeframe: &str) -> Result<Option<Candle>> {
        let row = sqlx::query_as::<_, (String, i64, String, String, String, String, i64)>(
            r#"
            SELECT symbol, open_time, open, high, low, close, volume
            FROM candles
            WHERE symbol = $1 AND timeframe = $2
            ORDER BY open_time DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .fetch_optional(&self.database.pool)
        .await
        .context("Failed to load latest candle")?;

        Ok(row.map(|(s, t, o, h, l, c, v)| row_to_candle(s, t, o, h, l, c, v)))
    }

    async fn range(
        &self,
        symbol: &str,
        timeframe: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let rows = sqlx::query_as::<_, (String, i64, String, String, String, String, i64)>(
            r#"
            SELECT symbol, open_time, open, high, low, close, volume
            FROM candles
            WHERE symbol = $1 AND timeframe = $2 AND open_time >= $3 AND open_time <= $4
            ORDER BY open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(timeframe)
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&self.database.pool)
        .await
        .context("Failed to load candle range")?;

        Ok(rows
            .into_iter()
            .map(|(s, t, o, h, l, c, v)| row_to_candle(s, t, o, h, l, c, v))
            .collect())
    }
}
