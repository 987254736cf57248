use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared SQLite pool. Decimals are stored as TEXT, instants as INTEGER
/// epoch milliseconds (UTC).
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .await
                        .context("Failed to create database directory")?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe, open_time)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create candles table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ticks (
                symbol TEXT NOT NULL,
                ts INTEGER NOT NULL,
                ltp TEXT NOT NULL,
                quantity INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ticks_symbol_ts ON ticks (symbol, ts);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create ticks table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS advices (
                id TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                instrument_token TEXT NOT NULL,
                txn_type TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_advices_status_created
            ON advices (status, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create advices table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                broker_order_id TEXT PRIMARY KEY,
                placed_at INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                status TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_placed ON orders (placed_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create orders table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_config (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                as_of INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_config table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                as_of INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_risk_snapshots_as_of ON risk_snapshots (as_of);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                breached INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_risk_events_ts ON risk_events (ts);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create risk_events table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sentiment_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                as_of INTEGER NOT NULL,
                score REAL NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sentiment_as_of ON sentiment_snapshots (as_of);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create sentiment_snapshots table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_signals (
                id TEXT PRIMARY KEY,
                at INTEGER NOT NULL,
                kind TEXT NOT NULL,
                instrument_key TEXT NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_market_signals_at ON market_signals (at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create market_signals table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chain_analytics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                underlying_key TEXT NOT NULL,
                expiry TEXT NOT NULL,
                calculated_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chain_analytics_key
            ON chain_analytics (underlying_key, expiry, calculated_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create chain_analytics table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                key TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                published INTEGER NOT NULL DEFAULT 0,
                published_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_unpublished
            ON outbox (published, created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create outbox table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
