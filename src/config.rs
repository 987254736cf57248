use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Which broker gateway to wire: the deterministic mock or Upstox REST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Mock,
    Upstox,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Mode::Mock),
            "upstox" => Ok(Mode::Upstox),
            other => anyhow::bail!("Invalid MODE: {}. Must be 'mock' or 'upstox'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// `sqlite://...`; in-memory repositories when unset.
    pub database_url: Option<String>,
    pub instrument_key: String,
    pub lot_size: i64,

    // Engine loop
    pub engine_tick_ms: u64,
    pub max_exec_per_tick: usize,
    pub scan_limit: usize,

    // Refresh cadences
    pub signals_refresh_ms: u64,
    pub candles_refresh_ms: u64,
    pub sentiment_refresh_ms: u64,
    pub outbox_poll_ms: u64,

    // Guards and thresholds
    pub vol_spike_atr_jump_pct: f64,
    pub max_spread_pct: f64,
    pub slippage_guard_enabled: bool,
    pub retention_days: i64,

    // Broker session
    pub upstox_base_url: String,
    pub upstox_api_key: String,
    pub upstox_api_secret: String,
    pub upstox_access_token: Option<String>,
    pub upstox_refresh_token: Option<String>,
    pub refresh_enabled: bool,
    pub refresh_on_startup: bool,
    pub refresh_hour_ist: u32,
    pub refresh_minute_ist: u32,

    // Sentiment sources
    pub news_rss_url: Option<String>,
    pub social_api_enabled: bool,
    pub social_api_url: Option<String>,
    pub social_api_key: Option<String>,
    pub social_search_keywords: Vec<String>,

    /// Display timezone; engine internals stay in UTC with fixed IST
    /// market hours.
    pub timezone: String,
}

fn parsed<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .with_context(|| format!("Failed to parse {}", key))
}

fn flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Extract `(hour, minute)` from a cron expression, accepting the 6-field
/// `sec min hour ...` form as well as the classic 5-field one.
pub fn cron_hour_minute(cron: &str) -> Result<(u32, u32)> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    let (minute_idx, hour_idx) = match fields.len() {
        6 => (1, 2),
        5 => (0, 1),
        n => anyhow::bail!("Invalid cron '{}': {} fields", cron, n),
    };
    let minute: u32 = fields[minute_idx]
        .parse()
        .with_context(|| format!("Invalid cron minute in '{}'", cron))?;
    let hour: u32 = fields[hour_idx]
        .parse()
        .with_context(|| format!("Invalid cron hour in '{}'", cron))?;
    anyhow::ensure!(minute < 60 && hour < 24, "Cron '{}' out of range", cron);
    Ok((hour, minute))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mode = Mode::from_str(&env::var("MODE").unwrap_or_else(|_| "mock".to_string()))?;

        let cron = env::var("TRADE_UPSTOX_REFRESH_CRON")
            .unwrap_or_else(|_| "0 20 3 * * *".to_string());
        let (refresh_hour_ist, refresh_minute_ist) = cron_hour_minute(&cron)?;

        let social_search_keywords = env::var("TRADING_SOCIAL_SEARCH_KEYWORDS")
            .unwrap_or_else(|_| "nifty,sensex,banknifty".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            mode,
            database_url: env::var("DATABASE_URL").ok(),
            instrument_key: env::var("TRADE_INSTRUMENT_KEY")
                .unwrap_or_else(|_| "NSE_INDEX|Nifty 50".to_string()),
            lot_size: parsed("TRADE_LOT_SIZE", "75")?,

            engine_tick_ms: parsed("TRADE_ENGINE_TICK_MS", "2000")?,
            max_exec_per_tick: parsed("TRADE_ENGINE_MAX_EXEC_PER_TICK", "3")?,
            scan_limit: parsed("TRADE_ENGINE_SCAN_LIMIT", "32")?,

            signals_refresh_ms: parsed("TRADE_SIGNALS_REFRESH_MS", "15000")?,
            candles_refresh_ms: parsed("TRADE_CANDLES1M_REFRESH_MS", "15000")?,
            sentiment_refresh_ms: parsed("TRADE_SENTIMENT_REFRESH_MS", "60000")?,
            outbox_poll_ms: parsed("TRADE_OUTBOX_POLL_MS", "500")?,

            vol_spike_atr_jump_pct: parsed("TRADE_VOL_SPIKE_ATR_JUMP_PCT", "50.0")?,
            max_spread_pct: parsed("TRADE_MAX_SPREAD_PCT", "0.35")?,
            slippage_guard_enabled: flag("TRADE_SLIPPAGE_GUARD_ENABLED", true),
            retention_days: parsed("TRADE_RETENTION_DAYS", "7")?,

            upstox_base_url: env::var("UPSTOX_BASE_URL")
                .unwrap_or_else(|_| "https://api.upstox.com".to_string()),
            upstox_api_key: env::var("UPSTOX_API_KEY").unwrap_or_default(),
            upstox_api_secret: env::var("UPSTOX_API_SECRET").unwrap_or_default(),
            upstox_access_token: env::var("UPSTOX_ACCESS_TOKEN").ok(),
            upstox_refresh_token: env::var("UPSTOX_REFRESH_TOKEN").ok(),
            refresh_enabled: flag("TRADE_UPSTOX_REFRESH_ENABLED", true),
            refresh_on_startup: flag("TRADE_UPSTOX_REFRESH_ON_STARTUP", true),
            refresh_hour_ist,
            refresh_minute_ist,

            news_rss_url: env::var("TRADE_NEWS_RSS_URL").ok(),
            social_api_enabled: flag("TRADING_SOCIAL_API_ENABLED", false),
            social_api_url: env::var("TRADING_SOCIAL_API_URL").ok(),
            social_api_key: env::var("TRADING_SOCIAL_API_KEY").ok(),
            social_search_keywords,

            timezone: env::var("APP_TIMEZONE").unwrap_or_else(|_| "Asia/Kolkata".to_string()),
        })
    }

    /// Deterministic defaults for tests: mock broker, in-memory storage.
    pub fn for_tests() -> Self {
        Self {
            mode: Mode::Mock,
            database_url: None,
            instrument_key: "NSE_INDEX|Nifty 50".to_string(),
            lot_size: 75,
            engine_tick_ms: 2000,
            max_exec_per_tick: 3,
            scan_limit: 32,
            signals_refresh_ms: 15_000,
            candles_refresh_ms: 15_000,
            sentiment_refresh_ms: 60_000,
            outbox_poll_ms: 500,
            vol_spike_atr_jump_pct: 50.0,
            max_spread_pct: 0.35,
            slippage_guard_enabled: false,
            retention_days: 7,
            upstox_base_url: "https://api.upstox.com".to_string(),
            upstox_api_key: String::new(),
            upstox_api_secret: String::new(),
            upstox_access_token: None,
            upstox_refresh_token: None,
            refresh_enabled: false,
            refresh_on_startup: false,
            refresh_hour_ist: 3,
            refresh_minute_ist: 20,
            news_rss_url: None,
            social_api_enabled: false,
            social_api_url: None,
            social_api_key: None,
            social_search_keywords: vec!["nifty".to_string()],
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cron_hour_minute_six_fields() {
        assert_eq!(cron_hour_minute("0 20 3 * * *").unwrap(), (3, 20));
    }

    #[test]
    fn test_cron_hour_minute_five_fields() {
        assert_eq!(cron_hour_minute("20 3 * * *").unwrap(), (3, 20));
    }

    #[test]
    fn test_cron_rejects_garbage() {
        assert!(cron_hour_minute("every day at three").is_err());
        assert!(cron_hour_minute("0 99 3 * * *").is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::from_str("mock").unwrap(), Mode::Mock);
        assert_eq!(Mode::from_str("UPSTOX").unwrap(), Mode::Upstox);
        assert!(Mode::from_str("zerodha").is_err());
    }
}
