//! Optra - headless intraday options-trading engine for the NSE.
//!
//! Runs the tick-driven decision/execution pipeline against the broker
//! configured by `MODE`. Metrics are push-based; there is no HTTP server.
//!
//! # Usage
//! ```sh
//! MODE=mock cargo run
//! ```

use anyhow::Result;
use optra::application::system::Application;
use optra::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Optra {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: mode={:?}, instrument={}, tick={}ms",
        config.mode, config.instrument_key, config.engine_tick_ms
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;
    info!("Engine running. Press Ctrl+C to shut down.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received; stopping engine...");
    handle.shutdown();

    if let Ok(text) = handle.metrics.gather() {
        info!("Final metrics:\n{}", text);
    }
    Ok(())
}
