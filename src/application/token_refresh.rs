//! Broker session keepalive: optional run at startup plus a daily run at
//! a fixed IST wall-clock time (default 03:20), publishing the outcome on
//! `auth.token`.

use crate::domain::market_hours;
use crate::domain::outbox::{OutboxEvent, topics};
use crate::domain::ports::{BrokerGateway, Clock};
use crate::domain::repositories::OutboxRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TokenRefreshConfig {
    pub enabled: bool,
    pub run_on_startup: bool,
    /// Daily IST wall-clock time of the scheduled run.
    pub hour_ist: u32,
    pub minute_ist: u32,
}

impl Default for TokenRefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            run_on_startup: true,
            hour_ist: 3,
            minute_ist: 20,
        }
    }
}

pub struct TokenRefreshJob {
    gateway: Arc<dyn BrokerGateway>,
    outbox: Arc<dyn OutboxRepository>,
    clock: Arc<dyn Clock>,
    config: TokenRefreshConfig,
}

impl TokenRefreshJob {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        outbox: Arc<dyn OutboxRepository>,
        clock: Arc<dyn Clock>,
        config: TokenRefreshConfig,
    ) -> Self {
        Self {
            gateway,
            outbox,
            clock,
            config,
        }
    }

    async fn publish_status(&self, status: &str, error: Option<String>) {
        let now = self.clock.now();
        let event = OutboxEvent::with_key(
            now,
            topics::AUTH_TOKEN,
            "token",
            serde_json::json!({
                "status": status,
                "error": error,
                "as_of": now.to_rfc3339(),
            }),
        );
        if let Err(e) = self.outbox.enqueue(&event).await {
            warn!("TokenRefresh: failed to enqueue status: {:#}", e);
        }
    }

    /// One refresh attempt with its status event.
    pub async fn run_once(&self) {
        if !self.config.enabled {
            self.publish_status("disabled", None).await;
            return;
        }
        match self.gateway.refresh_access_token().await {
            Ok(()) => {
                info!("TokenRefresh: access token refreshed");
                self.publish_status("ok:refreshed", None).await;
            }
            Err(e) => {
                warn!("TokenRefresh: refresh failed: {}", e);
                self.publish_status("error", Some(e.to_string())).await;
            }
        }
    }

    /// Startup run (if configured) followed by the daily schedule.
    pub async fn run(self: Arc<Self>) {
        if self.config.run_on_startup {
            self.run_once().await;
        }
        loop {
            let secs = market_hours::seconds_until_ist(
                self.clock.now(),
                self.config.hour_ist,
                self.config.minute_ist,
            );
            tokio::time::sleep(Duration::from_secs(secs.max(1) as u64)).await;
            self.run_once().await;
        }
    }
}
