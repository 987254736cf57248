use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Topics carried on the stream and the event bus.
pub mod topics {
    pub const TICKS: &str = "ticks";
    pub const SIGNALS_ENHANCED: &str = "signals.enhanced";
    pub const SENTIMENT: &str = "sentiment";
    pub const ORDER: &str = "order";
    pub const ADVICE: &str = "advice";
    pub const AUDIT: &str = "audit";
    pub const ENGINE_STATE: &str = "engine.state";
    pub const AUTH_TOKEN: &str = "auth.token";
}

/// Transactional-outbox row. Inserted alongside the domain write and
/// drained by the relay; at-least-once, so consumers dedupe on `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: String,
    pub topic: String,
    pub key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub published: bool,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(now: DateTime<Utc>, topic: &str, payload: Value) -> Self {
        let key = routing_key(topic, &payload);
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            key,
            payload,
            created_at: now,
            published: false,
            published_at: None,
        }
    }

    pub fn with_key(now: DateTime<Utc>, topic: &str, key: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            key: key.into(),
            payload,
            created_at: now,
            published: false,
            published_at: None,
        }
    }
}

/// Routing-key selection for order/advice payloads, in priority order:
/// `symbol` -> `instrument_key`/`instrument_token` -> `order_id` -> `id`,
/// falling back to the last dotted segment of the topic.
pub fn routing_key(topic: &str, payload: &Value) -> String {
    const CANDIDATES: [&str; 5] = [
        "symbol",
        "instrument_key",
        "instrument_token",
        "order_id",
        "id",
    ];
    for field in CANDIDATES {
        if let Some(v) = payload.get(field).and_then(Value::as_str) {
            if !v.is_empty() {
                return v.to_string();
            }
        }
    }
    topic.rsplit('.').next().unwrap_or(topic).to_string()
}
