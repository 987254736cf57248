use serde_json::Value;
use tokio::sync::broadcast;

/// One published event: a topic, a routing key and a JSON payload.
/// Events with the same key are delivered to a subscriber in publish order.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub key: String,
    pub payload: Value,
}

/// In-process event bus with topic/key routing.
///
/// Publication never blocks and never fails: with no subscribers the event
/// is dropped, which is fine for stream-style broadcasts. Durable events go
/// through the outbox first and reach the bus via the relay.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, topic: &str, key: &str, payload: Value) {
        let event = BusEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };
        // SendError only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish("order", "NIFTY", json!({"order_id": "o-1"}));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.topic, "order");
        assert_eq!(ev.key, "NIFTY");
        assert_eq!(ev.payload["order_id"], "o-1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish("audit", "x", json!({}));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_same_key_preserves_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish("advice", "NIFTY", json!({ "seq": i }));
        }
        for i in 0..5 {
            let ev = rx.recv().await.unwrap();
            assert_eq!(ev.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus = EventBus::default();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish("ticks", "k", json!({"n": 1}));
        assert_eq!(rx.recv().await.unwrap().payload["n"], 1);
    }
}
