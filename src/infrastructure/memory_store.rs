use crate::domain::ports::{Clock, FastStateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process [`FastStateStore`] with lazy expiry.
///
/// All mutation goes through one mutex, which makes `set_if_absent` and
/// `incr` atomic with respect to each other; that is the property the
/// idempotency and rate-counter paths depend on.
pub struct InMemoryStateStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.and_then(|d| {
            chrono::Duration::from_std(d)
                .ok()
                .map(|cd| self.clock.now() + cd)
        })
    }

    fn is_live(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        entry.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

#[async_trait]
impl FastStateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if self.is_live(entry, now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = self.expiry(ttl);
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key) {
            if self.is_live(existing, now) {
                return false;
            }
        }
        let expires_at = self.expiry(ttl);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        true
    }

    async fn incr(&self, key: &str, ttl_if_new: Option<Duration>) -> i64 {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let live = entries
            .get(key)
            .filter(|e| self.is_live(e, now))
            .and_then(|e| e.value.parse::<i64>().ok());
        match live {
            Some(current) => {
                let next = current + 1;
                // The rolling window keeps the original expiry.
                if let Some(entry) = entries.get_mut(key) {
                    entry.value = next.to_string();
                }
                next
            }
            None => {
                let expires_at = self.expiry(ttl_if_new);
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at,
                    },
                );
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::ManualClock;
    use chrono::TimeZone;

    fn fixture() -> (Arc<ManualClock>, InMemoryStateStore) {
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2026, 7, 29, 9, 0, 0).unwrap(),
        ));
        let store = InMemoryStateStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_, store) = fixture();
        store.put("tf:a", "1", None).await;
        assert_eq!(store.get("tf:a").await.as_deref(), Some("1"));
        store.delete("tf:a").await;
        assert_eq!(store.get("tf:a").await, None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let (clock, store) = fixture();
        store
            .put("tf:ltp", "24510.5", Some(Duration::from_secs(2)))
            .await;
        assert!(store.get("tf:ltp").await.is_some());

        clock.advance(Duration::from_secs(3));
        assert_eq!(store.get("tf:ltp").await, None);
    }

    #[tokio::test]
    async fn test_put_without_ttl_never_expires() {
        let (clock, store) = fixture();
        store.put("tf:cfg", "x", None).await;
        clock.advance(Duration::from_secs(86_400));
        assert!(store.get("tf:cfg").await.is_some());
    }

    #[tokio::test]
    async fn test_set_if_absent_semantics() {
        let (clock, store) = fixture();
        assert!(
            store
                .set_if_absent("order:idemp:h", "1", Some(Duration::from_secs(120)))
                .await
        );
        assert!(
            !store
                .set_if_absent("order:idemp:h", "1", Some(Duration::from_secs(120)))
                .await
        );

        // After the window the key can be claimed again.
        clock.advance(Duration::from_secs(121));
        assert!(
            store
                .set_if_absent("order:idemp:h", "1", Some(Duration::from_secs(120)))
                .await
        );
    }

    #[tokio::test]
    async fn test_incr_rolling_window() {
        let (clock, store) = fixture();
        assert_eq!(store.incr("tf:opm", Some(Duration::from_secs(60))).await, 1);
        assert_eq!(store.incr("tf:opm", Some(Duration::from_secs(60))).await, 2);

        // 59s in: the window opened at the first increment, so the counter
        // still grows without a TTL reset.
        clock.advance(Duration::from_secs(59));
        assert_eq!(store.incr("tf:opm", Some(Duration::from_secs(60))).await, 3);

        // Past 60s from creation the counter starts over.
        clock.advance(Duration::from_secs(2));
        assert_eq!(store.incr("tf:opm", Some(Duration::from_secs(60))).await, 1);
    }
}
