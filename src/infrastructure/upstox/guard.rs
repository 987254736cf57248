use crate::domain::errors::{EngineError, EngineResult, ErrorKind};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Fail-fast guard in front of broker transport.
///
/// Counts *transport-class* outcomes only: `BROKER_ERROR` and
/// `BROKER_TIMEOUT` extend the failure streak, while a 4xx-style
/// rejection (bad request, not found, unauthenticated) proves the wire is
/// fine and clears it, same as a success. Once the streak reaches the
/// trip threshold the gateway stops issuing requests for a cool-off;
/// after that a single probe is admitted, and its outcome decides whether
/// traffic resumes or the cool-off re-arms.
pub(super) struct TransportGuard {
    inner: Mutex<GuardInner>,
    trip_after: u32,
    cool_off: Duration,
}

struct GuardInner {
    failure_streak: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

impl TransportGuard {
    pub(super) fn new(trip_after: u32, cool_off: Duration) -> Self {
        Self {
            inner: Mutex::new(GuardInner {
                failure_streak: 0,
                open_until: None,
                probe_in_flight: false,
            }),
            trip_after,
            cool_off,
        }
    }

    /// Gate a broker call before it is issued. Fails fast while the
    /// cool-off runs or a probe is already out.
    pub(super) async fn admit(&self) -> EngineResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(open_until) = inner.open_until else {
            return Ok(());
        };
        let now = Instant::now();
        if now < open_until {
            return Err(EngineError::broker(format!(
                "broker transport suppressed for another {:?}",
                open_until - now
            )));
        }
        if inner.probe_in_flight {
            return Err(EngineError::broker("broker transport probe in flight"));
        }
        info!("UpstoxGateway: cool-off elapsed, probing broker transport");
        inner.probe_in_flight = true;
        Ok(())
    }

    /// Record the outcome of an admitted call; `error` is `None` on
    /// success.
    pub(super) async fn record(&self, error: Option<&EngineError>) {
        let mut inner = self.inner.lock().await;
        inner.probe_in_flight = false;

        let transport_failure = matches!(
            error.map(EngineError::kind),
            Some(ErrorKind::BrokerError | ErrorKind::BrokerTimeout)
        );
        if !transport_failure {
            if inner.open_until.is_some() {
                info!("UpstoxGateway: broker transport recovered");
            }
            inner.failure_streak = 0;
            inner.open_until = None;
            return;
        }

        inner.failure_streak += 1;
        if inner.failure_streak >= self.trip_after || inner.open_until.is_some() {
            warn!(
                "UpstoxGateway: suppressing broker calls for {:?} ({} consecutive transport failures)",
                self.cool_off, inner.failure_streak
            );
            inner.open_until = Some(Instant::now() + self.cool_off);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_err() -> EngineError {
        EngineError::broker("connection reset")
    }

    async fn trip(guard: &TransportGuard, times: u32) {
        for _ in 0..times {
            guard.admit().await.unwrap();
            guard.record(Some(&transport_err())).await;
        }
    }

    #[tokio::test]
    async fn test_trips_after_transport_streak() {
        let guard = TransportGuard::new(3, Duration::from_secs(60));
        trip(&guard, 2).await;
        assert!(guard.admit().await.is_ok());
        guard.record(Some(&transport_err())).await;
        // Third consecutive transport failure: suppressed.
        assert!(guard.admit().await.is_err());
    }

    #[tokio::test]
    async fn test_domain_rejections_do_not_trip() {
        let guard = TransportGuard::new(2, Duration::from_secs(60));
        for _ in 0..10 {
            guard.admit().await.unwrap();
            guard
                .record(Some(&EngineError::not_found("no such order")))
                .await;
        }
        assert!(guard.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_rejection_clears_streak_like_success() {
        let guard = TransportGuard::new(2, Duration::from_secs(60));
        guard.admit().await.unwrap();
        guard.record(Some(&transport_err())).await;
        // The broker answered (a 400): the wire works, streak resets.
        guard.admit().await.unwrap();
        guard
            .record(Some(&EngineError::bad_request("missing price")))
            .await;
        guard.admit().await.unwrap();
        guard.record(Some(&transport_err())).await;
        // Streak is 1 again, not 2.
        assert!(guard.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_after_cool_off_closes_on_success() {
        let guard = TransportGuard::new(2, Duration::from_millis(50));
        trip(&guard, 2).await;
        assert!(guard.admit().await.is_err());

        tokio::time::sleep(Duration::from_millis(80)).await;
        // One probe goes through; a second caller is still held back.
        assert!(guard.admit().await.is_ok());
        assert!(guard.admit().await.is_err());

        guard.record(None).await;
        assert!(guard.admit().await.is_ok());
        assert!(guard.admit().await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_probe_rearms_cool_off() {
        let guard = TransportGuard::new(2, Duration::from_millis(50));
        trip(&guard, 2).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(guard.admit().await.is_ok());
        guard.record(Some(&EngineError::BrokerTimeout { millis: 10_000 })).await;
        assert!(guard.admit().await.is_err());
    }
}
