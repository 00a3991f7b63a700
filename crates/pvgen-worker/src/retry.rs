//! Retry and failure-suppression helpers.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Doubling delay schedule with an upper bound.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// Delay to wait now; the following one doubles, up to the bound.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.max);
        self.next = delay.saturating_mul(2).min(self.max);
        delay
    }
}

/// Run `operation` up to `attempts` times, sleeping per `backoff` between
/// failures.
///
/// On exhaustion the last error is returned with the number of attempts made.
pub async fn retry_async<F, Fut, T, E>(
    name: &str,
    attempts: u32,
    mut backoff: Backoff,
    operation: F,
) -> Result<T, (E, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                let delay = backoff.next_delay();
                warn!("{} failed (attempt {}/{}), retrying in {:?}: {}", name, attempt, attempts, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err((e, attempt)),
        }
    }
}

/// Counts consecutive failures of a repeating operation and mutes logging
/// once a limit is passed, so a persistent outage does not flood the log.
#[derive(Debug, Default)]
pub struct FailureTracker {
    streak: u32,
    log_limit: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self { streak: 0, log_limit }
    }

    /// Record a failure. Returns `true` when it should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.log_limit + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.log_limit
            );
        }
        self.streak <= self.log_limit
    }

    pub fn record_success(&mut self) {
        match self.streak {
            0 => {}
            n if n > self.log_limit => warn!("Recovered after {} consecutive failures", n),
            n => debug!("Recovered after {} consecutive failures", n),
        }
        self.streak = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }

    pub fn is_suppressed(&self) -> bool {
        self.streak > self.log_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(5);

        for _ in 0..5 {
            assert!(tracker.record_failure());
        }
        assert!(!tracker.is_suppressed());

        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.is_suppressed());
        assert_eq!(tracker.failure_count(), 7);

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_eventual_success() {
        let calls = AtomicU32::new(0);
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));

        let result = retry_async("ping", 4, backoff, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection refused")
                } else {
                    Ok("PONG")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("PONG"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(5));
        let result: Result<(), _> = retry_async("ping", 3, backoff, || async { Err("down") }).await;
        assert_eq!(result, Err(("down", 3)));
    }
}
