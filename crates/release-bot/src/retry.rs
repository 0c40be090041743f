//! Bounded polling.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How often and how long to wait for remote state to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Checks after the first one.
    pub retries: u32,
    /// Delay before each retry.
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            interval: Duration::from_secs(5),
        }
    }
}

impl PollPolicy {
    /// Total number of checks, the immediate one included.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.retries + 1
    }
}

/// How a poll ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Polled<T> {
    Ready(T),
    /// Every check ran and none was ready; carries the last observation.
    Exhausted { attempts: u32, last: T },
}

/// Run `check` now and then once per `policy.interval` until `ready` accepts
/// its result or the retries are spent. Errors from `check` end the poll.
pub async fn poll_until<T, E, F, Fut, P>(
    policy: &PollPolicy,
    operation_name: &str,
    mut check: F,
    ready: P,
) -> Result<Polled<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let observed = check().await?;
        if ready(&observed) {
            return Ok(Polled::Ready(observed));
        }
        if attempt >= policy.attempts() {
            return Ok(Polled::Exhausted {
                attempts: attempt,
                last: observed,
            });
        }
        debug!(
            "{operation_name} not ready (check {attempt}/{}), checking again in {:?}",
            policy.attempts(),
            policy.interval
        );
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_first_check_does_not_sleep() {
        let start = tokio::time::Instant::now();
        let polled: Result<_, ()> =
            poll_until(&PollPolicy::default(), "columns", || async { Ok(3) }, |n| *n == 3).await;
        assert_eq!(polled, Ok(Polled::Ready(3)));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_retries() {
        let counter = AtomicU32::new(0);
        let checks = &counter;
        let start = tokio::time::Instant::now();
        let polled: Result<_, ()> = poll_until(
            &PollPolicy::default(),
            "columns",
            move || async move { Ok(checks.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| *n == 3,
        )
        .await;
        assert_eq!(polled, Ok(Polled::Ready(3)));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_all_checks() {
        let counter = AtomicU32::new(0);
        let checks = &counter;
        let start = tokio::time::Instant::now();
        let polled: Result<_, ()> = poll_until(
            &PollPolicy::default(),
            "columns",
            move || async move {
                checks.fetch_add(1, Ordering::SeqCst);
                Ok(2)
            },
            |n| *n == 3,
        )
        .await;
        assert_eq!(
            polled,
            Ok(Polled::Exhausted {
                attempts: 4,
                last: 2
            })
        );
        assert_eq!(checks.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_ends_poll() {
        let polled: Result<Polled<u32>, &str> = poll_until(
            &PollPolicy::default(),
            "columns",
            || async { Err("boom") },
            |_| true,
        )
        .await;
        assert_eq!(polled, Err("boom"));
    }
}
