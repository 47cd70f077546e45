//! Bounded exponential backoff
//!
//! Used for startup steps that depend on other services being up: address
//! resolution and binding the well-known port. Retries are always bounded;
//! the last error is handed back once the budget is spent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Total attempts including the first; 0 is treated as 1
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Wait after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.initial
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    /// Run `op` until it succeeds or the attempt budget is spent
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt < attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_sequence() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 15);
        let delays: Vec<u64> = (1..=8).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(policy.delay(40), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures() {
        let policy = RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(1), 5);
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<u32, String> = policy
            .retry("flaky", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms then 200ms of backoff
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_last_error() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(20), 4);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = policy
            .retry("always failing", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {attempt}")) }
            })
            .await;

        assert_eq!(result, Err("failure 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1), 0);
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .retry("once", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("nope") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
