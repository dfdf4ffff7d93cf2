use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::error::Result;

/// Bounded exponential backoff around any fallible async operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay awaited after the zero-based `attempt` failed:
    /// `min(initial * multiplier^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max_delay
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt + 1 >= max_attempts {
                        log::warn!("giving up after {max_attempts} attempts: {err}");
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    log::debug!(
                        "attempt {} of {max_attempts} failed ({err}); retrying in {}ms",
                        attempt + 1,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Retry with the default backoff and the given attempt budget.
pub async fn with_retry<T, F, Fut>(operation: F, max_attempts: u32) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::default()
        .with_max_attempts(max_attempts)
        .run(operation)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_two_server_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let counter = Arc::clone(&attempts);
        let value = with_retry(
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(AppError::server_failure(Some(503), "unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            },
            3,
        )
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn client_rejection_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = with_retry(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(AppError::ClientRejected { status: 404 }) }
            },
            3,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClientRejected);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_last_error_after_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err::<(), _>(AppError::NetworkUnavailable("offline".into()))
                    } else {
                        Err(AppError::RateLimited)
                    }
                }
            },
            3,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_does_not_block_other_tasks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                for _ in 0..5 {
                    sleep(Duration::from_millis(500)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let _ = with_retry(
            || async { Err::<(), _>(AppError::server_failure(None, "down")) },
            2,
        )
        .await;

        // One 1s backoff elapsed; the concurrent task kept ticking meanwhile.
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        ticker.await.unwrap();
    }
}
