//! Bounded retry with exponential backoff

use crate::errors::Result;
use crate::metrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,

    /// Scale each delay by uniform[0.5, 1.0]
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay after the given 0-based attempt:
    /// `min(base_delay * exponential_base^attempt, max_delay)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt as i32);
        let nanos = self.base_delay.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }

    /// Delay to wait after the given 0-based attempt, jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter {
            let scale = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(scale)
        } else {
            delay
        }
    }
}

/// Retry strategy for one dependency
#[derive(Debug, Clone)]
pub struct Retrier {
    name: String,
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke `op` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` is reached. The last error propagates.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt + 1 >= max_attempts => {
                    warn!(
                        dependency = %self.name,
                        attempts = attempt + 1,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        dependency = %self.name,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    metrics::record_retry(&self.name);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn timeout() -> AppError {
        AppError::Timeout {
            operation: "question-search".into(),
            timeout_ms: 10,
        }
    }

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            exponential_base: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_backoff_formula() {
        let p = policy(false);
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(300));
        assert_eq!(p.backoff(30), Duration::from_millis(300));
    }

    #[test]
    fn test_backoff_keeps_sub_millisecond_delays() {
        let p = RetryPolicy {
            base_delay: Duration::from_micros(250),
            max_delay: Duration::from_millis(2),
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(p.backoff(0), Duration::from_micros(250));
        assert_eq!(p.backoff(1), Duration::from_micros(500));
        assert_eq!(p.backoff(3), Duration::from_millis(2));
        assert_eq!(p.backoff(4), Duration::from_millis(2));
    }

    #[test]
    fn test_jitter_range() {
        let p = policy(true);
        for attempt in 0..4 {
            let base = p.backoff(attempt);
            for _ in 0..50 {
                let d = p.delay_for(attempt);
                assert!(d <= base + Duration::from_micros(1));
                assert!(d >= base.mul_f64(0.5) - Duration::from_millis(1));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_bounded() {
        let retrier = Retrier::new("question-search", policy(true));
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<()> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(timeout())
            })
            .await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() <= Duration::from_millis(3 * 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let retrier = Retrier::new("embedding", policy(false));
        let calls = AtomicU32::new(0);

        let result = retrier
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(timeout())
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_fast() {
        let retrier = Retrier::new("language-model", policy(false));
        let calls = AtomicU32::new(0);

        let result: Result<()> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::CircuitOpen {
                    service: "language-model".into(),
                    retry_after: Duration::from_secs(1),
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
