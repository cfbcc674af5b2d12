//! Exponential backoff with jitter.
//!
//! Shared by every network-touching stage (crawler, embedder, uploader).
//! Only errors classified retryable by [`PipelineError::is_retryable`] are
//! retried; a 404 or a provider protocol mismatch fails immediately.

use std::time::Duration;

use tracing::{error, warn};

use crate::error::{PipelineError, Result};

/// Backoff parameters for one call site.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential delay.
    pub max_delay: Duration,
    /// Additive jitter as a fraction of the delay (0.0–1.0).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy with the given attempt/delay bounds and 10% jitter.
    pub const fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter: 0.1,
        }
    }

    /// No delays, for tests.
    pub const fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based): exponential doubling
    /// capped at `max_delay`, plus up to `jitter` of random slack.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2.0_f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jittered = capped + capped * self.jitter * rand::random::<f64>();
        Duration::from_secs_f64(jittered)
    }
}

/// Run `op` until it succeeds, the error is terminal, or retries run out.
///
/// `op` is a closure returning a fresh future per attempt, the same shape the
/// HTTP clients use (`|| async { ... }`).
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 0 {
                    error!(
                        op = op_name,
                        attempts = attempt + 1,
                        error = %e,
                        "retries exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(RetryPolicy::immediate(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::Network("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(RetryPolicy::immediate(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::Network("still down".into())) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(RetryPolicy::immediate(5), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(PipelineError::Http {
                    status: 404,
                    url: "https://example.com/gone".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        // Capped past the ceiling.
        assert_eq!(policy.delay_for(4), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60));
        for _ in 0..100 {
            let d = policy.delay_for(0);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_secs_f64(2.2));
        }
    }
}
