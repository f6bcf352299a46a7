//! Bounded retry with a fixed backoff sequence.

use std::{fmt::Display, future::Future, time::Duration};

/// Retry policy wrapped around every call that crosses a network boundary.
///
/// Every error is retried the same way; the policy has no notion of
/// transient vs. permanent failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)],
        }
    }
}

impl RetryPolicy {
    /// `max_attempts` of zero is treated as a single attempt.
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff }
    }

    /// Policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the `failed_attempt`-th failure (1-indexed).
    ///
    /// Attempts past the end of the sequence reuse its last element; an empty
    /// sequence means no delay.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let idx = (failed_attempt.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or(Duration::ZERO)
    }

    /// Run `operation` until it succeeds or attempts are exhausted. The last
    /// error is returned as-is so callers can still match on its kind.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err(err),
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
