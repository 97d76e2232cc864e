use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never below 1.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `operation` until it succeeds or the attempts are spent.
    ///
    /// The pause is an async sleep, so other tasks keep running meanwhile.
    pub async fn run<F, Fut, T>(&self, label: &str, operation: F) -> Result<T, RetryExhausted>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation = label, attempt, "delivery succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(
                        operation = label,
                        attempt,
                        error = %error,
                        "delivery failed after max attempts"
                    );
                    return Err(RetryExhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(error) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        error = %error,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "delivery attempt failed, retrying"
                    );
                    sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Last error of an operation that never succeeded.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub error: anyhow::Error,
}
