//! Bounded retry with exponential backoff.
//!
//! Every outbound collaborator call that may be retried (CRM, manager
//! notification, embedding during ingestion) goes through [`retry`]. Attempts
//! are capped; after the last attempt the final error is returned together
//! with the number of attempts made. Nothing is ever retried forever.
//!
//! Backoff: `base`, `2 * base`, `4 * base`, ... (exponent capped at 5).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before attempt number `attempt` (1-based; the first attempt
    /// has no delay).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.base_delay * (1u32 << (attempt - 2).min(5))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's attempts are exhausted.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    what: &str,
    should_retry: R,
    mut op: F,
) -> Result<Attempted<T>, Attempted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match op(attempt).await {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(err) => {
                let retryable = should_retry(&err);
                if attempt >= policy.max_attempts || !retryable {
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "attempt failed, retrying"
                );
                attempt += 1;
            }
        }
    }
}
