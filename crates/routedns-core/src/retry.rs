//! Bounded exponential-backoff retry
//!
//! Every outbound call made by a provider goes through [`RetryPolicy::run`].
//! The policy knows nothing about DNS or proxies; it only looks at the
//! [`ErrorKind`] of a failure to decide whether another attempt is allowed.
//!
//! ## Schedule
//!
//! After failed attempt `n` (0-based) the executor sleeps
//! `min(base_delay * 2^n, max_delay)`. With the defaults (1s base, 30s cap,
//! 2 retries) that is 1s then 2s before giving up.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for a fallible async operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Error kinds that allow another attempt
    pub retryable: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            retryable: vec![ErrorKind::Transient],
        }
    }
}

impl RetryPolicy {
    /// Create a policy retrying transient errors only
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            retryable: vec![ErrorKind::Transient],
        }
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Replace the set of retryable error kinds
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// Delay to wait after failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `error` may be retried under this policy
    pub fn is_retryable(&self, error: &Error) -> bool {
        self.retryable.contains(&error.kind())
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries` retries are exhausted
    ///
    /// The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && self.is_retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    debug!(
                        "Retry {}/{} after {:?}: {}",
                        attempt, self.max_retries, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
