//! Retry policy with exponential backoff and jitter
//!
//! Only rate-limit and transient network failures are retried. The delay
//! before attempt `n` (n >= 1) is `base * 2^n`, capped at `max_delay`, plus up
//! to `jitter_factor` of the computed delay.

use crate::error::{ClientError, ErrorKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt)
    pub max_retries: u32,

    /// Base delay for server-side and network failures
    pub base_delay: Duration,

    /// Base delay for rate-limit failures
    pub rate_limit_base_delay: Duration,

    /// Upper bound for the pre-jitter delay
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0) added on top of the computed delay
    pub jitter_factor: f64,

    /// Whether to honour a provider supplied Retry-After
    pub respect_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.1,
            respect_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom retry budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Create a policy with no retries
    pub fn no_retry() -> Self {
        Self::new(0)
    }

    /// Pre-jitter delay before `attempt` (1-based retry number)
    pub fn backoff_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let base = match kind {
            ErrorKind::RateLimitExceeded => self.rate_limit_base_delay,
            _ => self.base_delay,
        };
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        base.checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep before `attempt`, including jitter and Retry-After
    pub fn calculate_delay(&self, attempt: u32, error: &ClientError) -> Duration {
        if self.respect_retry_after {
            if let Some(retry_after) = error.retry_after() {
                return retry_after.min(self.max_delay);
            }
        }

        let delay = self.backoff_delay(attempt, error.kind());
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter_range = delay.as_secs_f64() * self.jitter_factor;
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_range);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Check if we should retry based on the error and retries already made
    pub fn should_retry(&self, error: &ClientError, retries: u32) -> bool {
        if retries >= self.max_retries || !error.is_retryable() {
            return false;
        }

        // Not worth holding the caller for a window that ends after the cap
        match error.retry_after() {
            Some(wait) => wait <= self.max_delay,
            None => true,
        }
    }
}

/// Result of a retry operation
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    /// Final outcome
    pub result: Result<T, ClientError>,

    /// Number of retries made after the initial attempt
    pub retries: u32,

    /// Total time spent sleeping between attempts
    pub total_delay: Duration,

    /// Kinds of every error observed, oldest first
    pub error_history: Vec<ErrorKind>,
}

impl<T> RetryResult<T> {
    /// Surface the outcome with the retry count attached to any error
    pub fn into_result(self) -> Result<T, ClientError> {
        let retries = self.retries;
        self.result.map_err(|err| err.with_retries(retries))
    }
}

/// Executor for retry operations
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute an operation with retry logic.
    ///
    /// The operation receives the attempt index (0 for the initial attempt).
    pub async fn execute<F, T, Fut>(&self, mut operation: F) -> RetryResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut retries = 0;
        let mut total_delay = Duration::ZERO;
        let mut error_history = Vec::new();

        loop {
            let error = match operation(retries).await {
                Ok(value) => {
                    return RetryResult {
                        result: Ok(value),
                        retries,
                        total_delay,
                        error_history,
                    };
                }
                Err(error) => error,
            };
            error_history.push(error.kind());

            if !self.policy.should_retry(&error, retries) {
                if retries > 0 {
                    warn!("Giving up after {} retries: {}", retries, error);
                }
                return RetryResult {
                    result: Err(error),
                    retries,
                    total_delay,
                    error_history,
                };
            }

            retries += 1;
            let delay = self.policy.calculate_delay(retries, &error);
            debug!("Retry {} in {:?} after: {}", retries, delay, error);
            total_delay += delay;
            tokio::time::sleep(delay).await;
        }
    }
}
