//! Bounded retry with exponential backoff
//!
//! `RetryPolicy` is a plain value describing how many attempts to make and
//! how long to wait between them. `retry` drives an async operation under a
//! policy, giving up early on non-transient errors or cancellation.

use crate::CancellationToken;
use std::future::Future;
use std::time::Duration;

/// Retry policy: attempt budget plus an exponential backoff curve
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied per retry
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Attempt 1 waits `initial_delay`, attempt 2 waits
    /// `initial_delay * multiplier`, and so on, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Why a retried operation ultimately failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("{0}")]
    Fatal(E),
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, if the operation failed rather than being cancelled
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } | Self::Fatal(last) => Some(last),
            Self::Cancelled => None,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, runs
/// out of attempts, or `token` is cancelled.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        if !is_transient(&error) {
            tracing::debug!(attempt, %error, "non-transient failure, not retrying");
            return Err(RetryError::Fatal(error));
        }
        if attempt >= max_attempts {
            tracing::warn!(attempts = attempt, %error, "retry budget exhausted");
            return Err(RetryError::Exhausted { attempts: attempt, last: error });
        }

        let delay = policy.delay_after(attempt);
        tracing::info!(attempt, ?delay, %error, "transient failure, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
