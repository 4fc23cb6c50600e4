//! Bounded exponential backoff for provider calls.
//!
//! The Stripe client itself never retries; layers that hold an idempotency
//! key wrap their calls here so the provider observes at-most-once
//! semantics. Only transport failures and 5xx responses are retried — a
//! 4xx answer is a fact about the request, not the weather.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Parameters for jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy with a custom attempt count.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// The jittered delay before retry number `attempt` (zero-based).
    ///
    /// Exponential growth capped at `max_delay`, jittered uniformly into
    /// the upper half of the window so concurrent retriers spread out.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.min(30) as i32);
        let full = self.initial_delay.as_secs_f64() * exp;
        let capped = full.min(self.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(capped / 2.0..=capped);
        Duration::from_secs_f64(jittered)
    }
}

/// Reports whether an error may succeed on retry.
///
/// Transport failures and provider 5xx responses are retryable; validation
/// errors, 4xx envelopes, and [`Error::InvalidAPIKey`] are not.
#[must_use]
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::Stripe(se) => se.status >= 500,
        _ => false,
    }
}

/// Executes `operation` with exponential backoff.
///
/// Retries up to `policy.max_attempts` times, sleeping a jittered delay
/// between attempts. Non-retryable errors return immediately.
///
/// # Errors
///
/// Returns the last error when attempts are exhausted, or the first
/// non-retryable error.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(error);
                }
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %error,
                    "retryable failure"
                );
                last_error = Some(error);
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                }
            }
        }
    }

    match last_error {
        Some(error) => Err(error),
        // max_attempts == 0: nothing ran, nothing to report.
        None => Err(Error::Config("retry policy allows zero attempts".to_owned())),
    }
}
