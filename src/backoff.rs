//! Retry with jittered exponential backoff for flaky remote calls.
//!
//! [`execute_with_backoff`] wraps one remote operation. Each attempt,
//! including every retry, first takes a token from the rate limiter, so the
//! total outbound request rate stays bounded even during a failure storm,
//! which is the surface the remote quota actually meters.
//!
//! Only the enumerated HTTP statuses (429 and the common 5xx gateway family)
//! are retried. Network-level failures (timeouts, connection resets) are
//! surfaced to the caller unchanged.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::limiter::RateLimiter;
use crate::shutdown::{ShutdownRequested, ShutdownSignal};

/// HTTP statuses that warrant a retry.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Jitter bounds applied to every computed delay.
const JITTER_MIN: f64 = 0.7;
const JITTER_MAX: f64 = 1.3;

/// Implemented by remote error types so the executor can classify failures.
pub trait RetryableError: From<ShutdownRequested> {
    /// The HTTP status of the failure, if the failure carries one.
    fn status(&self) -> Option<u16>;
}

/// Delay schedule for retries: `min(max_delay, base_delay * 2^(attempt-1))`
/// scaled by a uniform jitter in `[0.7, 1.3)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the initial attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Creates a policy from configured values.
    #[must_use]
    pub fn new(retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
            max_delay,
        }
    }

    /// Computes the jittered delay before retry number `attempt` (1-indexed).
    #[must_use]
    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(JITTER_MIN..JITTER_MAX);
        Duration::from_secs_f64(capped * jitter)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            retries: 8,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Runs `call`, retrying retryable HTTP failures under `policy`.
///
/// Every attempt acquires a limiter token first. The inter-retry sleep parks
/// on the shutdown signal, so a signaled process stops retrying within one
/// delay interval.
///
/// # Errors
///
/// Returns the original failure for non-retryable errors or once retries are
/// exhausted, and `ShutdownRequested` (converted into `E`) when interrupted.
pub async fn execute_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    limiter: &RateLimiter,
    stop: &ShutdownSignal,
    mut call: F,
) -> Result<T, E>
where
    E: RetryableError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        limiter.acquire().await?;

        match call().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let retryable = error
                    .status()
                    .is_some_and(|status| RETRYABLE_STATUSES.contains(&status));
                if !retryable {
                    return Err(error);
                }

                attempt += 1;
                if attempt > policy.retries {
                    return Err(error);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    component = "ingest",
                    flow = "google_api",
                    status = error.status().unwrap_or(0),
                    attempt,
                    delay_seconds = delay.as_secs_f64(),
                    max_retries = policy.retries,
                    "google_api_retry"
                );

                if stop.wait_for(delay).await {
                    return Err(ShutdownRequested.into());
                }
            }
        }
    }
}
