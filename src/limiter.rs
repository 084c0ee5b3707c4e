//! Token-bucket rate limiting for remote API calls.
//!
//! Every outbound request to the storage backend consumes one token from a
//! shared bucket with capacity `burst` refilled at `rps` tokens per second.
//! [`RateLimiter::acquire`] blocks until a token is available or the shutdown
//! signal is set, so a stuck quota never delays process termination by more
//! than one refill interval.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use indexer_core::limiter::RateLimiter;
//! use indexer_core::shutdown::ShutdownSignal;
//!
//! # async fn example() -> Result<(), indexer_core::shutdown::ShutdownRequested> {
//! let stop = ShutdownSignal::new();
//! let limiter = Arc::new(RateLimiter::new(8.0, 16.0, stop));
//! limiter.acquire().await?;
//! // ... one remote call
//! # Ok(())
//! # }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::shutdown::{ShutdownRequested, ShutdownSignal};

/// Minimum sleep when the bucket is empty, to avoid spin on tiny deficits.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Shared token-bucket limiter.
///
/// Mutable state lives behind its own mutex, which is only held for the refill
/// computation and never across a wait; concurrent acquirers therefore queue on
/// the bucket, not on each other.
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill rate in tokens per second.
    rate: f64,
    /// Bucket capacity (maximum burst).
    capacity: f64,
    state: Mutex<Bucket>,
    stop: ShutdownSignal,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    ///
    /// `rate` and `burst` come pre-validated from configuration (`rate > 0`,
    /// `burst >= 1`).
    #[must_use]
    pub fn new(rate: f64, burst: f64, stop: ShutdownSignal) -> Self {
        debug!(rate, burst, "creating rate limiter");
        Self {
            rate,
            capacity: burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                updated: Instant::now(),
            }),
            stop,
        }
    }

    /// Returns the configured refill rate in tokens per second.
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Consumes one token, waiting for a refill if the bucket is empty.
    ///
    /// Refill is computed from a monotonic clock and clamped to capacity.
    /// While waiting, the call parks on the shutdown signal for the deficit
    /// interval, so per-acquire latency is bounded by `1 / rate`.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownRequested`] as soon as the shutdown signal is set.
    pub async fn acquire(&self) -> Result<(), ShutdownRequested> {
        while !self.stop.is_set() {
            let wait = {
                let mut bucket = match self.state.lock() {
                    Ok(guard) => guard,
                    // A panic while holding the lock cannot corrupt the f64
                    // state; keep limiting with whatever value is there.
                    Err(poisoned) => poisoned.into_inner(),
                };
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(bucket.updated);
                if elapsed > Duration::ZERO {
                    bucket.tokens =
                        (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
                    bucket.updated = now;
                }

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }

                let needed = 1.0 - bucket.tokens;
                Duration::from_secs_f64(needed / self.rate).max(MIN_WAIT)
            };

            // Lock released above; wait rides the shutdown signal.
            self.stop.wait_for(wait).await;
        }

        Err(ShutdownRequested)
    }
}
