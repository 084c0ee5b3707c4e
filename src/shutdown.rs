//! Process-wide cooperative shutdown.
//!
//! A single [`ShutdownSignal`] is created at startup and cloned into every
//! component that blocks: the rate limiter, the backoff executor, the
//! provider's listing loops, download loops, and the orchestrator. The signal
//! is one-shot and never cleared; once set, every suspension point observes it
//! within its next wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

/// Error raised when a blocking operation is interrupted by shutdown.
///
/// Propagates up through the limiter, the backoff executor, and extractors;
/// the orchestrator converts it into a `skipped_stopped` status and drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("shutdown requested")]
pub struct ShutdownRequested;

/// Cloneable handle to the process-wide shutdown flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    set: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether shutdown has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Requests shutdown. Idempotent; the signal is never cleared.
    pub fn set(&self) {
        if !self.inner.set.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns `Err(ShutdownRequested)` if the signal is set.
    pub fn check(&self) -> Result<(), ShutdownRequested> {
        if self.is_set() {
            Err(ShutdownRequested)
        } else {
            Ok(())
        }
    }

    /// Waits until the signal is set or `timeout` elapses.
    ///
    /// Returns `is_set()` after the wait, so callers can use the return value
    /// directly as "should I stop".
    pub async fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_set() {
            return true;
        }

        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before re-checking, so a `set()` racing with this
        // call cannot be missed between the check and the wait.
        notified.as_mut().enable();
        if self.is_set() {
            return true;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        self.is_set()
    }
}

/// Installs handlers for the two common termination signals.
///
/// Each signal sets the shutdown flag exactly once; subsequent deliveries are
/// no-ops because the flag is idempotent.
pub fn install_signal_handlers(stop: &ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        for (kind, name) in [(SignalKind::terminate(), "SIGTERM"), (SignalKind::interrupt(), "SIGINT")] {
            let stop = stop.clone();
            match signal(kind) {
                Ok(mut sig) => {
                    tokio::spawn(async move {
                        if sig.recv().await.is_some() {
                            warn!(component = "ingest", flow = "shutdown", signal = name, "shutdown_signal");
                            stop.set();
                        }
                    });
                }
                Err(error) => {
                    warn!(
                        component = "ingest",
                        flow = "shutdown",
                        signal = name,
                        error = %error,
                        "signal_handler_install_failed"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(component = "ingest", flow = "shutdown", signal = "ctrl_c", "shutdown_signal");
                stop.set();
            }
        });
    }
}
