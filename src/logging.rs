//! Structured logging setup.
//!
//! Logs go to stdout, one event per line. The default format is JSON for log
//! aggregation tooling; `LOG_PLAIN_TEXT=true` switches to the human-readable
//! console format for development. `RUST_LOG` overrides `LOG_LEVEL` when set.

use tracing_subscriber::EnvFilter;

use crate::config::Settings;

/// Initializes the global tracing subscriber. Call once at startup.
pub fn setup(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));

    if settings.log_plain_text {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .init();
    }
}
