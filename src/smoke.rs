//! Container-orchestration smoke-test mode.
//!
//! When `SMOKE_TEST_SECONDS` is set to a positive number, the process logs,
//! sleeps that long, and exits successfully without touching any remote
//! service. Used by deployment pipelines to verify the image boots.

use std::time::Duration;

use tracing::{info, warn};

/// Runs smoke-test mode if configured. Returns `true` when the caller should
/// exit immediately afterwards.
pub async fn maybe_run(component: &'static str) -> bool {
    let Some(raw) = std::env::var("SMOKE_TEST_SECONDS")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    else {
        return false;
    };

    let seconds = match raw.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            warn!(component, flow = "smoke_test", value = %raw, "smoke_test_seconds_invalid");
            return false;
        }
    };
    if seconds <= 0.0 {
        warn!(component, flow = "smoke_test", seconds, "smoke_test_seconds_non_positive");
        return false;
    }

    info!(component, flow = "smoke_test", seconds, "smoke_test_mode_enabled");
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    info!(component, flow = "smoke_test", seconds, "smoke_test_mode_completed");
    true
}
