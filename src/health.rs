//! Liveness endpoint for container orchestration.
//!
//! Serves `GET /health` and `GET /healthz` with `200 ok`; every other path is
//! a 404. Runs on a background task and never blocks startup. A non-positive
//! port disables the server entirely.

use std::future::IntoFuture;

use axum::Router;
use axum::routing::get;
use tracing::{error, info};

/// Builds the two-route health router.
fn router() -> Router {
    Router::new()
        .route("/health", get(ok))
        .route("/healthz", get(ok))
}

async fn ok() -> &'static str {
    "ok\n"
}

/// Spawns the health server if `port` is positive.
pub fn spawn(host: &str, port: i32, component: &'static str) {
    if port <= 0 {
        return;
    }

    let addr = format!("{host}:{port}");
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(
                    component,
                    flow = "health",
                    addr = %addr,
                    paths = "/health,/healthz",
                    "health_server_started"
                );
                if let Err(err) = axum::serve(listener, router()).into_future().await {
                    error!(component, flow = "health", addr = %addr, error = %err, "health_server_failed");
                }
            }
            Err(err) => {
                error!(component, flow = "health", addr = %addr, error = %err, "health_server_failed");
            }
        }
    });
}
