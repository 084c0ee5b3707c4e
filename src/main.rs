//! Ingestion daemon entry point.
//!
//! Startup order: settings, logging, smoke-test gate, health endpoint,
//! signal handlers, vector store, limiter, extractors, provider, then the
//! configured run mode. Fatal startup failures exit non-zero with a precise
//! message; cooperative shutdown exits zero after an optional grace period.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indexer_core::config::IngestMode;
use indexer_core::ingest::IngestService;
use indexer_core::limiter::RateLimiter;
use indexer_core::shutdown::{self, ShutdownSignal};
use indexer_core::store::VectorStore;
use indexer_core::{Settings, extract, health, logging, provider, smoke};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::from_env().context("invalid configuration")?);
    logging::setup(&settings);

    if smoke::maybe_run("ingest").await {
        return Ok(());
    }

    health::spawn(&settings.health_host, settings.ingest_health_port, "ingest");

    let stop = ShutdownSignal::new();
    shutdown::install_signal_handlers(&stop);

    info!(
        component = "ingest",
        flow = "startup",
        pid = std::process::id(),
        mode = settings.ingest_mode.as_str(),
        poll_seconds = settings.poll_seconds,
        "startup"
    );
    info!(
        component = "ingest",
        flow = "config",
        config = %settings.safe_dump(),
        "config"
    );

    let store = match VectorStore::connect(&settings).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(
                component = "ingest",
                flow = "startup",
                qdrant_url = %settings.qdrant_url,
                error = %err,
                "store_init_failed"
            );
            return Err(err).context("vector store init failed");
        }
    };

    let limiter = Arc::new(RateLimiter::new(
        settings.api_rps,
        settings.api_burst,
        stop.clone(),
    ));
    let registry = extract::init_extractors(&settings);
    let provider =
        provider::build_provider(Arc::clone(&settings)).context("storage provider init failed")?;

    let service = IngestService::new(store, provider, registry, Arc::clone(&settings));

    match settings.ingest_mode {
        IngestMode::Once => {
            service.run_once(&limiter, &stop).await?;
            return Ok(());
        }
        IngestMode::Loop => {
            service.run_loop(&limiter, &stop).await?;
        }
    }

    let grace = settings.shutdown_grace_seconds;
    if grace > 0 {
        info!(
            component = "ingest",
            flow = "shutdown",
            shutdown_grace_seconds = grace,
            "shutdown_grace"
        );
        tokio::time::sleep(Duration::from_secs(grace)).await;
    }

    info!(
        component = "ingest",
        flow = "shutdown",
        stopped = stop.is_set(),
        "shutdown"
    );
    Ok(())
}
