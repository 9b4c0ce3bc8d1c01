//! Rate ledger service: binary entrypoint.
//! Loads settings, opens the ledger, starts the refresh scheduler and serves
//! the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rate_ledger::ingest::scheduler::spawn_refresh_scheduler;
use rate_ledger::metrics::Metrics;
use rate_ledger::{bootstrap, router, Settings};
use shuttle_axum::ShuttleAxum;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rate_ledger=info,warn"));

    // The runtime may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load()?;
    info!(
        db = %settings.db_path.display(),
        retention = %settings.retention,
        miss_policy = %settings.miss_policy,
        feeds = settings.feeds.len(),
        "settings loaded"
    );

    let state = bootstrap(&settings).context("bootstrapping ledger")?;

    if settings.refresh_interval_secs > 0 {
        spawn_refresh_scheduler(
            Arc::clone(&state.refresher),
            Duration::from_secs(settings.refresh_interval_secs),
        );
    }

    let metrics = Metrics::init()?;
    let app = router(state).merge(metrics.router());

    Ok(app.into())
}
