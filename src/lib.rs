// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod effective_date;
pub mod error;
pub mod fallback;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod retention;

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

pub use crate::api::{router, AppState, QueryPolicy};
pub use crate::config::Settings;
pub use crate::error::{Error, FetchError, Result};
pub use crate::ledger::Ledger;

use crate::ingest::config::build_providers;
use crate::ingest::refresh::Refresher;
use crate::retention::RetentionSweeper;

/// Open the ledger, run the startup retention sweep, and wire the refresher
/// and HTTP state from `settings`.
pub fn bootstrap(settings: &Settings) -> Result<AppState> {
    let offset = settings.offset()?;
    let ledger = Arc::new(Ledger::open(&settings.db_path)?);

    let sweeper = RetentionSweeper::new(settings.retention);
    let today = Utc::now().with_timezone(&offset).date_naive();
    let removed = sweeper.sweep(&ledger, today)?;
    info!(removed, window = %settings.retention, "startup retention sweep");

    let mut refresher = Refresher::new(Arc::clone(&ledger), settings.resolver(), sweeper, offset)
        .with_fetch_timeout(settings.fetch_timeout());
    for provider in build_providers(&settings.feeds, settings.fetch_timeout())? {
        refresher = refresher.with_provider(provider);
    }

    Ok(AppState::new(
        Arc::new(refresher),
        QueryPolicy::from_settings(settings),
    ))
}
