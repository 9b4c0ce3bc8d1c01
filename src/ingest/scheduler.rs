// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::ingest::refresh::{RefreshOutcome, Refresher};

/// Spawn a background task that refreshes every source each `interval`.
/// The first tick fires immediately.
pub fn spawn_refresh_scheduler(refresher: Arc<Refresher>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Utc::now();

            for (source, result) in refresher.refresh_all(now).await {
                match result {
                    Ok(RefreshOutcome::Recorded(s)) => tracing::debug!(
                        target: "ingest",
                        %source,
                        inserted = s.inserted,
                        updated = s.updated,
                        "scheduled refresh"
                    ),
                    Ok(other) => tracing::debug!(target: "ingest", %source, ?other, "scheduled refresh"),
                    Err(e) => tracing::error!(target: "ingest", %source, error = %e, "scheduled refresh failed"),
                }
            }

            counter!("ingest_runs_total").increment(1);
            gauge!("ingest_last_run_ts").set(now.timestamp() as f64);
        }
    })
}
