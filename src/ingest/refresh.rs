// src/ingest/refresh.rs
//! Fetch → effective date → upsert, with at most one refresh in flight per source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::effective_date::EffectiveDateResolver;
use crate::error::{FetchError, Result};
use crate::ingest::types::RateProvider;
use crate::ingest::{ensure_metrics_described, record_quotes, RecordSummary};
use crate::ledger::Ledger;
use crate::model::Source;
use crate::retention::RetentionSweeper;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Quotes were fetched and written.
    Recorded(RecordSummary),
    /// Another refresh for the source was running; this call waited for it.
    Coalesced,
    /// The provider failed or timed out; the ledger was not touched.
    Failed(String),
    /// No provider is configured for the source.
    NoProvider,
}

struct Feed {
    provider: Arc<dyn RateProvider>,
    in_flight: Mutex<()>,
}

pub struct Refresher {
    feeds: HashMap<Source, Feed>,
    ledger: Arc<Ledger>,
    resolver: EffectiveDateResolver,
    sweeper: RetentionSweeper,
    offset: FixedOffset,
    fetch_timeout: Duration,
}

impl Refresher {
    pub fn new(
        ledger: Arc<Ledger>,
        resolver: EffectiveDateResolver,
        sweeper: RetentionSweeper,
        offset: FixedOffset,
    ) -> Self {
        ensure_metrics_described();
        Self {
            feeds: HashMap::new(),
            ledger,
            resolver,
            sweeper,
            offset,
            fetch_timeout: Duration::from_secs(10),
        }
    }

    /// Register a provider; replaces any earlier one for the same source.
    pub fn with_provider(mut self, provider: Arc<dyn RateProvider>) -> Self {
        self.feeds.insert(
            provider.source(),
            Feed {
                provider,
                in_flight: Mutex::new(()),
            },
        );
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Configured sources, in a stable order.
    pub fn sources(&self) -> Vec<Source> {
        let mut v: Vec<_> = self.feeds.keys().copied().collect();
        v.sort();
        v
    }

    /// Refresh one source. A concurrent call for the same source waits for the
    /// running refresh and returns `Coalesced` without fetching again.
    pub async fn refresh_source(&self, source: Source, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let Some(feed) = self.feeds.get(&source) else {
            return Ok(RefreshOutcome::NoProvider);
        };

        let _guard = match feed.in_flight.try_lock() {
            Ok(g) => g,
            Err(_) => {
                debug!(%source, "refresh already in flight; waiting");
                counter!("refresh_coalesced_total").increment(1);
                let _done = feed.in_flight.lock().await;
                return Ok(RefreshOutcome::Coalesced);
            }
        };

        let fetched = tokio::time::timeout(self.fetch_timeout, feed.provider.fetch_latest()).await;
        let quotes = match fetched {
            Ok(Ok(q)) => {
                counter!("ingest_quotes_total", "source" => source.as_str()).increment(q.len() as u64);
                q
            }
            Ok(Err(e)) => return Ok(self.fetch_failed(source, feed, e)),
            Err(_) => {
                let ms = u64::try_from(self.fetch_timeout.as_millis()).unwrap_or(u64::MAX);
                return Ok(self.fetch_failed(source, feed, FetchError::Timeout(ms)));
            }
        };

        let summary = record_quotes(&self.ledger, &self.resolver, self.offset, source, quotes, now)?;
        let today = now.with_timezone(&self.offset).date_naive();
        self.sweeper.sweep(&self.ledger, today)?;

        info!(
            %source,
            provider = feed.provider.name(),
            inserted = summary.inserted,
            updated = summary.updated,
            rejected = summary.rejected,
            "refresh recorded"
        );
        Ok(RefreshOutcome::Recorded(summary))
    }

    fn fetch_failed(&self, source: Source, feed: &Feed, e: FetchError) -> RefreshOutcome {
        warn!(error = %e, %source, provider = feed.provider.name(), "provider error");
        counter!("ingest_provider_errors_total").increment(1);
        RefreshOutcome::Failed(e.to_string())
    }

    /// Refresh every configured source concurrently.
    pub async fn refresh_all(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<(Source, Result<RefreshOutcome>)> {
        let mut set = JoinSet::new();
        for source in self.sources() {
            let this = Arc::clone(self);
            set.spawn(async move { (source, this.refresh_source(source, now).await) });
        }

        let mut out = Vec::with_capacity(self.feeds.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => out.push(r),
                Err(e) => warn!(error = %e, "refresh task aborted"),
            }
        }
        out.sort_by_key(|(s, _)| *s);
        out
    }
}
