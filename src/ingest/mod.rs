// src/ingest/mod.rs
pub mod config;
pub mod providers;
pub mod refresh;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, FixedOffset, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::effective_date::EffectiveDateResolver;
use crate::error::Result;
use crate::ledger::{Ledger, UpsertOutcome};
use crate::model::{Observation, Source};
use crate::ingest::types::RawQuote;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_quotes_total", "Quotes returned by providers.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors and timeouts."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Quotes dropped before reaching the ledger."
        );
        describe_counter!("ledger_upserts_total", "Ledger writes, by outcome.");
        describe_counter!(
            "refresh_coalesced_total",
            "Refresh requests joined onto an in-flight refresh."
        );
        describe_counter!("retention_swept_total", "Rows removed by retention.");
        describe_counter!("ingest_runs_total", "Scheduled refresh passes.");
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when the refresh scheduler last ran."
        );
    });
}

/// Feed body: either a bare array of quotes or `{ "quotes": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FeedPayload {
    Bare(Vec<RawQuote>),
    Wrapped { quotes: Vec<RawQuote> },
}

impl FeedPayload {
    pub fn into_quotes(self) -> Vec<RawQuote> {
        match self {
            FeedPayload::Bare(q) | FeedPayload::Wrapped { quotes: q } => q,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub inserted: usize,
    pub updated: usize,
    pub rejected: usize,
}

/// Assign effective dates to `quotes` and write them to the ledger.
///
/// `offset` is the publisher's UTC offset; rules are evaluated on its local
/// wall clock. Quotes with unusable rates are dropped and counted; storage
/// failures abort the batch.
pub fn record_quotes(
    ledger: &Ledger,
    resolver: &EffectiveDateResolver,
    offset: FixedOffset,
    source: Source,
    quotes: Vec<RawQuote>,
    now: DateTime<Utc>,
) -> Result<RecordSummary> {
    let mut summary = RecordSummary::default();

    for q in quotes {
        // the publisher's stamp picks the effective date; capture time is ours
        let published = q.observed_at.unwrap_or(now);
        let local = published.with_timezone(&offset).naive_local();
        let obs = Observation {
            source,
            currency: q.currency,
            rate: q.rate,
            effective_date: resolver.resolve(source, local),
            captured_at: now,
        };

        if let Err(e) = obs.validate() {
            tracing::warn!(error = %e, %source, "dropping quote");
            counter!("ingest_rejected_total").increment(1);
            summary.rejected += 1;
            continue;
        }

        match ledger.upsert(&obs)? {
            UpsertOutcome::Inserted => {
                counter!("ledger_upserts_total", "outcome" => "inserted").increment(1);
                summary.inserted += 1;
            }
            UpsertOutcome::Updated => {
                counter!("ledger_upserts_total", "outcome" => "updated").increment(1);
                summary.updated += 1;
            }
        }
    }

    Ok(summary)
}
