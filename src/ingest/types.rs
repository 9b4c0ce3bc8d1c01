// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::{Currency, Source};

/// One quote as a provider reports it, before an effective date is assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawQuote {
    pub currency: Currency,
    pub rate: f64,
    /// Publisher's stamp; drives the effective date. Falls back to fetch time.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl RawQuote {
    pub fn new(currency: Currency, rate: f64) -> Self {
        Self {
            currency,
            rate,
            observed_at: None,
        }
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }
}

#[async_trait::async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawQuote>, FetchError>;
    fn source(&self) -> Source;
    fn name(&self) -> &'static str;
}
