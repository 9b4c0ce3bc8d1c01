use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::ingest::types::{RateProvider, RawQuote};
use crate::ingest::FeedPayload;
use crate::model::Source;

/// Serves quotes from memory or from a JSON file re-read on every fetch.
pub struct FixtureProvider {
    source: Source,
    mode: Mode,
}

enum Mode {
    Inline(Vec<RawQuote>),
    File(PathBuf),
}

impl FixtureProvider {
    pub fn from_quotes(source: Source, quotes: Vec<RawQuote>) -> Self {
        Self {
            source,
            mode: Mode::Inline(quotes),
        }
    }

    pub fn from_json_str(source: Source, s: &str) -> Result<Self, FetchError> {
        let quotes = parse_quotes(s)?;
        Ok(Self::from_quotes(source, quotes))
    }

    pub fn from_path(source: Source, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            mode: Mode::File(path.into()),
        }
    }
}

fn parse_quotes(s: &str) -> Result<Vec<RawQuote>, FetchError> {
    let payload: FeedPayload =
        serde_json::from_str(s).map_err(|e| FetchError::Parse(e.to_string()))?;
    Ok(payload.into_quotes())
}

#[async_trait]
impl RateProvider for FixtureProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawQuote>, FetchError> {
        let quotes = match &self.mode {
            Mode::Inline(q) => q.clone(),
            Mode::File(path) => {
                let body = tokio::fs::read_to_string(path).await?;
                parse_quotes(&body)?
            }
        };
        Ok(quotes)
    }

    fn source(&self) -> Source {
        self.source
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
