// src/ingest/config.rs
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::ingest::providers::{fixture::FixtureProvider, http_feed::HttpFeedProvider};
use crate::ingest::types::RateProvider;
use crate::model::Source;

/// One `[[feeds]]` entry in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedConfig {
    Http { source: Source, url: String },
    Fixture { source: Source, path: PathBuf },
}

impl FeedConfig {
    pub fn source(&self) -> Source {
        match self {
            FeedConfig::Http { source, .. } | FeedConfig::Fixture { source, .. } => *source,
        }
    }
}

/// Build providers for `feeds`; at most one feed per source.
pub fn build_providers(
    feeds: &[FeedConfig],
    fetch_timeout: Duration,
) -> Result<Vec<Arc<dyn RateProvider>>> {
    let mut seen = Vec::with_capacity(feeds.len());
    let mut out: Vec<Arc<dyn RateProvider>> = Vec::with_capacity(feeds.len());

    for feed in feeds {
        let source = feed.source();
        if seen.contains(&source) {
            return Err(Error::Config(format!("more than one feed for {source}")));
        }
        seen.push(source);

        let provider: Arc<dyn RateProvider> = match feed {
            FeedConfig::Http { url, .. } => Arc::new(
                HttpFeedProvider::new(source, url.clone(), fetch_timeout)
                    .map_err(|e| Error::Config(format!("http client for {source}: {e}")))?,
            ),
            FeedConfig::Fixture { path, .. } => {
                Arc::new(FixtureProvider::from_path(source, path.clone()))
            }
        };
        out.push(provider);
    }

    Ok(out)
}
