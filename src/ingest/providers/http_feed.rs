use std::time::Duration;

use async_trait::async_trait;
use metrics::histogram;

use crate::error::FetchError;
use crate::ingest::types::{RateProvider, RawQuote};
use crate::ingest::FeedPayload;
use crate::model::Source;

/// Polls a JSON endpoint that publishes quotes for one source.
pub struct HttpFeedProvider {
    source: Source,
    url: String,
    client: reqwest::Client,
}

impl HttpFeedProvider {
    pub fn new(source: Source, url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(4)))
            .timeout(timeout)
            .user_agent(concat!("rate-ledger/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            source,
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl RateProvider for HttpFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawQuote>, FetchError> {
        let t0 = std::time::Instant::now();
        let resp = self.client.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let payload: FeedPayload = serde_json::from_str(body.trim())
            .map_err(|e| FetchError::Parse(format!("{e}; body starts with {:.80}", body)))?;
        let quotes = payload.into_quotes();

        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(quotes)
    }

    fn source(&self) -> Source {
        self.source
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
