//! Error taxonomy shared by the ledger, the query path and the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

use crate::model::{Currency, Source};

/// Failure reported by a rate provider. Absorbed by the refresher: logged,
/// counted, never written to the ledger.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetch timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("no rate for {feed}/{currency} on or before {date}")]
    NotFound {
        feed: Source,
        currency: Currency,
        date: NaiveDate,
    },

    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::InvalidParam(_) | Error::InvalidObservation(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            Error::Storage(_) | Error::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let message = match &self {
            Error::Storage(e) => {
                tracing::error!(error = %e, "storage error surfaced to http");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
