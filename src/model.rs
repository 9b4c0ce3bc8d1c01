//! # Model
//! Rate feeds, instruments and the observation record persisted by the ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Origin of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Source {
    /// Official daily publication (central bank).
    Bcv,
    /// Continuously quoted peer-to-peer market.
    Binance,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Bcv, Source::Binance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Bcv => "BCV",
            Source::Binance => "BINANCE",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bcv" => Ok(Source::Bcv),
            "binance" => Ok(Source::Binance),
            other => Err(Error::InvalidParam(format!("unknown source '{other}'"))),
        }
    }
}

impl From<Source> for &'static str {
    fn from(s: Source) -> Self {
        s.as_str()
    }
}

impl TryFrom<String> for Source {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Quoted instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Currency {
    Usd,
    Eur,
    Usdt,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usd" => Ok(Currency::Usd),
            "eur" => Ok(Currency::Eur),
            "usdt" => Ok(Currency::Usdt),
            other => Err(Error::InvalidParam(format!("unknown currency '{other}'"))),
        }
    }
}

impl From<Currency> for &'static str {
    fn from(c: Currency) -> Self {
        c.as_str()
    }
}

impl TryFrom<String> for Currency {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// A rate as it is written to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub source: Source,
    pub currency: Currency,
    pub rate: f64,
    /// Calendar date the rate is authoritative for.
    pub effective_date: NaiveDate,
    /// When the rate was fetched.
    pub captured_at: DateTime<Utc>,
}

impl Observation {
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::InvalidObservation(format!(
                "{}/{} rate must be positive, got {}",
                self.source, self.currency, self.rate
            )));
        }
        Ok(())
    }
}

/// An observation read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObservation {
    pub id: i64,
    /// Monotonic write counter; bumped on insert and on every overwrite.
    pub revision: i64,
    #[serde(flatten)]
    pub observation: Observation,
}
