//! # Retention
//! Purges observations whose effective date fell out of the retention window.

use std::fmt;
use std::str::FromStr;

use chrono::{Days, Months, NaiveDate};
use metrics::counter;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::ledger::Ledger;

/// How far back the ledger keeps observations, relative to today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum RetentionWindow {
    Days(u32),
    Months(u32),
}

impl Default for RetentionWindow {
    fn default() -> Self {
        RetentionWindow::Months(6)
    }
}

impl RetentionWindow {
    /// Oldest effective date still retained on `today`.
    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        let earlier = match *self {
            RetentionWindow::Days(n) => today.checked_sub_days(Days::new(u64::from(n))),
            RetentionWindow::Months(n) => today.checked_sub_months(Months::new(n)),
        };
        earlier.unwrap_or(NaiveDate::MIN)
    }
}

impl FromStr for RetentionWindow {
    type Err = Error;

    /// `"100d"`, `"6m"`; a bare number means days.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c)),
            _ => (s.as_str(), None),
        };
        let n: u32 = digits
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("invalid retention window '{s}'")))?;
        match unit {
            None | Some('d') => Ok(RetentionWindow::Days(n)),
            Some('m') => Ok(RetentionWindow::Months(n)),
            Some(other) => Err(Error::Config(format!(
                "unknown retention unit '{other}' (use d or m)"
            ))),
        }
    }
}

impl TryFrom<String> for RetentionWindow {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionWindow::Days(n) => write!(f, "{n}d"),
            RetentionWindow::Months(n) => write!(f, "{n}m"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionSweeper {
    window: RetentionWindow,
}

impl RetentionSweeper {
    pub fn new(window: RetentionWindow) -> Self {
        Self { window }
    }

    pub fn window(&self) -> RetentionWindow {
        self.window
    }

    pub fn cutoff(&self, today: NaiveDate) -> NaiveDate {
        self.window.cutoff(today)
    }

    /// Delete every observation older than the window. Returns rows removed;
    /// a no-op when nothing qualifies.
    pub fn sweep(&self, ledger: &Ledger, today: NaiveDate) -> Result<usize> {
        let cutoff = self.cutoff(today);
        let removed = ledger.delete_before(cutoff)?;
        if removed > 0 {
            counter!("retention_swept_total").increment(removed as u64);
            info!(removed, %cutoff, window = %self.window, "retention sweep");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Currency, Observation, Source};
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed(ledger: &Ledger, d: NaiveDate) {
        ledger
            .upsert(&Observation {
                source: Source::Bcv,
                currency: Currency::Usd,
                rate: 36.5,
                effective_date: d,
                captured_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn parses_units() {
        assert_eq!("100d".parse::<RetentionWindow>().unwrap(), RetentionWindow::Days(100));
        assert_eq!(" 6M ".parse::<RetentionWindow>().unwrap(), RetentionWindow::Months(6));
        assert_eq!("30".parse::<RetentionWindow>().unwrap(), RetentionWindow::Days(30));
        assert!("6y".parse::<RetentionWindow>().is_err());
        assert!("m".parse::<RetentionWindow>().is_err());
    }

    #[test]
    fn cutoff_arithmetic() {
        let today = date(2024, 5, 10);
        assert_eq!(RetentionWindow::Days(100).cutoff(today), date(2024, 1, 31));
        assert_eq!(RetentionWindow::Months(6).cutoff(today), date(2023, 11, 10));
        // clamps to month end
        assert_eq!(RetentionWindow::Months(1).cutoff(date(2024, 3, 31)), date(2024, 2, 29));
    }

    #[test]
    fn sweep_removes_only_rows_outside_window() {
        let ledger = Ledger::open_in_memory().unwrap();
        let sweeper = RetentionSweeper::new(RetentionWindow::Days(100));
        let today = date(2024, 5, 10);

        seed(&ledger, date(2024, 1, 30)); // outside
        seed(&ledger, date(2024, 1, 31)); // exactly at cutoff
        seed(&ledger, date(2024, 2, 1)); // one day inside
        seed(&ledger, date(2024, 5, 10));

        assert_eq!(sweeper.sweep(&ledger, today).unwrap(), 1);
        assert_eq!(ledger.count().unwrap(), 3);

        // second pass is a no-op
        assert_eq!(sweeper.sweep(&ledger, today).unwrap(), 0);
        assert_eq!(ledger.count().unwrap(), 3);
    }

    #[test]
    fn sweep_on_empty_ledger_is_noop() {
        let ledger = Ledger::open_in_memory().unwrap();
        let removed = RetentionSweeper::default()
            .sweep(&ledger, date(2024, 5, 10))
            .unwrap();
        assert_eq!(removed, 0);
    }
}
