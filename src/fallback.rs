//! # Fallback lookup
//! Answers "what was the rate on date D" with the most recent observation
//! whose effective date is on or before D. Weekends and holidays carry the
//! last published rate forward; `exact` tells the caller which case it got.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::model::{Currency, Source};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLookup {
    pub source: Source,
    pub currency: Currency,
    pub requested_date: NaiveDate,
    pub rate: f64,
    pub effective_date: NaiveDate,
    pub captured_at: DateTime<Utc>,
    /// True iff `effective_date == requested_date`.
    pub exact: bool,
}

/// Returns `Error::NotFound` when nothing was recorded on or before `requested`.
pub fn lookup(
    ledger: &Ledger,
    source: Source,
    currency: Currency,
    requested: NaiveDate,
) -> Result<RateLookup> {
    let row = ledger
        .find_on_or_before(source, currency, requested)?
        .ok_or(Error::NotFound {
            feed: source,
            currency,
            date: requested,
        })?;

    let obs = row.observation;
    Ok(RateLookup {
        source,
        currency,
        requested_date: requested,
        rate: obs.rate,
        effective_date: obs.effective_date,
        captured_at: obs.captured_at,
        exact: obs.effective_date == requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seed(ledger: &Ledger, d: NaiveDate, rate: f64) {
        ledger
            .upsert(&Observation {
                source: Source::Bcv,
                currency: Currency::Usd,
                rate,
                effective_date: d,
                captured_at: Utc.with_ymd_and_hms(2024, 5, 2, 20, 0, 0).unwrap(),
            })
            .unwrap();
    }

    #[test]
    fn weekend_falls_back_to_friday() {
        let ledger = Ledger::open_in_memory().unwrap();
        seed(&ledger, date(2024, 5, 2), 36.40);
        seed(&ledger, date(2024, 5, 3), 36.50);

        let sunday = lookup(&ledger, Source::Bcv, Currency::Usd, date(2024, 5, 5)).unwrap();
        assert_eq!(sunday.effective_date, date(2024, 5, 3));
        assert_eq!(sunday.rate, 36.50);
        assert!(!sunday.exact);

        let friday = lookup(&ledger, Source::Bcv, Currency::Usd, date(2024, 5, 3)).unwrap();
        assert!(friday.exact);
        assert_eq!(friday.requested_date, date(2024, 5, 3));
    }

    #[test]
    fn later_rows_are_ignored() {
        let ledger = Ledger::open_in_memory().unwrap();
        seed(&ledger, date(2024, 5, 3), 36.50);
        seed(&ledger, date(2024, 5, 6), 36.70);

        let sat = lookup(&ledger, Source::Bcv, Currency::Usd, date(2024, 5, 4)).unwrap();
        assert_eq!(sat.effective_date, date(2024, 5, 3));
    }

    #[test]
    fn empty_store_is_not_found() {
        let ledger = Ledger::open_in_memory().unwrap();
        let err = lookup(&ledger, Source::Bcv, Currency::Usd, date(2024, 5, 5)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn only_future_rows_is_not_found() {
        let ledger = Ledger::open_in_memory().unwrap();
        seed(&ledger, date(2024, 5, 6), 36.70);
        let err = lookup(&ledger, Source::Bcv, Currency::Usd, date(2024, 5, 5)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn other_pairs_do_not_leak() {
        let ledger = Ledger::open_in_memory().unwrap();
        seed(&ledger, date(2024, 5, 3), 36.50);
        let err = lookup(&ledger, Source::Bcv, Currency::Eur, date(2024, 5, 3)).unwrap_err();
        assert!(err.is_not_found());
        let err = lookup(&ledger, Source::Binance, Currency::Usd, date(2024, 5, 3)).unwrap_err();
        assert!(err.is_not_found());
    }
}
