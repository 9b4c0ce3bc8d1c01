//! # Ledger
//! Durable store of rate observations keyed by (source, currency, effective date).
//!
//! Backed by SQLite. A repeated observation for an existing key overwrites the
//! rate and capture time in place; the insert-or-update decision runs inside a
//! single IMMEDIATE transaction so concurrent writers cannot create duplicates.
//! The connection sits behind a mutex, so readers never see a half-written row.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql, TransactionBehavior};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Currency, Observation, Source, StoredObservation};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        currency TEXT NOT NULL,
        effective_date TEXT NOT NULL,
        rate REAL NOT NULL,
        captured_at TEXT NOT NULL,
        revision INTEGER NOT NULL,
        UNIQUE (source, currency, effective_date)
    );
    CREATE INDEX IF NOT EXISTS idx_observations_effective_date
        ON observations (effective_date);
    CREATE INDEX IF NOT EXISTS idx_observations_revision
        ON observations (revision);
";

const COLUMNS: &str = "id, source, currency, effective_date, rate, captured_at, revision";

/// What an upsert did to the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug)]
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.as_ref().display(), journal_mode = %mode, "ledger opened");
        Self::init(conn)
    }

    /// Throwaway ledger, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Flush and close the underlying connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().unwrap_or_else(|p| p.into_inner());
        conn.close().map_err(|(_, e)| e)?;
        info!("ledger closed");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert the observation, or overwrite rate and capture time of the
    /// existing row for the same key.
    pub fn upsert(&self, obs: &Observation) -> Result<UpsertOutcome> {
        obs.validate()?;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM observations
                 WHERE source = ?1 AND currency = ?2 AND effective_date = ?3",
                params![obs.source, obs.currency, obs.effective_date],
                |row| row.get(0),
            )
            .optional()?;

        let revision: i64 = tx.query_row(
            "SELECT COALESCE(MAX(revision), 0) + 1 FROM observations",
            [],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO observations
                 (source, currency, effective_date, rate, captured_at, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (source, currency, effective_date) DO UPDATE SET
                 rate = excluded.rate,
                 captured_at = excluded.captured_at,
                 revision = excluded.revision",
            params![
                obs.source,
                obs.currency,
                obs.effective_date,
                obs.rate,
                obs.captured_at,
                revision
            ],
        )?;
        tx.commit()?;

        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        debug!(
            source = %obs.source,
            currency = %obs.currency,
            effective_date = %obs.effective_date,
            rate = obs.rate,
            ?outcome,
            "ledger upsert"
        );
        Ok(outcome)
    }

    /// Row with the greatest effective date not after `date`.
    pub fn find_on_or_before(
        &self,
        source: Source,
        currency: Currency,
        date: NaiveDate,
    ) -> Result<Option<StoredObservation>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {COLUMNS} FROM observations
             WHERE source = ?1 AND currency = ?2 AND effective_date <= ?3
             ORDER BY effective_date DESC
             LIMIT 1"
        );
        let row = conn
            .query_row(&sql, params![source, currency, date], map_row)
            .optional()?;
        Ok(row)
    }

    /// Most recently written rows, newest first. `None` filters match anything.
    pub fn recent(
        &self,
        source: Option<Source>,
        currency: Option<Currency>,
        limit: usize,
    ) -> Result<Vec<StoredObservation>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {COLUMNS} FROM observations
             WHERE (?1 IS NULL OR source = ?1) AND (?2 IS NULL OR currency = ?2)
             ORDER BY revision DESC
             LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![source, currency, limit], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recently written row per (source, currency).
    pub fn latest(&self) -> Result<Vec<StoredObservation>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {COLUMNS} FROM observations o
             WHERE revision = (
                 SELECT MAX(i.revision) FROM observations i
                 WHERE i.source = o.source AND i.currency = o.currency
             )
             ORDER BY source, currency"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows whose effective date is strictly before `cutoff`.
    pub fn delete_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let conn = self.lock();
        let n = conn.execute(
            "DELETE FROM observations WHERE effective_date < ?1",
            params![cutoff],
        )?;
        Ok(n)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM observations", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or_default())
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredObservation> {
    Ok(StoredObservation {
        id: row.get(0)?,
        observation: Observation {
            source: row.get(1)?,
            currency: row.get(2)?,
            effective_date: row.get(3)?,
            rate: row.get(4)?,
            captured_at: row.get(5)?,
        },
        revision: row.get(6)?,
    })
}

impl ToSql for Source {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Source {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Currency {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Currency {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ts(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 3, h, 0, 0).unwrap()
    }

    fn obs(source: Source, currency: Currency, d: NaiveDate, rate: f64, h: u32) -> Observation {
        Observation {
            source,
            currency,
            rate,
            effective_date: d,
            captured_at: ts(h),
        }
    }

    #[test]
    fn second_upsert_for_same_key_overwrites() {
        let ledger = Ledger::open_in_memory().unwrap();
        let d = date(2024, 5, 3);

        let first = ledger.upsert(&obs(Source::Bcv, Currency::Usd, d, 36.50, 10)).unwrap();
        let second = ledger.upsert(&obs(Source::Bcv, Currency::Usd, d, 36.62, 12)).unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(ledger.count().unwrap(), 1);

        let row = ledger
            .find_on_or_before(Source::Bcv, Currency::Usd, d)
            .unwrap()
            .unwrap();
        assert_eq!(row.observation.rate, 36.62);
        assert_eq!(row.observation.captured_at, ts(12));
    }

    #[test]
    fn identical_upserts_keep_one_row() {
        let ledger = Ledger::open_in_memory().unwrap();
        let o = obs(Source::Binance, Currency::Usdt, date(2024, 5, 4), 40.1, 9);
        for _ in 0..3 {
            ledger.upsert(&o).unwrap();
        }
        assert_eq!(ledger.count().unwrap(), 1);
    }

    #[test]
    fn concurrent_writers_to_one_key_leave_one_row() {
        let ledger = std::sync::Arc::new(Ledger::open_in_memory().unwrap());
        let d = date(2024, 5, 3);
        let rates: Vec<f64> = (0..8).map(|i| 36.0 + f64::from(i) / 100.0).collect();

        let handles: Vec<_> = rates
            .iter()
            .map(|&rate| {
                let ledger = std::sync::Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        ledger.upsert(&obs(Source::Bcv, Currency::Usd, d, rate, 10)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.count().unwrap(), 1);
        let row = ledger.find_on_or_before(Source::Bcv, Currency::Usd, d).unwrap().unwrap();
        assert!(rates.contains(&row.observation.rate));
        assert_eq!(row.revision, 80);
    }

    #[test]
    fn separate_connections_on_one_file_do_not_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasas.db");
        // create the schema before the writers race
        Ledger::open(&path).unwrap().close().unwrap();
        let d = date(2024, 5, 3);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let ledger = Ledger::open(&path).unwrap();
                    for _ in 0..5 {
                        ledger
                            .upsert(&obs(Source::Binance, Currency::Usdt, d, 40.0 + f64::from(i), 10))
                            .unwrap();
                    }
                    ledger.close().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.count().unwrap(), 1);
        let row = &ledger.recent(None, None, 1).unwrap()[0];
        assert!((40.0..44.0).contains(&row.observation.rate));
        assert_eq!(row.revision, 20);
    }

    #[test]
    fn distinct_keys_are_separate_rows() {
        let ledger = Ledger::open_in_memory().unwrap();
        let d = date(2024, 5, 3);
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, d, 36.5, 10)).unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Eur, d, 39.2, 10)).unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 6), 36.7, 16)).unwrap();
        assert_eq!(ledger.count().unwrap(), 3);
    }

    #[test]
    fn invalid_rate_is_rejected_without_write() {
        let ledger = Ledger::open_in_memory().unwrap();
        let err = ledger
            .upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 3), -1.0, 10))
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidObservation(_)));
        assert_eq!(ledger.count().unwrap(), 0);
    }

    #[test]
    fn recent_is_newest_write_first_and_counts_updates() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 2), 36.4, 10)).unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 3), 36.5, 10)).unwrap();
        ledger.upsert(&obs(Source::Binance, Currency::Usdt, date(2024, 5, 3), 40.0, 11)).unwrap();
        // touching the oldest key moves it to the front
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 2), 36.45, 12)).unwrap();

        let all = ledger.recent(None, None, 10).unwrap();
        let dates: Vec<_> = all.iter().map(|r| r.observation.effective_date).collect();
        assert_eq!(dates, vec![date(2024, 5, 2), date(2024, 5, 3), date(2024, 5, 3)]);
        assert_eq!(all[0].observation.rate, 36.45);

        let bcv = ledger.recent(Some(Source::Bcv), Some(Currency::Usd), 1).unwrap();
        assert_eq!(bcv.len(), 1);
        assert_eq!(bcv[0].observation.effective_date, date(2024, 5, 2));

        let usdt = ledger.recent(None, Some(Currency::Usdt), 10).unwrap();
        assert_eq!(usdt.len(), 1);
    }

    #[test]
    fn latest_returns_one_row_per_pair() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 3), 36.5, 10)).unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 6), 36.7, 20)).unwrap();
        ledger.upsert(&obs(Source::Bcv, Currency::Eur, date(2024, 5, 6), 39.1, 20)).unwrap();

        let latest = ledger.latest().unwrap();
        assert_eq!(latest.len(), 2);
        let usd = latest
            .iter()
            .find(|r| r.observation.currency == Currency::Usd)
            .unwrap();
        assert_eq!(usd.observation.rate, 36.7);
    }

    #[test]
    fn file_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasas.db");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.upsert(&obs(Source::Bcv, Currency::Usd, date(2024, 5, 3), 36.5, 10)).unwrap();
            ledger.close().unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.count().unwrap(), 1);
    }
}
