//! # Effective dates
//! Maps a capture instant to the calendar date the rate is authoritative for.
//!
//! Rules are evaluated on the publisher's local wall clock. The resolver never
//! reads the system clock; callers pass `now` in so rollover boundaries stay
//! testable.

use std::collections::HashMap;

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Deserializer};

use crate::model::Source;

/// Publication semantics for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PublicationRule {
    /// Quoted all the time; the effective date is the capture date.
    Continuous,
    /// Published once per business day with a cut-off after which the rate
    /// applies to the next publication date.
    Cutoff {
        /// Last business day of the week.
        #[serde(default = "default_weekly_day")]
        weekly_day: Weekday,
        #[serde(deserialize_with = "de_hhmm", default = "default_weekly_cutoff")]
        weekly_cutoff: NaiveTime,
        #[serde(deserialize_with = "de_hhmm", default = "default_daily_cutoff")]
        daily_cutoff: NaiveTime,
    },
}

fn default_weekly_day() -> Weekday {
    Weekday::Fri
}

fn default_weekly_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN)
}

fn default_daily_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Accepts "HH:MM" or "HH:MM:SS".
fn de_hhmm<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
    let s = String::deserialize(d)?;
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S"))
        .map_err(serde::de::Error::custom)
}

impl PublicationRule {
    /// Official daily rate: Friday 15:30 weekly cut-off, 16:00 daily cut-off.
    pub fn official_daily() -> Self {
        PublicationRule::Cutoff {
            weekly_day: default_weekly_day(),
            weekly_cutoff: default_weekly_cutoff(),
            daily_cutoff: default_daily_cutoff(),
        }
    }

    pub fn apply(&self, now: NaiveDateTime) -> NaiveDate {
        let today = now.date();
        match *self {
            PublicationRule::Continuous => today,
            PublicationRule::Cutoff {
                weekly_day,
                weekly_cutoff,
                daily_cutoff,
            } => {
                let time = now.time();
                let weekday = today.weekday();
                // weekly cut-off is checked before the daily one
                if (weekday == weekly_day && time >= weekly_cutoff) || is_weekend(weekday) {
                    next_monday(today)
                } else if time >= daily_cutoff {
                    today + Days::new(1)
                } else {
                    today
                }
            }
        }
    }
}

fn is_weekend(d: Weekday) -> bool {
    matches!(d, Weekday::Sat | Weekday::Sun)
}

/// First Monday strictly after `date`.
fn next_monday(date: NaiveDate) -> NaiveDate {
    let ahead = 7 - u64::from(date.weekday().num_days_from_monday());
    date + Days::new(ahead)
}

/// Per-source rule table.
#[derive(Debug, Clone)]
pub struct EffectiveDateResolver {
    rules: HashMap<Source, PublicationRule>,
}

impl Default for EffectiveDateResolver {
    fn default() -> Self {
        let mut rules = HashMap::new();
        rules.insert(Source::Bcv, PublicationRule::official_daily());
        rules.insert(Source::Binance, PublicationRule::Continuous);
        Self { rules }
    }
}

impl EffectiveDateResolver {
    /// Defaults overlaid with `overrides`.
    pub fn with_rules(overrides: HashMap<Source, PublicationRule>) -> Self {
        let mut this = Self::default();
        this.rules.extend(overrides);
        this
    }

    pub fn rule_for(&self, source: Source) -> PublicationRule {
        self.rules
            .get(&source)
            .copied()
            .unwrap_or(PublicationRule::Continuous)
    }

    /// Effective date for an observation of `source` captured at local time `now`.
    pub fn resolve(&self, source: Source, now: NaiveDateTime) -> NaiveDate {
        self.rule_for(source).apply(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn continuous_source_ignores_time_of_day() {
        let r = EffectiveDateResolver::default();
        for (hh, mm) in [(0, 0), (15, 30), (16, 0), (23, 59)] {
            // 2024-05-03 Fri, 2024-05-04 Sat
            assert_eq!(r.resolve(Source::Binance, at(2024, 5, 3, hh, mm)), date(2024, 5, 3));
            assert_eq!(r.resolve(Source::Binance, at(2024, 5, 4, hh, mm)), date(2024, 5, 4));
        }
    }

    #[test]
    fn daily_cutoff_is_inclusive() {
        let r = EffectiveDateResolver::default();
        // Wednesday 2024-05-01
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 1, 15, 59)), date(2024, 5, 1));
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 1, 16, 0)), date(2024, 5, 2));
    }

    #[test]
    fn weekly_cutoff_rolls_to_monday_and_wins_over_daily() {
        let r = EffectiveDateResolver::default();
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 3, 15, 29)), date(2024, 5, 3));
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 3, 15, 30)), date(2024, 5, 6));
        // past the daily cut-off as well: still Monday, not Saturday
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 3, 16, 0)), date(2024, 5, 6));
    }

    #[test]
    fn weekend_rolls_to_the_same_monday() {
        let r = EffectiveDateResolver::default();
        for (hh, mm) in [(0, 0), (12, 0), (23, 59)] {
            assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 4, hh, mm)), date(2024, 5, 6));
            assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 5, hh, mm)), date(2024, 5, 6));
        }
    }

    #[test]
    fn thursday_after_cutoff_is_friday() {
        let r = EffectiveDateResolver::default();
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 2, 16, 1)), date(2024, 5, 3));
    }

    #[test]
    fn month_boundary() {
        let r = EffectiveDateResolver::default();
        // Fri 2024-05-31 after the weekly cut-off
        assert_eq!(r.resolve(Source::Bcv, at(2024, 5, 31, 17, 0)), date(2024, 6, 3));
    }

    #[test]
    fn rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrap {
            rule: PublicationRule,
        }
        let w: Wrap = toml::from_str(
            r#"
            [rule]
            kind = "cutoff"
            weekly_day = "Thu"
            weekly_cutoff = "14:00"
            daily_cutoff = "15:00:00"
            "#,
        )
        .unwrap();
        assert_eq!(
            w.rule,
            PublicationRule::Cutoff {
                weekly_day: Weekday::Thu,
                weekly_cutoff: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                daily_cutoff: NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
            }
        );

        let c: Wrap = toml::from_str("[rule]\nkind = \"continuous\"\n").unwrap();
        assert_eq!(c.rule, PublicationRule::Continuous);
    }
}
