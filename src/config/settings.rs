// src/config/settings.rs
use anyhow::{anyhow, Context};
use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::effective_date::{EffectiveDateResolver, PublicationRule};
use crate::error::Error;
use crate::ingest::config::FeedConfig;
use crate::model::Source;
use crate::retention::RetentionWindow;

pub const ENV_CONFIG_PATH: &str = "RATES_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/rates.toml";

const ENV_DB_PATH: &str = "RATES_DB_PATH";
const ENV_RETENTION: &str = "RATES_RETENTION";
const ENV_MISS_POLICY: &str = "RATES_MISS_POLICY";
const ENV_STALE_AFTER: &str = "RATES_STALE_AFTER_SECS";

/// What `/api/consultar` does when the ledger has nothing on or before the date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    /// Refresh the source once (bounded by `refresh_timeout_secs`), then retry.
    #[default]
    RefreshThenRetry,
    /// Kick off a refresh in the background and answer 404 right away.
    Background,
    /// Answer 404.
    Off,
}

impl FromStr for MissPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "refresh_then_retry" | "sync" => Ok(MissPolicy::RefreshThenRetry),
            "background" => Ok(MissPolicy::Background),
            "off" | "none" => Ok(MissPolicy::Off),
            other => Err(Error::Config(format!("unknown miss policy '{other}'"))),
        }
    }
}

impl fmt::Display for MissPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissPolicy::RefreshThenRetry => "refresh_then_retry",
            MissPolicy::Background => "background",
            MissPolicy::Off => "off",
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub retention: RetentionWindow,
    /// Publisher's UTC offset in hours; effective-date rules run on this clock.
    pub utc_offset_hours: i32,
    /// `/api/tasas` refreshes when the newest capture is older than this.
    pub stale_after_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Upper bound for a refresh awaited inside a request.
    pub refresh_timeout_secs: u64,
    /// Background refresh period; 0 disables the scheduler.
    pub refresh_interval_secs: u64,
    pub miss_policy: MissPolicy,
    pub history_default_limit: usize,
    pub feeds: Vec<FeedConfig>,
    pub rules: HashMap<Source, PublicationRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tasas.db"),
            retention: RetentionWindow::default(),
            utc_offset_hours: -4,
            stale_after_secs: 600,
            fetch_timeout_secs: 10,
            refresh_timeout_secs: 15,
            refresh_interval_secs: 600,
            miss_policy: MissPolicy::default(),
            history_default_limit: 50,
            feeds: Vec::new(),
            rules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Resolve settings:
    /// 1) $RATES_CONFIG_PATH (must exist)
    /// 2) config/rates.toml
    /// 3) built-in defaults
    ///
    /// then apply env overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut s = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            Self::default()
        };
        s.apply_env()?;
        Ok(s)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(s)?;
        settings.offset()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = std::env::var(ENV_DB_PATH) {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_RETENTION) {
            self.retention = v.parse().with_context(|| format!("{ENV_RETENTION}={v}"))?;
        }
        if let Ok(v) = std::env::var(ENV_MISS_POLICY) {
            self.miss_policy = v.parse().with_context(|| format!("{ENV_MISS_POLICY}={v}"))?;
        }
        if let Ok(v) = std::env::var(ENV_STALE_AFTER) {
            self.stale_after_secs = v.trim().parse().with_context(|| format!("{ENV_STALE_AFTER}={v}"))?;
        }
        Ok(())
    }

    pub fn offset(&self) -> Result<FixedOffset, Error> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| Error::Config(format!("invalid utc_offset_hours {}", self.utc_offset_hours)))
    }

    pub fn resolver(&self) -> EffectiveDateResolver {
        EffectiveDateResolver::with_rules(self.rules.clone())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
