use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::{MissPolicy, Settings};
use crate::error::{Error, Result};
use crate::fallback::{self, RateLookup};
use crate::ingest::refresh::Refresher;
use crate::ledger::Ledger;
use crate::model::{Currency, Source, StoredObservation};

const MAX_HISTORY_LIMIT: usize = 1000;

/// Knobs the HTTP layer applies around the ledger.
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    pub stale_after: Duration,
    pub refresh_timeout: Duration,
    pub miss_policy: MissPolicy,
    pub history_default_limit: usize,
}

impl QueryPolicy {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            stale_after: s.stale_after(),
            refresh_timeout: s.refresh_timeout(),
            miss_policy: s.miss_policy,
            history_default_limit: s.history_default_limit.clamp(1, MAX_HISTORY_LIMIT),
        }
    }
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub refresher: Arc<Refresher>,
    pub policy: QueryPolicy,
}

impl AppState {
    pub fn new(refresher: Arc<Refresher>, policy: QueryPolicy) -> Self {
        Self {
            ledger: Arc::clone(refresher.ledger()),
            refresher,
            policy,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(|| async { "OK" }))
        .route("/api/tasas", get(get_tasas))
        .route("/api/consultar", get(get_consultar))
        .route("/api/historial", get(get_historial))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn home() -> Json<Value> {
    Json(json!({ "estado": "en linea", "servicio": env!("CARGO_PKG_NAME") }))
}

/* ----------------------------
/api/tasas
---------------------------- */

/// True when some configured source has no row, or its newest capture is
/// older than `stale_after`.
fn snapshot_is_stale(
    latest: &[StoredObservation],
    sources: &[Source],
    now: DateTime<Utc>,
    stale_after: Duration,
) -> bool {
    sources.iter().any(|source| {
        let newest = latest
            .iter()
            .filter(|r| r.observation.source == *source)
            .map(|r| r.observation.captured_at)
            .max();
        match newest {
            None => true,
            // a capture stamped in the future counts as fresh
            Some(t) => (now - t).to_std().is_ok_and(|age| age > stale_after),
        }
    })
}

async fn get_tasas(State(state): State<AppState>) -> Result<Json<BTreeMap<String, f64>>> {
    let now = Utc::now();
    let mut latest = state.ledger.latest()?;

    if snapshot_is_stale(&latest, &state.refresher.sources(), now, state.policy.stale_after) {
        info!("rate snapshot stale; refreshing");
        match tokio::time::timeout(state.policy.refresh_timeout, state.refresher.refresh_all(now)).await {
            Ok(results) => {
                for (_, r) in results {
                    r?;
                }
            }
            Err(_) => warn!("refresh timed out; serving stored rates"),
        }
        latest = state.ledger.latest()?;
    }

    let out = latest
        .into_iter()
        .map(|r| {
            let o = r.observation;
            (
                format!("{}_{}", o.source, o.currency).to_ascii_lowercase(),
                o.rate,
            )
        })
        .collect();
    Ok(Json(out))
}

/* ----------------------------
/api/consultar
---------------------------- */

#[derive(Debug, Deserialize)]
struct ConsultaParams {
    fecha: Option<String>,
    fuente: Option<String>,
    moneda: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConsultaOut {
    fuente: Source,
    moneda: Currency,
    fecha_solicitada: NaiveDate,
    fecha_efectiva: NaiveDate,
    tasa: f64,
    capturado_en: DateTime<Utc>,
    exacta: bool,
}

impl From<RateLookup> for ConsultaOut {
    fn from(l: RateLookup) -> Self {
        Self {
            fuente: l.source,
            moneda: l.currency,
            fecha_solicitada: l.requested_date,
            fecha_efectiva: l.effective_date,
            tasa: l.rate,
            capturado_en: l.captured_at,
            exacta: l.exact,
        }
    }
}

fn required<'a>(v: &'a Option<String>, name: &str) -> Result<&'a str> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidParam(format!("missing '{name}'")))
}

async fn get_consultar(
    State(state): State<AppState>,
    Query(q): Query<ConsultaParams>,
) -> Result<Json<ConsultaOut>> {
    let now = Utc::now();
    let source: Source = required(&q.fuente, "fuente")?.parse()?;
    let currency: Currency = required(&q.moneda, "moneda")?.parse()?;
    let date = match q.fecha.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| Error::InvalidParam(format!("fecha must be YYYY-MM-DD, got '{s}'")))?,
        None => now.with_timezone(&state.refresher.offset()).date_naive(),
    };

    match fallback::lookup(&state.ledger, source, currency, date) {
        Err(e) if e.is_not_found() => {}
        other => return other.map(|l| Json(l.into())),
    }

    match state.policy.miss_policy {
        MissPolicy::Off => {}
        MissPolicy::Background => {
            let refresher = Arc::clone(&state.refresher);
            tokio::spawn(async move {
                if let Err(e) = refresher.refresh_source(source, now).await {
                    warn!(error = %e, %source, "background refresh failed");
                }
            });
        }
        MissPolicy::RefreshThenRetry => {
            info!(%source, %currency, %date, "lookup miss; refreshing once");
            match tokio::time::timeout(state.policy.refresh_timeout, state.refresher.refresh_source(source, now)).await {
                Ok(outcome) => {
                    outcome?;
                    return fallback::lookup(&state.ledger, source, currency, date).map(|l| Json(l.into()));
                }
                Err(_) => warn!(%source, "refresh on miss timed out"),
            }
        }
    }

    Err(Error::NotFound {
        feed: source,
        currency,
        date,
    })
}

/* ----------------------------
/api/historial
---------------------------- */

#[derive(Debug, Deserialize)]
struct HistorialParams {
    limite: Option<i64>,
    fuente: Option<String>,
    moneda: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistorialOut {
    id: i64,
    fuente: Source,
    moneda: Currency,
    tasa: f64,
    fecha_efectiva: NaiveDate,
    capturado_en: DateTime<Utc>,
}

fn optional<T: std::str::FromStr<Err = Error>>(v: &Option<String>) -> Result<Option<T>> {
    match v.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => s.parse().map(Some),
        None => Ok(None),
    }
}

async fn get_historial(
    State(state): State<AppState>,
    Query(q): Query<HistorialParams>,
) -> Result<Json<Vec<HistorialOut>>> {
    let limit = q
        .limite
        .map(|n| n.clamp(1, MAX_HISTORY_LIMIT as i64) as usize)
        .unwrap_or(state.policy.history_default_limit);
    let source = optional::<Source>(&q.fuente)?;
    let currency = optional::<Currency>(&q.moneda)?;

    let rows = state
        .ledger
        .recent(source, currency, limit)?
        .into_iter()
        .map(|r| HistorialOut {
            id: r.id,
            fuente: r.observation.source,
            moneda: r.observation.currency,
            tasa: r.observation.rate,
            fecha_efectiva: r.observation.effective_date,
            capturado_en: r.observation.captured_at,
        })
        .collect();
    Ok(Json(rows))
}
