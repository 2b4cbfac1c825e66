use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::history::SourceSummary;
use crate::metrics::rate::{rate, smoothed_rate};
use crate::metrics::{fields, RateView, Sample};
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    /// Trailing window, anchored on the source's latest sample
    #[serde(default = "default_window_secs")]
    pub secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

#[derive(Debug, Serialize)]
pub struct FieldRates {
    pub field: &'static str,
    pub instant: RateView,
    pub smoothed: RateView,
}

#[derive(Debug, Serialize)]
pub struct SourceRates {
    pub source_id: String,
    pub window_secs: u64,
    pub rates: Vec<FieldRates>,
}

// ─── GET /api/sources ────────────────────────────────────────────

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceSummary>> {
    Json(state.monitor.history.sources())
}

// ─── GET /api/sources/:id/latest ─────────────────────────────────

pub async fn latest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Sample>, AppError> {
    state
        .monitor
        .history
        .with_history(&id, |h| h.latest().cloned())
        .ok_or_else(|| AppError::UnknownSource(id.clone()))?
        .map(Json)
        .ok_or(AppError::NoData(id))
}

// ─── GET /api/sources/:id/window?secs=N ──────────────────────────

pub async fn window(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<WindowQuery>,
) -> Result<Json<Vec<Sample>>, AppError> {
    state
        .monitor
        .history
        .window(&id, Duration::from_secs(q.secs))
        .map(Json)
        .ok_or(AppError::UnknownSource(id))
}

// ─── GET /api/sources/:id/rates?secs=N ───────────────────────────

/// Instantaneous and smoothed rate of every cumulative counter the source
/// carries. Sources without counters (`system`) return an empty list.
pub async fn rates(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<WindowQuery>,
) -> Result<Json<SourceRates>, AppError> {
    let window = Duration::from_secs(q.secs);

    let rates = state
        .monitor
        .history
        .with_history(&id, |h| {
            let Some(latest) = h.latest() else {
                return Vec::new();
            };
            fields::CUMULATIVE
                .iter()
                .filter(|f| latest.fields.contains_key(**f))
                .map(|&field| FieldRates {
                    field,
                    instant: rate(h, field),
                    smoothed: smoothed_rate(h, field, window),
                })
                .collect()
        })
        .ok_or_else(|| AppError::UnknownSource(id.clone()))?;

    Ok(Json(SourceRates {
        source_id: id,
        window_secs: q.secs,
        rates,
    }))
}
