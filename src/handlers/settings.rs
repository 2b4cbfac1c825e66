use axum::{extract::State, Json};
use std::sync::Arc;

use crate::alerts::AlertThresholds;
use crate::config::MonitorSettings;
use crate::AppState;

use super::AppError;

// ─── GET/PUT /api/thresholds ─────────────────────────────────────

pub async fn get_thresholds(State(state): State<Arc<AppState>>) -> Json<AlertThresholds> {
    Json(*state.monitor.thresholds())
}

/// Replaces the whole threshold set; omitted keys fall back to defaults.
pub async fn put_thresholds(
    State(state): State<Arc<AppState>>,
    Json(thresholds): Json<AlertThresholds>,
) -> Result<Json<AlertThresholds>, AppError> {
    state
        .monitor
        .set_thresholds(thresholds)
        .map_err(AppError::BadRequest)?;
    Ok(Json(thresholds))
}

// ─── GET/PUT /api/settings ───────────────────────────────────────

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<MonitorSettings> {
    Json(state.monitor.settings().as_ref().clone())
}

pub async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<MonitorSettings>,
) -> Result<Json<MonitorSettings>, AppError> {
    state
        .monitor
        .set_settings(settings.clone())
        .map_err(AppError::BadRequest)?;
    Ok(Json(settings))
}
