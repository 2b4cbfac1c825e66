use axum::{extract::State, Json};
use std::sync::Arc;

use crate::monitor::StatusReport;
use crate::AppState;

// ─── GET /api/status ─────────────────────────────────────────────
/// Loop state, cumulative counters and cycle-duration percentiles.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.monitor.status())
}
