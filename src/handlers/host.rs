use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::sampler::{HostInfo, InterfaceAddresses};
use crate::AppState;

use super::AppError;

#[derive(Debug, Serialize)]
pub struct InterfaceDetail {
    pub name: String,
    /// False when the configured interface is not on the host right now
    pub present: bool,
    #[serde(flatten)]
    pub addresses: InterfaceAddresses,
}

// ─── GET /api/host ───────────────────────────────────────────────

pub async fn host(State(state): State<Arc<AppState>>) -> Result<Json<HostInfo>, AppError> {
    let probe = state.probe.clone();
    tokio::task::spawn_blocking(move || probe.host_info())
        .await
        .map_err(|e| AppError::ProbeFailed(e.to_string()))?
        .map(Json)
        .map_err(|e| AppError::ProbeFailed(e.to_string()))
}

// ─── GET /api/interfaces ─────────────────────────────────────────

/// Addresses of each configured interface, in name order.
pub async fn interfaces(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<InterfaceDetail>>, AppError> {
    let probe = state.probe.clone();
    let mut all = tokio::task::spawn_blocking(move || probe.addresses())
        .await
        .map_err(|e| AppError::ProbeFailed(e.to_string()))?
        .map_err(|e| AppError::ProbeFailed(e.to_string()))?;

    let details = state
        .monitor
        .settings()
        .interfaces
        .iter()
        .map(|name| match all.remove(name) {
            Some(addresses) => InterfaceDetail {
                name: name.clone(),
                present: true,
                addresses,
            },
            None => InterfaceDetail {
                name: name.clone(),
                present: false,
                addresses: InterfaceAddresses::default(),
            },
        })
        .collect();

    Ok(Json(details))
}
