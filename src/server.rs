use axum::{
    middleware as axum_mw,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the query/subscribe surface over the monitor's shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── History ─────────────────────────────────────────────
        .route("/api/sources", get(handlers::sources::list_sources))
        .route("/api/sources/:id/latest", get(handlers::sources::latest))
        .route("/api/sources/:id/window", get(handlers::sources::window))
        .route("/api/sources/:id/rates", get(handlers::sources::rates))
        // ── Host ────────────────────────────────────────────────
        .route("/api/host", get(handlers::host::host))
        .route("/api/interfaces", get(handlers::host::interfaces))
        // ── Alerts ──────────────────────────────────────────────
        .route("/api/alerts/stream", get(stream::alerts_stream))
        // ── Reconfiguration ─────────────────────────────────────
        .route(
            "/api/thresholds",
            get(handlers::settings::get_thresholds)
                .put(handlers::settings::put_thresholds),
        )
        .route(
            "/api/settings",
            get(handlers::settings::get_settings)
                .put(handlers::settings::put_settings),
        )
        // ── Loop health ─────────────────────────────────────────
        .route("/api/status", get(handlers::status::status))
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
