use std::sync::Arc;

pub mod alerts;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod monitor;
pub mod sampler;
pub mod server;
pub mod sink;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Histories, thresholds, settings and alert fan-out owned by the loop.
    pub monitor: Arc<monitor::MonitorShared>,
    /// Host probe for on-demand reads outside the loop (host details, addresses).
    pub probe: Arc<dyn sampler::HostProbe>,
}
