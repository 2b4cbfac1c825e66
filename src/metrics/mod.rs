pub mod history;
pub mod percentiles;
pub mod rate;
pub mod stream;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use history::{HistoryStore, RingHistory};
pub use rate::{RateStatus, RateView};

/// Source id of the host-wide CPU / memory series.
pub const SYSTEM_SOURCE: &str = "system";

/// Default number of samples kept per source.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

// ─── Field names ─────────────────────────────────────────────────

pub mod fields {
    pub const BYTES_SENT: &str = "bytes_sent";
    pub const BYTES_RECV: &str = "bytes_recv";
    pub const ERRORS_IN: &str = "errors_in";
    pub const ERRORS_OUT: &str = "errors_out";
    pub const DROPPED_IN: &str = "dropped_in";
    pub const DROPPED_OUT: &str = "dropped_out";
    pub const PACKETS_SENT: &str = "packets_sent";
    pub const PACKETS_RECV: &str = "packets_recv";
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";

    /// Monotonically non-decreasing interface counters; rates are derived
    /// from these only.
    pub const CUMULATIVE: &[&str] = &[
        BYTES_SENT,
        BYTES_RECV,
        ERRORS_IN,
        ERRORS_OUT,
        DROPPED_IN,
        DROPPED_OUT,
        PACKETS_SENT,
        PACKETS_RECV,
    ];
}

// ─── Sample ──────────────────────────────────────────────────────

/// One observation of one source at one instant.
/// The sampler creates these; the loop pushes them into a `RingHistory`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    /// Named non-negative counters / gauges, e.g. `bytes_sent` or `cpu_percent`
    pub fields: BTreeMap<String, f64>,
}

impl Sample {
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            source_id: source_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_owned(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }
}
