use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

// ─── Sampler ─────────────────────────────────────────────────────

/// A single source could not be read. Other sources in the same call
/// are unaffected.
#[derive(Debug, Clone, Error)]
pub enum SampleError {
    #[error("source '{0}' is unavailable")]
    SourceUnavailable(String),

    #[error("host probe failed: {0}")]
    Probe(String),
}

// ─── RingHistory ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("out-of-order sample for '{source_id}': {got} is not after {last}")]
    OutOfOrderSample {
        source_id: String,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

// ─── MetricsSink ─────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected point: {0}")]
    Rejected(String),

    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid point: {0}")]
    InvalidPoint(String),
}

impl From<redis::RedisError> for WriteError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
            Self::Unavailable(e.to_string())
        } else {
            Self::Rejected(e.to_string())
        }
    }
}

// ─── Loop ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum CycleError {
    /// Not a single source produced a sample this cycle.
    #[error("no source could be sampled ({failed} failed)")]
    FatalSamplingFailure { failed: usize },
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
