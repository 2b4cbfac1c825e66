pub mod memory;
pub mod redis_stream;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::{SinkConfig, SinkKind};
use crate::error::WriteError;

pub use self::memory::MemorySink;
pub use self::redis_stream::RedisSink;

/// Tag every persisted point carries.
pub const HOST_TAG: &str = "host";

// ─── Point ───────────────────────────────────────────────────────

/// One tagged, timestamped field set bound for the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub measurement: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            timestamp,
            fields: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Checked by adapters before anything goes over the wire.
    pub fn validate(&self) -> Result<(), WriteError> {
        if self.measurement.is_empty() {
            return Err(WriteError::InvalidPoint("empty measurement".into()));
        }
        if self.fields.is_empty() {
            return Err(WriteError::InvalidPoint(format!(
                "'{}' has no fields",
                self.measurement
            )));
        }
        if let Some((k, v)) = self.fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(WriteError::InvalidPoint(format!("field '{k}' is {v}")));
        }
        if !self.tags.contains_key(HOST_TAG) {
            return Err(WriteError::InvalidPoint(format!(
                "'{}' lacks the '{HOST_TAG}' tag",
                self.measurement
            )));
        }
        Ok(())
    }
}

/// Store acknowledgement; `id` is whatever the backend assigned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    pub id: Option<String>,
}

// ─── Sink contract ───────────────────────────────────────────────

/// Durable time-series writer. One attempt per call; any retry policy
/// belongs to the adapter.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(&self, point: &Point) -> Result<Ack, WriteError>;

    fn name(&self) -> &'static str;
}

/// Acknowledges and discards everything (`kind = "none"`).
pub struct NullSink;

#[async_trait]
impl MetricsSink for NullSink {
    async fn write(&self, point: &Point) -> Result<Ack, WriteError> {
        point.validate()?;
        Ok(Ack::default())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Build the configured adapter. Redis connects lazily on first write.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn MetricsSink>, WriteError> {
    let sink: Arc<dyn MetricsSink> = match config.kind {
        SinkKind::Redis => Arc::new(RedisSink::new(&config.redis_url, config.stream_max_len)?),
        SinkKind::Memory => Arc::new(MemorySink::new(config.stream_max_len)),
        SinkKind::None => Arc::new(NullSink),
    };
    Ok(sink)
}
