use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::alerts::AlertThresholds;
use crate::error::ConfigError;
use crate::metrics::{DEFAULT_HISTORY_CAPACITY, SYSTEM_SOURCE};

/// Env var naming the TOML config file.
pub const CONFIG_ENV: &str = "HOSTWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "hostwatch.toml";

// ─── Refresh interval ────────────────────────────────────────────

/// Cycle period in seconds; one of a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RefreshInterval(u64);

impl RefreshInterval {
    pub const ALLOWED_SECS: [u64; 5] = [1, 2, 5, 10, 30];

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }

    pub fn secs(&self) -> u64 {
        self.0
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        Self(2)
    }
}

impl TryFrom<u64> for RefreshInterval {
    type Error = String;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        if Self::ALLOWED_SECS.contains(&secs) {
            Ok(Self(secs))
        } else {
            Err(format!(
                "interval must be one of {:?} seconds, got {secs}",
                Self::ALLOWED_SECS
            ))
        }
    }
}

impl From<RefreshInterval> for u64 {
    fn from(i: RefreshInterval) -> u64 {
        i.0
    }
}

// ─── Runtime-tunable settings ────────────────────────────────────

/// The loop's reconfigurable knobs other than thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub interval_secs: RefreshInterval,
    pub interfaces: BTreeSet<String>,
}

impl MonitorSettings {
    /// Every source sampled per cycle: `system` plus each interface.
    pub fn sources(&self) -> BTreeSet<String> {
        let mut ids = self.interfaces.clone();
        ids.insert(SYSTEM_SOURCE.to_owned());
        ids
    }

    pub fn validate(&self) -> Result<(), String> {
        for name in &self.interfaces {
            if name.trim().is_empty() {
                return Err("interface names must not be empty".into());
            }
            if name == SYSTEM_SOURCE {
                return Err(format!("'{SYSTEM_SOURCE}' is reserved and cannot be an interface"));
            }
        }
        Ok(())
    }
}

// ─── Atomic snapshot ─────────────────────────────────────────────

/// Single-writer, multi-reader holder of an immutable value.
/// Readers get a whole `Arc<T>`; a store swaps the pointer, so no reader
/// ever sees a half-updated value.
pub struct Snapshot<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    pub fn load(&self) -> Arc<T> {
        self.current.read().clone()
    }

    pub fn store(&self, value: T) {
        *self.current.write() = Arc::new(value);
    }
}

// ─── File config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Redis,
    Memory,
    None,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub redis_url: String,
    /// Approximate cap on entries kept per Redis stream
    pub stream_max_len: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Redis,
            redis_url: "redis://127.0.0.1:6379/".into(),
            stream_max_len: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interval_secs: RefreshInterval,
    pub interfaces: BTreeSet<String>,
    pub history_capacity: usize,
    /// Averaging window of the blocking CPU read
    pub cpu_window_ms: u64,
    /// Sleep after a cycle in which no source could be sampled
    pub backoff_secs: u64,
    pub sink_timeout_secs: u64,
    /// `host` tag on every persisted point; OS hostname when unset
    pub host: Option<String>,
    pub thresholds: AlertThresholds,
    pub sink: SinkConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: RefreshInterval::default(),
            interfaces: ["eth0".to_owned()].into(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            cpu_window_ms: 1000,
            backoff_secs: 5,
            sink_timeout_secs: 10,
            host: None,
            thresholds: AlertThresholds::default(),
            sink: SinkConfig::default(),
            server: ServerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$HOSTWATCH_CONFIG`, else `./hostwatch.toml`, else defaults.
    pub fn load() -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        if path.exists() {
            Ok((Self::from_file(&path)?, Some(path)))
        } else {
            let config = Self::default();
            config.validate()?;
            Ok((config, None))
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be > 0".into()));
        }
        if self.sink_timeout_secs == 0 {
            return Err(ConfigError::Invalid("sink_timeout_secs must be > 0".into()));
        }
        self.thresholds.validate().map_err(ConfigError::Invalid)?;
        self.settings().validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval_secs: self.interval_secs,
            interfaces: self.interfaces.clone(),
        }
    }

    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".into())
        })
    }

    pub fn cpu_window(&self) -> Duration {
        Duration::from_millis(self.cpu_window_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }
}
