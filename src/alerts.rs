use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 1 MiB/s in bytes per second.
const MIB: f64 = 1024.0 * 1024.0;

// ─── Metric names ────────────────────────────────────────────────

/// Alertable metrics. Declaration order is the evaluation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    NetworkIn,
    NetworkOut,
}

impl Metric {
    pub const EVALUATION_ORDER: [Metric; 4] =
        [Metric::Cpu, Metric::Memory, Metric::NetworkIn, Metric::NetworkOut];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::NetworkIn => "network_in",
            Self::NetworkOut => "network_out",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Thresholds ──────────────────────────────────────────────────

/// Process-wide alert limits. Replaced only as a whole, see
/// `config::Snapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub cpu_percent_max: f64,
    pub memory_percent_max: f64,
    pub network_in_bytes_per_sec_max: f64,
    pub network_out_bytes_per_sec_max: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            cpu_percent_max: 90.0,
            memory_percent_max: 85.0,
            network_in_bytes_per_sec_max: 100.0 * MIB,
            network_out_bytes_per_sec_max: 100.0 * MIB,
        }
    }
}

impl AlertThresholds {
    pub fn limit(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Cpu => self.cpu_percent_max,
            Metric::Memory => self.memory_percent_max,
            Metric::NetworkIn => self.network_in_bytes_per_sec_max,
            Metric::NetworkOut => self.network_out_bytes_per_sec_max,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for metric in Metric::EVALUATION_ORDER {
            let v = self.limit(metric);
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{metric} threshold must be a finite value >= 0, got {v}"));
            }
        }
        for (metric, v) in [
            (Metric::Cpu, self.cpu_percent_max),
            (Metric::Memory, self.memory_percent_max),
        ] {
            if v > 100.0 {
                return Err(format!("{metric} threshold is a percentage, got {v}"));
            }
        }
        Ok(())
    }
}

// ─── Inputs / outputs ────────────────────────────────────────────

/// Latest computed metric values for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestMetrics {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<Metric, f64>,
}

impl LatestMetrics {
    pub fn new(source_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }
}

/// One threshold breach. Not retained by the core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub metric_name: Metric,
    pub observed_value: f64,
    pub threshold: f64,
    pub source_id: String,
}

// ─── Evaluation ──────────────────────────────────────────────────

/// Level-triggered check of `latest` against `thresholds`.
///
/// Emits one event per metric strictly above its limit, every time it is
/// called, in `Metric::EVALUATION_ORDER`. Metrics absent from `latest`
/// are skipped.
pub fn evaluate(latest: &LatestMetrics, thresholds: &AlertThresholds) -> Vec<AlertEvent> {
    Metric::EVALUATION_ORDER
        .iter()
        .filter_map(|&metric| {
            let observed = *latest.values.get(&metric)?;
            let threshold = thresholds.limit(metric);
            (observed > threshold).then(|| AlertEvent {
                timestamp: latest.timestamp,
                metric_name: metric,
                observed_value: observed,
                threshold,
                source_id: latest.source_id.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn thresholds() -> AlertThresholds {
        AlertThresholds {
            cpu_percent_max: 90.0,
            memory_percent_max: 80.0,
            network_in_bytes_per_sec_max: 1000.0,
            network_out_bytes_per_sec_max: 2000.0,
        }
    }

    #[test]
    fn cpu_above_threshold_yields_one_event() {
        let latest = LatestMetrics::new("system", now()).with(Metric::Cpu, 95.0);
        let events = evaluate(&latest, &thresholds());
        assert_eq!(
            events,
            vec![AlertEvent {
                timestamp: now(),
                metric_name: Metric::Cpu,
                observed_value: 95.0,
                threshold: 90.0,
                source_id: "system".into(),
            }]
        );
    }

    #[test]
    fn equal_to_threshold_does_not_alert() {
        let latest = LatestMetrics::new("system", now()).with(Metric::Cpu, 90.0);
        assert!(evaluate(&latest, &thresholds()).is_empty());
    }

    #[test]
    fn order_is_cpu_memory_in_out_regardless_of_insertion() {
        let latest = LatestMetrics::new("eth0", now())
            .with(Metric::NetworkOut, 5000.0)
            .with(Metric::NetworkIn, 5000.0)
            .with(Metric::Memory, 99.0)
            .with(Metric::Cpu, 99.0);
        let order: Vec<Metric> = evaluate(&latest, &thresholds())
            .into_iter()
            .map(|e| e.metric_name)
            .collect();
        assert_eq!(order, Metric::EVALUATION_ORDER.to_vec());
    }

    #[test]
    fn repeated_evaluation_re_alerts_every_time() {
        let latest = LatestMetrics::new("system", now()).with(Metric::Memory, 81.0);
        for _ in 0..3 {
            assert_eq!(evaluate(&latest, &thresholds()).len(), 1);
        }
    }

    #[test]
    fn nan_never_alerts() {
        let latest = LatestMetrics::new("system", now()).with(Metric::Cpu, f64::NAN);
        assert!(evaluate(&latest, &thresholds()).is_empty());
    }

    #[test]
    fn validate_rejects_bad_limits() {
        assert!(AlertThresholds::default().validate().is_ok());
        let bad = AlertThresholds {
            cpu_percent_max: 120.0,
            ..AlertThresholds::default()
        };
        assert!(bad.validate().is_err());
        let bad = AlertThresholds {
            network_in_bytes_per_sec_max: -1.0,
            ..AlertThresholds::default()
        };
        assert!(bad.validate().is_err());
    }
}
