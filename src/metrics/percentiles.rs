use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// HdrHistogram range: 1 μs → 10 min, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 600_000_000;
const HIST_SIGFIG: u8 = 3;

/// Distribution of full-cycle wall times of the monitor loop.
pub struct CycleDurations {
    hist: Option<Histogram<u64>>,
}

/// Cycle-duration percentiles in milliseconds, shipped by `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct DurationSummary {
    pub count: u64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl CycleDurations {
    pub fn new() -> Self {
        // Bounds are constant and valid; `None` only if hdrhistogram
        // ever tightens its limits, in which case recording becomes a no-op.
        Self {
            hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG).ok(),
        }
    }

    /// Record one cycle (clamped into the histogram range).
    pub fn record(&mut self, elapsed: Duration) {
        if let Some(hist) = self.hist.as_mut() {
            let us = (elapsed.as_micros() as u64).clamp(HIST_LOW, HIST_HIGH);
            let _ = hist.record(us);
        }
    }

    pub fn summary(&self) -> DurationSummary {
        let Some(hist) = self.hist.as_ref().filter(|h| h.len() > 0) else {
            return DurationSummary::empty();
        };
        let ms = |us: u64| us as f64 / 1000.0;

        DurationSummary {
            count: hist.len(),
            min_ms: ms(hist.min()),
            max_ms: ms(hist.max()),
            mean_ms: hist.mean() / 1000.0,
            p50_ms: ms(hist.value_at_percentile(50.0)),
            p95_ms: ms(hist.value_at_percentile(95.0)),
            p99_ms: ms(hist.value_at_percentile(99.0)),
        }
    }
}

impl Default for CycleDurations {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationSummary {
    /// All-zero placeholder before the first cycle completes.
    pub fn empty() -> Self {
        Self {
            count: 0,
            min_ms: 0.0,
            max_ms: 0.0,
            mean_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_is_zeroed() {
        let d = CycleDurations::new();
        assert_eq!(d.summary().count, 0);
        assert_eq!(d.summary().max_ms, 0.0);
    }

    #[test]
    fn summary_tracks_recorded_cycles() {
        let mut d = CycleDurations::new();
        for ms in [10, 20, 30, 40] {
            d.record(Duration::from_millis(ms));
        }
        let s = d.summary();
        assert_eq!(s.count, 4);
        assert!((s.min_ms - 10.0).abs() < 0.1);
        assert!((s.max_ms - 40.0).abs() < 0.1);
        assert!(s.p50_ms >= 19.9 && s.p50_ms <= 20.1);
    }
}
