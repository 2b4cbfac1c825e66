use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{RingHistory, Sample};

// ─── Public types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateStatus {
    Ok,
    /// Fewer than two usable samples, or no time elapsed between them.
    InsufficientData,
    /// The counter went backwards (interface restart, reboot).
    CounterReset,
}

/// A per-second rate derived from a cumulative counter.
/// `value` is `None` when the rate is unavailable, never a fake zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateView {
    pub value: Option<f64>,
    pub status: RateStatus,
}

impl RateView {
    fn ok(value: f64) -> Self {
        Self {
            value: Some(value),
            status: RateStatus::Ok,
        }
    }

    fn insufficient() -> Self {
        Self {
            value: None,
            status: RateStatus::InsufficientData,
        }
    }

    fn reset(value: f64) -> Self {
        Self {
            value: Some(value),
            status: RateStatus::CounterReset,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == RateStatus::Ok
    }
}

// ─── Rate computation ────────────────────────────────────────────

fn elapsed_secs(prev: DateTime<Utc>, curr: DateTime<Utc>) -> f64 {
    let delta = curr - prev;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}

/// Instantaneous rate of `field` from the two most recent samples.
pub fn rate(history: &RingHistory, field: &str) -> RateView {
    let Some((prev, curr)) = history.last_two() else {
        return RateView::insufficient();
    };
    let (Some(before), Some(after)) = (prev.field(field), curr.field(field)) else {
        return RateView::insufficient();
    };

    let dt = elapsed_secs(prev.timestamp, curr.timestamp);
    if dt <= 0.0 {
        return RateView::insufficient();
    }

    if after < before {
        return RateView::reset(0.0);
    }
    RateView::ok((after - before) / dt)
}

/// Average rate of `field` across the trailing `window`.
///
/// Sums the non-negative deltas between consecutive samples and divides by
/// the time spanned. Intervals in which the counter reset contribute
/// nothing, and flag the result as `CounterReset`.
pub fn smoothed_rate(history: &RingHistory, field: &str, window: Duration) -> RateView {
    let points: Vec<(&Sample, f64)> = history
        .window_since(window)
        .filter_map(|s| s.field(field).map(|v| (s, v)))
        .collect();

    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return RateView::insufficient();
    };
    if points.len() < 2 {
        return RateView::insufficient();
    }
    let span = elapsed_secs(first.0.timestamp, last.0.timestamp);
    if span <= 0.0 {
        return RateView::insufficient();
    }

    let mut total = 0.0;
    let mut saw_reset = false;
    for pair in points.windows(2) {
        let delta = pair[1].1 - pair[0].1;
        if delta < 0.0 {
            saw_reset = true;
        } else {
            total += delta;
        }
    }

    if saw_reset {
        RateView::reset(total / span)
    } else {
        RateView::ok(total / span)
    }
}
