use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use super::Sample;
use crate::error::HistoryError;

// ─── RingHistory ─────────────────────────────────────────────────

/// Fixed-capacity, time-ordered sample buffer for one source.
/// When full, the oldest sample is evicted before the new one is appended.
#[derive(Debug, Clone)]
pub struct RingHistory {
    source_id: String,
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl RingHistory {
    /// `capacity` is clamped to at least 1.
    pub fn new(source_id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            source_id: source_id.into(),
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest one when at capacity.
    ///
    /// Rejects any sample whose timestamp is not strictly after the last
    /// stored one; the history is left untouched in that case.
    pub fn push(&mut self, sample: Sample) -> Result<(), HistoryError> {
        if let Some(last) = self.samples.back() {
            if sample.timestamp <= last.timestamp {
                return Err(HistoryError::OutOfOrderSample {
                    source_id: self.source_id.clone(),
                    last: last.timestamp,
                    got: sample.timestamp,
                });
            }
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The two most recent samples as `(previous, current)`.
    pub fn last_two(&self) -> Option<(&Sample, &Sample)> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        Some((&self.samples[n - 2], &self.samples[n - 1]))
    }

    /// Samples no older than `window` before the latest sample, oldest first.
    ///
    /// The returned iterator borrows the history and can be cloned to
    /// restart it.
    pub fn window_since(
        &self,
        window: Duration,
    ) -> impl Iterator<Item = &Sample> + Clone + '_ {
        let start = match self.samples.back() {
            Some(last) => {
                let cutoff = chrono::Duration::from_std(window)
                    .ok()
                    .and_then(|w| last.timestamp.checked_sub_signed(w));
                match cutoff {
                    Some(cutoff) => {
                        self.samples.partition_point(|s| s.timestamp < cutoff)
                    }
                    // Window reaches past the representable range → everything
                    None => 0,
                }
            }
            None => 0,
        };
        self.samples.range(start..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> + '_ {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

// ─── HistoryStore ────────────────────────────────────────────────

/// Per-source histories shared between the loop (sole writer) and the
/// query surface (readers).
pub struct HistoryStore {
    capacity: usize,
    inner: RwLock<BTreeMap<String, RingHistory>>,
}

/// Row in the `GET /api/sources` listing.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source_id: String,
    pub len: usize,
    pub capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Push into the sample's source history, creating it on first use.
    pub fn push(&self, sample: Sample) -> Result<(), HistoryError> {
        let mut map = self.inner.write();
        let capacity = self.capacity;
        map.entry(sample.source_id.clone())
            .or_insert_with_key(|id| RingHistory::new(id.clone(), capacity))
            .push(sample)
    }

    /// Run `f` against one source's history under the read lock.
    pub fn with_history<R>(
        &self,
        source_id: &str,
        f: impl FnOnce(&RingHistory) -> R,
    ) -> Option<R> {
        self.inner.read().get(source_id).map(f)
    }

    pub fn latest(&self, source_id: &str) -> Option<Sample> {
        self.with_history(source_id, |h| h.latest().cloned()).flatten()
    }

    pub fn window(&self, source_id: &str, window: Duration) -> Option<Vec<Sample>> {
        self.with_history(source_id, |h| h.window_since(window).cloned().collect())
    }

    /// Drop histories of sources that are no longer configured.
    /// Returns the ids that were dropped.
    pub fn retain_sources(&self, keep: &BTreeSet<String>) -> Vec<String> {
        let mut map = self.inner.write();
        let dropped: Vec<String> = map
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for id in &dropped {
            map.remove(id);
        }
        dropped
    }

    pub fn sources(&self) -> Vec<SourceSummary> {
        self.inner
            .read()
            .values()
            .map(|h| SourceSummary {
                source_id: h.source_id().to_owned(),
                len: h.len(),
                capacity: h.capacity(),
            })
            .collect()
    }
}
