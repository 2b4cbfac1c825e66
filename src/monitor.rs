use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::alerts::{self, AlertEvent, AlertThresholds, LatestMetrics, Metric};
use crate::config::{MonitorSettings, Snapshot};
use crate::error::{CycleError, WriteError};
use crate::metrics::percentiles::{CycleDurations, DurationSummary};
use crate::metrics::rate::rate;
use crate::metrics::{fields, HistoryStore, RateView, Sample, SYSTEM_SOURCE};
use crate::sampler::Sampler;
use crate::sink::{MetricsSink, Point, HOST_TAG};

/// Capacity of the alert broadcast; slow subscribers see `Lagged`.
const ALERT_CHANNEL_CAPACITY: usize = 64;

// ─── Public types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Sampling,
    Updating,
    Evaluating,
    Persisting,
    Sleeping,
    Stopped,
}

/// Alerts raised by one cycle, as pushed to `/api/alerts/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct CycleAlerts {
    pub cycle: u64,
    pub events: Vec<AlertEvent>,
}

/// Outcome of one successful cycle. Per-stage failures are counted here
/// instead of aborting the cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub sampled: usize,
    pub source_errors: usize,
    pub stored: usize,
    pub rejected: usize,
    pub alerts: Vec<AlertEvent>,
    pub points_written: usize,
    pub write_failures: usize,
    /// Points not attempted because shutdown was requested mid-cycle
    pub writes_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: LoopState,
    pub host: String,
    pub cycles: u64,
    pub fatal_cycles: u64,
    pub samples_stored: u64,
    pub samples_rejected: u64,
    pub source_errors: u64,
    pub alerts_emitted: u64,
    pub points_written: u64,
    pub write_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycle_duration: DurationSummary,
}

struct Counters {
    state: LoopState,
    cycles: u64,
    fatal_cycles: u64,
    samples_stored: u64,
    samples_rejected: u64,
    source_errors: u64,
    alerts_emitted: u64,
    points_written: u64,
    write_failures: u64,
    last_cycle_at: Option<DateTime<Utc>>,
    durations: CycleDurations,
}

// ─── Shared state ────────────────────────────────────────────────

/// Everything the query surface can see or reconfigure.
/// The loop is the only writer of `history`.
pub struct MonitorShared {
    pub history: HistoryStore,
    thresholds: Snapshot<AlertThresholds>,
    settings: Snapshot<MonitorSettings>,
    alerts: broadcast::Sender<CycleAlerts>,
    host: String,
    counters: Mutex<Counters>,
}

impl MonitorShared {
    pub fn new(
        history_capacity: usize,
        thresholds: AlertThresholds,
        settings: MonitorSettings,
        host: String,
    ) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            history: HistoryStore::new(history_capacity),
            thresholds: Snapshot::new(thresholds),
            settings: Snapshot::new(settings),
            alerts,
            host,
            counters: Mutex::new(Counters {
                state: LoopState::Idle,
                cycles: 0,
                fatal_cycles: 0,
                samples_stored: 0,
                samples_rejected: 0,
                source_errors: 0,
                alerts_emitted: 0,
                points_written: 0,
                write_failures: 0,
                last_cycle_at: None,
                durations: CycleDurations::new(),
            }),
        }
    }

    pub fn thresholds(&self) -> Arc<AlertThresholds> {
        self.thresholds.load()
    }

    /// The only way thresholds change after startup.
    pub fn set_thresholds(&self, thresholds: AlertThresholds) -> Result<(), String> {
        thresholds.validate()?;
        self.thresholds.store(thresholds);
        info!(?thresholds, "alert thresholds replaced");
        Ok(())
    }

    pub fn settings(&self) -> Arc<MonitorSettings> {
        self.settings.load()
    }

    /// Takes effect from the next cycle on; histories of removed
    /// interfaces are dropped then.
    pub fn set_settings(&self, settings: MonitorSettings) -> Result<(), String> {
        settings.validate()?;
        info!(
            interval_secs = settings.interval_secs.secs(),
            interfaces = ?settings.interfaces,
            "monitor settings replaced"
        );
        self.settings.store(settings);
        Ok(())
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<CycleAlerts> {
        self.alerts.subscribe()
    }

    /// Fan a cycle's alerts out to current subscribers. Returns how many
    /// received it; none listening is fine.
    pub fn publish_alerts(&self, alerts: CycleAlerts) -> usize {
        self.alerts.send(alerts).unwrap_or(0)
    }

    pub fn state(&self) -> LoopState {
        self.counters.lock().state
    }

    fn set_state(&self, state: LoopState) {
        self.counters.lock().state = state;
    }

    pub fn status(&self) -> StatusReport {
        let c = self.counters.lock();
        StatusReport {
            state: c.state,
            host: self.host.clone(),
            cycles: c.cycles,
            fatal_cycles: c.fatal_cycles,
            samples_stored: c.samples_stored,
            samples_rejected: c.samples_rejected,
            source_errors: c.source_errors,
            alerts_emitted: c.alerts_emitted,
            points_written: c.points_written,
            write_failures: c.write_failures,
            last_cycle_at: c.last_cycle_at,
            cycle_duration: c.durations.summary(),
        }
    }
}

// ─── Monitor ─────────────────────────────────────────────────────

/// Per-interface values derived after the update stage.
struct InterfaceView {
    latest: Sample,
    sent: RateView,
    recv: RateView,
}

pub struct Monitor {
    sampler: Sampler,
    sink: Arc<dyn MetricsSink>,
    shared: Arc<MonitorShared>,
    backoff: Duration,
    sink_timeout: Duration,
}

impl Monitor {
    pub fn new(
        sampler: Sampler,
        sink: Arc<dyn MetricsSink>,
        shared: Arc<MonitorShared>,
        backoff: Duration,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            sampler,
            sink,
            shared,
            backoff,
            sink_timeout,
        }
    }

    pub fn shared(&self) -> Arc<MonitorShared> {
        self.shared.clone()
    }

    /// Drive cycles until `shutdown` turns true (or its sender is gone).
    ///
    /// A started cycle always runs to completion; the signal is honoured
    /// before a new cycle begins and interrupts the sleep between cycles.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(sink = self.sink.name(), "monitor loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let pause = match self.cycle(&shutdown).await {
                Ok(report) => {
                    debug!(
                        sampled = report.sampled,
                        rejected = report.rejected,
                        alerts = report.alerts.len(),
                        written = report.points_written,
                        "cycle complete"
                    );
                    self.shared
                        .settings()
                        .interval_secs
                        .as_duration()
                        .saturating_sub(started.elapsed())
                }
                Err(e) => {
                    error!(error = %e, backoff_secs = self.backoff.as_secs(), "backing off");
                    self.shared.counters.lock().fatal_cycles += 1;
                    self.backoff
                }
            };
            self.shared.counters.lock().durations.record(started.elapsed());

            self.shared.set_state(LoopState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.shared.set_state(LoopState::Stopped);
        info!("monitor loop stopped");
    }

    /// One Sampling → Updating → Evaluating → Persisting pass.
    ///
    /// Only a cycle in which no source at all could be sampled is an error;
    /// every other failure is logged, counted and skipped.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let (_keep, never) = watch::channel(false);
        self.cycle(&never).await
    }

    /// `run_cycle` that stops issuing sink writes once `shutdown` is true.
    /// History and alert fan-out for the cycle are already done by then.
    async fn cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<CycleReport, CycleError> {
        let settings = self.shared.settings();
        let thresholds = self.shared.thresholds();
        let sources = settings.sources();
        let mut report = CycleReport::default();

        for id in self.shared.history.retain_sources(&sources) {
            info!(source = %id, "source deconfigured; history dropped");
        }

        // ── Sampling ────────────────────────────────────────────
        self.shared.set_state(LoopState::Sampling);
        let mut samples = Vec::with_capacity(sources.len());
        for (id, result) in self.sampler.sample(&sources).await {
            match result {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    warn!(stage = "sample", source = %id, error = %e, "source skipped this cycle");
                    report.source_errors += 1;
                }
            }
        }
        report.sampled = samples.len();

        if samples.is_empty() {
            let mut c = self.shared.counters.lock();
            c.source_errors += report.source_errors as u64;
            return Err(CycleError::FatalSamplingFailure {
                failed: report.source_errors,
            });
        }

        // ── Updating ────────────────────────────────────────────
        self.shared.set_state(LoopState::Updating);
        let mut fresh = BTreeSet::new();
        for sample in samples {
            let id = sample.source_id.clone();
            match self.shared.history.push(sample) {
                Ok(()) => {
                    fresh.insert(id);
                    report.stored += 1;
                }
                Err(e) => {
                    warn!(stage = "update", source = %id, error = %e, "sample dropped");
                    report.rejected += 1;
                }
            }
        }

        // ── Evaluating ──────────────────────────────────────────
        self.shared.set_state(LoopState::Evaluating);
        let now = Utc::now();
        let system = fresh
            .contains(SYSTEM_SOURCE)
            .then(|| self.shared.history.latest(SYSTEM_SOURCE))
            .flatten();
        let interfaces = self.interface_views(&fresh);

        report.alerts = self.evaluate(system.as_ref(), &interfaces, &thresholds);
        for event in &report.alerts {
            warn!(
                source = %event.source_id,
                metric = %event.metric_name,
                observed = event.observed_value,
                threshold = event.threshold,
                "threshold exceeded"
            );
        }

        let cycle = self.shared.counters.lock().cycles + 1;
        if !report.alerts.is_empty() {
            self.shared.publish_alerts(CycleAlerts {
                cycle,
                events: report.alerts.clone(),
            });
        }

        // ── Persisting ──────────────────────────────────────────
        self.shared.set_state(LoopState::Persisting);
        let points = self.points(now, system.as_ref(), &interfaces, &report.alerts);
        for (i, point) in points.iter().enumerate() {
            if *shutdown.borrow() {
                report.writes_skipped = points.len() - i;
                info!(skipped = report.writes_skipped, "shutdown requested; remaining writes skipped");
                break;
            }
            match self.write(point).await {
                Ok(_) => report.points_written += 1,
                Err(e) => {
                    warn!(
                        stage = "persist",
                        sink = self.sink.name(),
                        measurement = %point.measurement,
                        error = %e,
                        "write failed"
                    );
                    report.write_failures += 1;
                }
            }
        }

        let mut c = self.shared.counters.lock();
        c.cycles = cycle;
        c.samples_stored += report.stored as u64;
        c.samples_rejected += report.rejected as u64;
        c.source_errors += report.source_errors as u64;
        c.alerts_emitted += report.alerts.len() as u64;
        c.points_written += report.points_written as u64;
        c.write_failures += report.write_failures as u64;
        c.last_cycle_at = Some(now);

        Ok(report)
    }

    fn interface_views(&self, fresh: &BTreeSet<String>) -> Vec<InterfaceView> {
        fresh
            .iter()
            .filter(|id| id.as_str() != SYSTEM_SOURCE)
            .filter_map(|id| {
                self.shared
                    .history
                    .with_history(id, |h| {
                        h.latest().cloned().map(|latest| InterfaceView {
                            latest,
                            sent: rate(h, fields::BYTES_SENT),
                            recv: rate(h, fields::BYTES_RECV),
                        })
                    })
                    .flatten()
            })
            .collect()
    }

    /// `system` first, then interfaces in name order.
    fn evaluate(
        &self,
        system: Option<&Sample>,
        interfaces: &[InterfaceView],
        thresholds: &AlertThresholds,
    ) -> Vec<AlertEvent> {
        let mut events = Vec::new();

        if let Some(s) = system {
            let mut latest = LatestMetrics::new(SYSTEM_SOURCE, s.timestamp);
            if let Some(cpu) = s.field(fields::CPU_PERCENT) {
                latest = latest.with(Metric::Cpu, cpu);
            }
            if let Some(mem) = s.field(fields::MEMORY_PERCENT) {
                latest = latest.with(Metric::Memory, mem);
            }
            events.extend(alerts::evaluate(&latest, thresholds));
        }

        for iface in interfaces {
            let mut latest = LatestMetrics::new(&iface.latest.source_id, iface.latest.timestamp);
            // Only a clean interval feeds network alerts
            if let (true, Some(v)) = (iface.recv.is_ok(), iface.recv.value) {
                latest = latest.with(Metric::NetworkIn, v);
            }
            if let (true, Some(v)) = (iface.sent.is_ok(), iface.sent.value) {
                latest = latest.with(Metric::NetworkOut, v);
            }
            events.extend(alerts::evaluate(&latest, thresholds));
        }

        events
    }

    fn points(
        &self,
        now: DateTime<Utc>,
        system: Option<&Sample>,
        interfaces: &[InterfaceView],
        events: &[AlertEvent],
    ) -> Vec<Point> {
        let host = self.shared.host.as_str();
        let mut points = Vec::with_capacity(1 + interfaces.len() + events.len());

        // ── system_metrics ──────────────────────────────────────
        let mut sys = Point::new("system_metrics", system.map_or(now, |s| s.timestamp))
            .tag(HOST_TAG, host);
        if let Some(s) = system {
            if let Some(cpu) = s.field(fields::CPU_PERCENT) {
                sys = sys.field("cpu", cpu);
            }
            if let Some(mem) = s.field(fields::MEMORY_PERCENT) {
                sys = sys.field("memory", mem);
            }
        }
        let total = |pick: fn(&InterfaceView) -> RateView| -> Option<f64> {
            let values: Vec<f64> = interfaces.iter().filter_map(|i| pick(i).value).collect();
            (!values.is_empty()).then(|| values.iter().sum())
        };
        if let Some(v) = total(|i| i.recv) {
            sys = sys.field("network_in", v);
        }
        if let Some(v) = total(|i| i.sent) {
            sys = sys.field("network_out", v);
        }
        if !sys.fields.is_empty() {
            points.push(sys);
        }

        // ── interface_metrics ───────────────────────────────────
        for iface in interfaces {
            let mut p = Point::new("interface_metrics", iface.latest.timestamp)
                .tag(HOST_TAG, host)
                .tag("interface", iface.latest.source_id.as_str());
            for (name, value) in &iface.latest.fields {
                p = p.field(name.as_str(), *value);
            }
            if let Some(v) = iface.sent.value {
                p = p.field("rate_bytes_sent", v);
            }
            if let Some(v) = iface.recv.value {
                p = p.field("rate_bytes_recv", v);
            }
            points.push(p);
        }

        // ── alerts ──────────────────────────────────────────────
        for event in events {
            points.push(
                Point::new("alerts", event.timestamp)
                    .field("value", event.observed_value)
                    .field("threshold", event.threshold)
                    .tag(HOST_TAG, host)
                    .tag("metric", event.metric_name.as_str())
                    .tag("source", event.source_id.as_str()),
            );
        }

        points
    }

    /// Single attempt, bounded by the configured sink timeout.
    async fn write(&self, point: &Point) -> Result<(), WriteError> {
        match tokio::time::timeout(self.sink_timeout, self.sink.write(point)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(WriteError::Timeout(self.sink_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshInterval;
    use crate::metrics::RateStatus;
    use crate::sampler::fake::FakeProbe;
    use crate::sampler::InterfaceCounters;
    use crate::sink::{Ack, MemorySink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSink for FailingSink {
        async fn write(&self, _point: &Point) -> Result<Ack, WriteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(WriteError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn settings(interfaces: &[&str]) -> MonitorSettings {
        MonitorSettings {
            interval_secs: RefreshInterval::try_from(1).unwrap(),
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn low_thresholds() -> AlertThresholds {
        AlertThresholds {
            cpu_percent_max: 50.0,
            memory_percent_max: 50.0,
            network_in_bytes_per_sec_max: 1e12,
            network_out_bytes_per_sec_max: 1e12,
        }
    }

    fn monitor(
        probe: Arc<FakeProbe>,
        sink: Arc<dyn MetricsSink>,
        interfaces: &[&str],
    ) -> Monitor {
        monitor_with(
            probe,
            sink,
            interfaces,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
    }

    fn monitor_with(
        probe: Arc<FakeProbe>,
        sink: Arc<dyn MetricsSink>,
        interfaces: &[&str],
        backoff: Duration,
        sink_timeout: Duration,
    ) -> Monitor {
        let shared = Arc::new(MonitorShared::new(
            8,
            low_thresholds(),
            settings(interfaces),
            "test-host".into(),
        ));
        Monitor::new(
            Sampler::new(probe, Duration::ZERO),
            sink,
            shared,
            backoff,
            sink_timeout,
        )
    }

    async fn wait_until(mut reached: impl FnMut() -> bool) {
        for _ in 0..300 {
            if reached() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 3s");
    }

    /// Never answers; every write runs into the sink timeout.
    struct StallingSink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl MetricsSink for StallingSink {
        async fn write(&self, _point: &Point) -> Result<Ack, WriteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Ack::default())
        }

        fn name(&self) -> &'static str {
            "stalling"
        }
    }

    fn probe() -> Arc<FakeProbe> {
        let p = Arc::new(FakeProbe::new());
        p.set_cpu(95.0);
        p.set_memory(10.0);
        p.set_interface(
            "eth0",
            InterfaceCounters {
                bytes_sent: 1000,
                bytes_recv: 1000,
                ..Default::default()
            },
        );
        p
    }

    #[tokio::test]
    async fn sink_failure_does_not_stop_update_or_evaluation() {
        let sink = Arc::new(FailingSink {
            attempts: AtomicUsize::new(0),
        });
        let m = monitor(probe(), sink.clone(), &["eth0"]);

        let report = m.run_cycle().await.unwrap();

        assert_eq!(report.stored, 2);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].metric_name, Metric::Cpu);
        assert_eq!(report.points_written, 0);
        assert!(report.write_failures > 0);
        // One attempt per point, no retry
        assert_eq!(sink.attempts.load(Ordering::SeqCst), report.write_failures);
        assert!(m.shared.history.latest("eth0").is_some());
        assert!(m.shared.history.latest(SYSTEM_SOURCE).is_some());
        assert_eq!(m.shared.status().write_failures, report.write_failures as u64);
    }

    #[tokio::test]
    async fn alerts_repeat_every_cycle_and_are_persisted() {
        let sink = Arc::new(MemorySink::new(100));
        let m = monitor(probe(), sink.clone(), &["eth0"]);
        let mut rx = m.shared.subscribe_alerts();

        for cycle in 1..=2u64 {
            let report = m.run_cycle().await.unwrap();
            assert_eq!(report.alerts.len(), 1);
            let broadcast = rx.recv().await.unwrap();
            assert_eq!(broadcast.cycle, cycle);
            assert_eq!(broadcast.events, report.alerts);
        }

        let alerts = sink.measurement("alerts");
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].tags["metric"], "cpu");
        assert_eq!(alerts[0].tags["source"], "system");
        assert_eq!(alerts[0].fields["value"], 95.0);
        assert_eq!(alerts[0].fields["threshold"], 50.0);
        assert_eq!(alerts[0].tags[HOST_TAG], "test-host");
    }

    #[tokio::test]
    async fn missing_interface_is_isolated_and_no_source_is_fatal() {
        let p = probe();
        let m = monitor(p.clone(), Arc::new(MemorySink::new(100)), &["eth0", "gone0"]);

        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.sampled, 2);
        assert_eq!(report.source_errors, 1);

        p.set_broken(true);
        let err = m.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::FatalSamplingFailure { failed: 3 }));
        // Previous history untouched
        assert_eq!(
            m.shared.history.with_history("eth0", |h| h.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn vanished_interface_is_unavailable_and_keeps_its_history() {
        let p = probe();
        let sink = Arc::new(MemorySink::new(100));
        let m = monitor(p.clone(), sink.clone(), &["eth0"]);
        m.run_cycle().await.unwrap();

        p.remove_interface("eth0");
        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.sampled, 1);
        assert_eq!(report.source_errors, 1);
        assert_eq!(m.shared.history.with_history("eth0", |h| h.len()), Some(1));
        // Stale interface data is neither re-evaluated nor re-persisted
        assert_eq!(sink.measurement("interface_metrics").len(), 1);
    }

    #[tokio::test]
    async fn out_of_order_sample_is_dropped_without_failing_the_cycle() {
        let m = monitor(probe(), Arc::new(MemorySink::new(100)), &["eth0"]);
        let future = Utc::now() + chrono::Duration::hours(1);
        m.shared
            .history
            .push(Sample::new("eth0", future).with_field(fields::BYTES_SENT, 0.0))
            .unwrap();

        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.stored, 1);
        assert_eq!(m.shared.status().samples_rejected, 1);
    }

    #[tokio::test]
    async fn network_rates_and_reset_flow_through_the_cycle() {
        let p = probe();
        let sink = Arc::new(MemorySink::new(100));
        let m = monitor(p.clone(), sink.clone(), &["eth0"]);
        m.set_network_threshold(1.0);

        m.run_cycle().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        p.set_interface(
            "eth0",
            InterfaceCounters {
                bytes_sent: 5000,
                bytes_recv: 5000,
                ..Default::default()
            },
        );
        let report = m.run_cycle().await.unwrap();
        let metrics: Vec<Metric> = report.alerts.iter().map(|e| e.metric_name).collect();
        assert_eq!(metrics, vec![Metric::Cpu, Metric::NetworkIn, Metric::NetworkOut]);

        let iface = sink.measurement("interface_metrics");
        assert!(iface.last().unwrap().fields["rate_bytes_sent"] > 0.0);

        // Counter reset: rate is 0 and no network alert is raised
        tokio::time::sleep(Duration::from_millis(20)).await;
        p.set_interface("eth0", InterfaceCounters::default());
        let report = m.run_cycle().await.unwrap();
        let metrics: Vec<Metric> = report.alerts.iter().map(|e| e.metric_name).collect();
        assert_eq!(metrics, vec![Metric::Cpu]);
        let r = m
            .shared
            .history
            .with_history("eth0", |h| rate(h, fields::BYTES_SENT))
            .unwrap();
        assert_eq!(r.status, RateStatus::CounterReset);
        assert_eq!(r.value, Some(0.0));
    }

    #[tokio::test]
    async fn deconfigured_source_history_is_dropped() {
        let m = monitor(probe(), Arc::new(MemorySink::new(100)), &["eth0"]);
        m.run_cycle().await.unwrap();
        assert!(m.shared.history.latest("eth0").is_some());

        m.shared.set_settings(settings(&[])).unwrap();
        m.run_cycle().await.unwrap();
        assert!(m.shared.history.latest("eth0").is_none());
    }

    #[tokio::test]
    async fn threshold_reconfiguration_applies_next_cycle() {
        let m = monitor(probe(), Arc::new(MemorySink::new(100)), &[]);
        assert_eq!(m.run_cycle().await.unwrap().alerts.len(), 1);

        m.shared
            .set_thresholds(AlertThresholds {
                cpu_percent_max: 99.0,
                ..low_thresholds()
            })
            .unwrap();
        assert!(m.run_cycle().await.unwrap().alerts.is_empty());

        let bad = AlertThresholds {
            memory_percent_max: 101.0,
            ..low_thresholds()
        };
        assert!(m.shared.set_thresholds(bad).is_err());
        assert_eq!(m.shared.thresholds().cpu_percent_max, 99.0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let m = monitor(probe(), Arc::new(MemorySink::new(100)), &["eth0"]);
        let shared = m.shared();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(m.run(rx));

        for _ in 0..100 {
            if shared.status().cycles >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(shared.status().cycles >= 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn fatal_cycles_back_off_and_the_loop_recovers() {
        let p = probe();
        p.set_broken(true);
        let m = monitor_with(
            p.clone(),
            Arc::new(MemorySink::new(100)),
            &["eth0"],
            Duration::from_millis(50),
            Duration::from_secs(1),
        );
        let shared = m.shared();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(m.run(rx));

        wait_until(|| shared.status().fatal_cycles >= 3).await;
        assert_eq!(shared.status().cycles, 0);
        assert!(shared.history.latest("eth0").is_none());

        p.set_broken(false);
        wait_until(|| shared.status().cycles >= 1).await;
        assert!(shared.history.latest("eth0").is_some());
        assert!(shared.history.latest(SYSTEM_SOURCE).is_some());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_during_persisting_skips_remaining_writes() {
        let sink = Arc::new(StallingSink {
            attempts: AtomicUsize::new(0),
        });
        let m = monitor_with(
            probe(),
            sink.clone(),
            &["eth0"],
            Duration::from_secs(5),
            Duration::from_millis(300),
        );
        let shared = m.shared();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(m.run(rx));

        // system_metrics, interface_metrics and one cpu alert are queued
        wait_until(|| sink.attempts.load(Ordering::SeqCst) >= 1).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
        let status = shared.status();
        assert_eq!(status.write_failures, 1);
        assert_eq!(status.cycles, 1);
        assert_eq!(status.state, LoopState::Stopped);
    }

    #[tokio::test]
    async fn alert_batches_reach_every_subscriber() {
        let m = monitor(probe(), Arc::new(MemorySink::new(100)), &[]);
        let mut a = m.shared.subscribe_alerts();
        let mut b = m.shared.subscribe_alerts();

        m.run_cycle().await.unwrap();
        assert_eq!(a.recv().await.unwrap().events[0].metric_name, Metric::Cpu);
        assert_eq!(b.recv().await.unwrap().cycle, 1);
    }

    impl Monitor {
        fn set_network_threshold(&self, limit: f64) {
            self.shared
                .set_thresholds(AlertThresholds {
                    network_in_bytes_per_sec_max: limit,
                    network_out_bytes_per_sec_max: limit,
                    ..*self.shared.thresholds()
                })
                .unwrap();
        }
    }
}
