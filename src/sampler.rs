use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;

use crate::error::SampleError;
use crate::metrics::{fields, Sample, SYSTEM_SOURCE};

// ─── Ingest boundary ─────────────────────────────────────────────

/// Raw cumulative counters of one network interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub dropped_in: u64,
    pub dropped_out: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// First address of each family bound to an interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceAddresses {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub mac: Option<String>,
}

/// Static-ish description of the host, served by `GET /api/host`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub arch: String,
    pub cpu_brand: Option<String>,
    pub cpu_frequency_mhz: Option<u64>,
    pub cores_physical: Option<usize>,
    pub cores_logical: usize,
    pub memory_total_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub swap_free_bytes: u64,
    pub swap_percent: f64,
    pub uptime_secs: u64,
}

/// Read-only view of the host OS. Calls may block.
pub trait HostProbe: Send + Sync + 'static {
    /// Host-wide CPU utilisation averaged over `window`, in percent.
    fn cpu_percent(&self, window: Duration) -> Result<f64, SampleError>;

    /// Used (non-available) memory, in percent of total.
    fn memory_percent(&self) -> Result<f64, SampleError>;

    /// Counters of every interface currently present on the host.
    fn interfaces(&self) -> Result<HashMap<String, InterfaceCounters>, SampleError>;

    /// Addresses of every interface currently present on the host.
    fn addresses(&self) -> Result<HashMap<String, InterfaceAddresses>, SampleError>;

    fn host_info(&self) -> Result<HostInfo, SampleError>;
}

// ─── sysinfo / procfs probe ──────────────────────────────────────

/// `HostProbe` backed by `sysinfo` (CPU, memory, host details) plus
/// `/proc/net/dev` and `getifaddrs` on Linux, or `sysinfo::Networks`
/// elsewhere.
pub struct SysinfoProbe {
    system: Mutex<System>,
    #[cfg(not(target_os = "linux"))]
    networks: Mutex<sysinfo::Networks>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            #[cfg(not(target_os = "linux"))]
            networks: Mutex::new(sysinfo::Networks::new_with_refreshed_list()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoProbe {
    fn cpu_percent(&self, window: Duration) -> Result<f64, SampleError> {
        let mut sys = self.system.lock();
        // Usage is a delta between two refreshes at least this far apart
        sys.refresh_cpu();
        std::thread::sleep(window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL));
        sys.refresh_cpu();

        let usage = sys.global_cpu_info().cpu_usage() as f64;
        if usage.is_finite() {
            Ok(usage.clamp(0.0, 100.0))
        } else {
            Err(SampleError::Probe(format!("cpu usage reported as {usage}")))
        }
    }

    fn memory_percent(&self) -> Result<f64, SampleError> {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        if total == 0 {
            return Err(SampleError::Probe("total memory reported as 0".into()));
        }
        let used = total.saturating_sub(sys.available_memory());
        Ok(used as f64 / total as f64 * 100.0)
    }

    #[cfg(target_os = "linux")]
    fn interfaces(&self) -> Result<HashMap<String, InterfaceCounters>, SampleError> {
        let devices =
            procfs::net::dev_status().map_err(|e| SampleError::Probe(e.to_string()))?;

        Ok(devices
            .into_iter()
            .map(|(name, d)| {
                let counters = InterfaceCounters {
                    bytes_sent: d.sent_bytes,
                    bytes_recv: d.recv_bytes,
                    errors_in: d.recv_errs,
                    errors_out: d.sent_errs,
                    dropped_in: d.recv_drop,
                    dropped_out: d.sent_drop,
                    packets_sent: d.sent_packets,
                    packets_recv: d.recv_packets,
                };
                (name, counters)
            })
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    fn interfaces(&self) -> Result<HashMap<String, InterfaceCounters>, SampleError> {
        let mut networks = self.networks.lock();
        // Picks up interfaces that appeared or vanished since last call
        networks.refresh_list();

        // No drop counters outside procfs
        Ok(networks
            .iter()
            .map(|(name, data)| {
                let counters = InterfaceCounters {
                    bytes_sent: data.total_transmitted(),
                    bytes_recv: data.total_received(),
                    errors_in: data.total_errors_on_received(),
                    errors_out: data.total_errors_on_transmitted(),
                    dropped_in: 0,
                    dropped_out: 0,
                    packets_sent: data.total_packets_transmitted(),
                    packets_recv: data.total_packets_received(),
                };
                (name.clone(), counters)
            })
            .collect())
    }

    #[cfg(target_os = "linux")]
    fn addresses(&self) -> Result<HashMap<String, InterfaceAddresses>, SampleError> {
        use std::net::{SocketAddrV4, SocketAddrV6};

        let ifaddrs =
            nix::ifaddrs::getifaddrs().map_err(|e| SampleError::Probe(e.to_string()))?;

        let mut out: HashMap<String, InterfaceAddresses> = HashMap::new();
        for ifa in ifaddrs {
            let entry = out.entry(ifa.interface_name.clone()).or_default();
            let Some(addr) = ifa.address else {
                continue;
            };
            if let Some(v4) = addr.as_sockaddr_in() {
                entry
                    .ipv4
                    .get_or_insert_with(|| SocketAddrV4::from(*v4).ip().to_string());
            } else if let Some(v6) = addr.as_sockaddr_in6() {
                entry
                    .ipv6
                    .get_or_insert_with(|| SocketAddrV6::from(*v6).ip().to_string());
            } else if let Some(mac) = addr.as_link_addr().and_then(|l| l.addr()) {
                entry.mac.get_or_insert_with(|| format_mac(&mac));
            }
        }
        Ok(out)
    }

    #[cfg(not(target_os = "linux"))]
    fn addresses(&self) -> Result<HashMap<String, InterfaceAddresses>, SampleError> {
        let networks = self.networks.lock();
        // sysinfo only knows the link address here
        Ok(networks
            .iter()
            .map(|(name, data)| {
                let mac = data.mac_address();
                let addrs = InterfaceAddresses {
                    mac: (!mac.is_unspecified()).then(|| mac.to_string()),
                    ..Default::default()
                };
                (name.clone(), addrs)
            })
            .collect())
    }

    fn host_info(&self) -> Result<HostInfo, SampleError> {
        let mut sys = self.system.lock();
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu = sys.cpus().first();
        let swap_total = sys.total_swap();
        let swap_used = sys.used_swap();

        Ok(HostInfo {
            hostname: System::host_name(),
            os_name: System::name(),
            os_version: System::os_version(),
            kernel_version: System::kernel_version(),
            arch: std::env::consts::ARCH.to_owned(),
            cpu_brand: cpu
                .map(|c| c.brand().trim().to_owned())
                .filter(|b| !b.is_empty()),
            cpu_frequency_mhz: cpu.map(|c| c.frequency()),
            cores_physical: sys.physical_core_count(),
            cores_logical: sys.cpus().len(),
            memory_total_bytes: sys.total_memory(),
            swap_total_bytes: swap_total,
            swap_used_bytes: swap_used,
            swap_free_bytes: sys.free_swap(),
            swap_percent: if swap_total == 0 {
                0.0
            } else {
                swap_used as f64 / swap_total as f64 * 100.0
            },
            uptime_secs: System::uptime(),
        })
    }
}

#[cfg(target_os = "linux")]
fn format_mac(octets: &[u8; 6]) -> String {
    octets
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

// ─── Sampler ─────────────────────────────────────────────────────

pub type SampleSet = BTreeMap<String, Result<Sample, SampleError>>;

/// Reads one `Sample` per requested source. Stateless apart from the probe.
#[derive(Clone)]
pub struct Sampler {
    probe: Arc<dyn HostProbe>,
    cpu_window: Duration,
}

impl Sampler {
    pub fn new(probe: Arc<dyn HostProbe>, cpu_window: Duration) -> Self {
        Self { probe, cpu_window }
    }

    /// Sample every id in `sources`. `"system"` reads CPU + memory, any
    /// other id is an interface name.
    ///
    /// The blocking system read and the interface read run in parallel on
    /// the blocking pool. A failure for one source never hides the results
    /// of the others.
    pub async fn sample(&self, sources: &BTreeSet<String>) -> SampleSet {
        let interfaces: Vec<String> = sources
            .iter()
            .filter(|id| id.as_str() != SYSTEM_SOURCE)
            .cloned()
            .collect();

        let system_task = sources.contains(SYSTEM_SOURCE).then(|| {
            let probe = self.probe.clone();
            let window = self.cpu_window;
            tokio::task::spawn_blocking(move || read_system(probe.as_ref(), window))
        });

        let iface_task = (!interfaces.is_empty()).then(|| {
            let probe = self.probe.clone();
            let names = interfaces.clone();
            tokio::task::spawn_blocking(move || read_interfaces(probe.as_ref(), &names))
        });

        let mut out = SampleSet::new();

        if let Some(task) = system_task {
            let result = task
                .await
                .unwrap_or_else(|e| Err(SampleError::Probe(format!("system read task: {e}"))));
            out.insert(SYSTEM_SOURCE.to_owned(), result);
        }

        if let Some(task) = iface_task {
            match task.await {
                Ok(results) => out.extend(results),
                Err(e) => {
                    let err = SampleError::Probe(format!("interface read task: {e}"));
                    out.extend(interfaces.into_iter().map(|id| (id, Err(err.clone()))));
                }
            }
        }

        out
    }
}

fn read_system(probe: &dyn HostProbe, window: Duration) -> Result<Sample, SampleError> {
    let cpu = percent_reading("cpu", probe.cpu_percent(window)?)?;
    let memory = percent_reading("memory", probe.memory_percent()?)?;

    Ok(Sample::new(SYSTEM_SOURCE, Utc::now())
        .with_field(fields::CPU_PERCENT, cpu)
        .with_field(fields::MEMORY_PERCENT, memory))
}

/// Clamp into 0..=100; a non-finite reading fails the source.
fn percent_reading(name: &str, value: f64) -> Result<f64, SampleError> {
    if value.is_finite() {
        Ok(value.clamp(0.0, 100.0))
    } else {
        Err(SampleError::Probe(format!("{name} usage reported as {value}")))
    }
}

fn read_interfaces(
    probe: &dyn HostProbe,
    names: &[String],
) -> Vec<(String, Result<Sample, SampleError>)> {
    let all = match probe.interfaces() {
        Ok(all) => all,
        Err(e) => return names.iter().map(|n| (n.clone(), Err(e.clone()))).collect(),
    };
    let now = Utc::now();

    names
        .iter()
        .map(|name| {
            let result = all
                .get(name)
                .map(|c| counters_sample(name, now, c))
                .ok_or_else(|| SampleError::SourceUnavailable(name.clone()));
            (name.clone(), result)
        })
        .collect()
}

fn counters_sample(
    name: &str,
    at: chrono::DateTime<Utc>,
    c: &InterfaceCounters,
) -> Sample {
    Sample::new(name, at)
        .with_field(fields::BYTES_SENT, c.bytes_sent as f64)
        .with_field(fields::BYTES_RECV, c.bytes_recv as f64)
        .with_field(fields::ERRORS_IN, c.errors_in as f64)
        .with_field(fields::ERRORS_OUT, c.errors_out as f64)
        .with_field(fields::DROPPED_IN, c.dropped_in as f64)
        .with_field(fields::DROPPED_OUT, c.dropped_out as f64)
        .with_field(fields::PACKETS_SENT, c.packets_sent as f64)
        .with_field(fields::PACKETS_RECV, c.packets_recv as f64)
}

// ─── Scripted probe for tests ────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fake::FakeProbe;
    use super::*;

    fn sources(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_interface_is_isolated() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_cpu(12.5);
        probe.set_memory(40.0);
        probe.set_interface(
            "eth0",
            InterfaceCounters {
                bytes_sent: 1000,
                bytes_recv: 2000,
                ..Default::default()
            },
        );
        let sampler = Sampler::new(probe, Duration::ZERO);

        let out = sampler.sample(&sources(&["system", "eth0", "gone0"])).await;

        assert_eq!(out.len(), 3);
        let system = out["system"].as_ref().unwrap();
        assert_eq!(system.field(fields::CPU_PERCENT), Some(12.5));
        assert_eq!(system.field(fields::MEMORY_PERCENT), Some(40.0));

        let eth0 = out["eth0"].as_ref().unwrap();
        assert_eq!(eth0.source_id, "eth0");
        assert_eq!(eth0.field(fields::BYTES_SENT), Some(1000.0));
        assert_eq!(eth0.field(fields::BYTES_RECV), Some(2000.0));
        assert_eq!(eth0.field(fields::DROPPED_OUT), Some(0.0));

        assert!(matches!(
            out["gone0"],
            Err(SampleError::SourceUnavailable(ref id)) if id == "gone0"
        ));
    }

    #[tokio::test]
    async fn broken_probe_fails_every_source() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_broken(true);
        let sampler = Sampler::new(probe, Duration::ZERO);

        let out = sampler.sample(&sources(&["system", "eth0"])).await;
        assert_eq!(out.len(), 2);
        assert!(out.values().all(|r| matches!(r, Err(SampleError::Probe(_)))));
    }

    #[tokio::test]
    async fn packet_counters_are_carried() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_interface(
            "eth0",
            InterfaceCounters {
                packets_sent: 7,
                packets_recv: 11,
                ..Default::default()
            },
        );
        let sampler = Sampler::new(probe, Duration::ZERO);

        let out = sampler.sample(&sources(&["eth0"])).await;
        let eth0 = out["eth0"].as_ref().unwrap();
        assert_eq!(eth0.field(fields::PACKETS_SENT), Some(7.0));
        assert_eq!(eth0.field(fields::PACKETS_RECV), Some(11.0));
    }

    #[tokio::test]
    async fn non_finite_reading_fails_system_source() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_cpu(20.0);
        probe.set_memory(f64::NAN);
        let sampler = Sampler::new(probe.clone(), Duration::ZERO);

        let out = sampler.sample(&sources(&["system"])).await;
        assert!(matches!(out["system"], Err(SampleError::Probe(_))));

        probe.set_memory(30.0);
        probe.set_cpu(f64::INFINITY);
        let out = sampler.sample(&sources(&["system"])).await;
        assert!(matches!(out["system"], Err(SampleError::Probe(_))));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn mac_is_lowercase_colon_separated() {
        assert_eq!(
            format_mac(&[0x00, 0x1a, 0x2B, 0x3c, 0x4d, 0xff]),
            "00:1a:2b:3c:4d:ff"
        );
    }

    #[tokio::test]
    async fn percentages_are_clamped() {
        let probe = Arc::new(FakeProbe::new());
        probe.set_cpu(130.0);
        probe.set_memory(-1.0);
        let sampler = Sampler::new(probe, Duration::ZERO);

        let out = sampler.sample(&sources(&["system"])).await;
        let system = out["system"].as_ref().unwrap();
        assert_eq!(system.field(fields::CPU_PERCENT), Some(100.0));
        assert_eq!(system.field(fields::MEMORY_PERCENT), Some(0.0));
    }
}
