//! Host capability detection and resource clamping.
//!
//! Requested sandbox resources are clamped to what the instance can
//! actually give: roughly 10% of memory stays back for the OS, and the
//! floor is one CPU and one GiB.

use tracing::info;

/// Fraction of host memory handed to the sandbox
const MEMORY_HEADROOM: f64 = 0.9;

const MIN_CPUS: u32 = 1;
const MIN_MEMORY_MB: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapability {
    pub cpus: u32,
    pub memory_mb: u64,
}

impl HostCapability {
    /// Probe the local machine.
    pub fn detect() -> Self {
        Self {
            cpus: num_cpus::get() as u32,
            memory_mb: detect_memory_mb().unwrap_or(MIN_MEMORY_MB),
        }
    }

    /// Memory budget after OS headroom.
    pub fn usable_memory_mb(&self) -> u64 {
        ((self.memory_mb as f64) * MEMORY_HEADROOM) as u64
    }
}

fn detect_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

/// Clamp a resource request to host capability and log the effective
/// values that will actually apply.
pub fn clamp(requested_cpus: u32, requested_memory_mb: u64, host: HostCapability) -> (u32, u64) {
    let cpus = requested_cpus.clamp(MIN_CPUS, host.cpus.max(MIN_CPUS));
    let memory_mb = requested_memory_mb
        .clamp(MIN_MEMORY_MB, host.usable_memory_mb().max(MIN_MEMORY_MB));

    if cpus != requested_cpus || memory_mb != requested_memory_mb {
        info!(
            requested_cpus,
            requested_memory_mb,
            effective_cpus = cpus,
            effective_memory_mb = memory_mb,
            "resource request clamped to host capability"
        );
    } else {
        info!(cpus, memory_mb, "applying requested resources");
    }
    (cpus, memory_mb)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> HostCapability {
        HostCapability {
            cpus: 8,
            memory_mb: 16384,
        }
    }

    #[test]
    fn within_capability_passes_through() {
        assert_eq!(clamp(4, 8192, host()), (4, 8192));
    }

    #[test]
    fn over_capability_is_clamped() {
        let (cpus, memory) = clamp(64, 1_000_000, host());
        assert_eq!(cpus, 8);
        assert_eq!(memory, (16384.0 * 0.9) as u64);
    }

    #[test]
    fn zero_request_gets_floors() {
        let (cpus, memory) = clamp(0, 0, host());
        assert_eq!(cpus, 1);
        assert_eq!(memory, 1024);
    }

    #[test]
    fn tiny_host_still_yields_minimums() {
        let tiny = HostCapability {
            cpus: 1,
            memory_mb: 512,
        };
        let (cpus, memory) = clamp(4, 4096, tiny);
        assert_eq!(cpus, 1);
        assert_eq!(memory, 1024); // floor wins over headroom on tiny hosts
    }
}
