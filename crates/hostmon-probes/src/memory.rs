use hostmon_common::types::MemorySnapshot;
use sysinfo::System;

pub struct MemorySampler {
    system: System,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    pub fn sample(&mut self) -> MemorySnapshot {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let available = self.system.available_memory().min(total);
        let used = self.system.used_memory().min(total);
        let free = self.system.free_memory();
        let swap_total = self.system.total_swap();
        let swap_used = self.system.used_swap().min(swap_total);

        let usage_percent = if total > 0 {
            (used as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let (cached, buffers) = page_cache_counters();

        MemorySnapshot {
            total_bytes: total,
            available_bytes: available,
            used_bytes: used,
            free_bytes: free,
            cached_bytes: cached,
            buffers_bytes: buffers,
            swap_total_bytes: swap_total,
            swap_used_bytes: swap_used,
            usage_percent,
        }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn page_cache_counters() -> (u64, u64) {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        return (0, 0);
    };
    let mut cached = 0u64;
    let mut buffers = 0u64;
    for line in meminfo.lines() {
        // Values are reported in kB.
        if let Some(rest) = line.strip_prefix("Cached:") {
            cached = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("Buffers:") {
            buffers = parse_kb(rest);
        }
    }
    (cached, buffers)
}

#[cfg(target_os = "linux")]
fn parse_kb(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn page_cache_counters() -> (u64, u64) {
    (0, 0)
}
