use hostmon_common::types::CpuSnapshot;
use sysinfo::System;

pub struct CpuSampler {
    system: System,
}

impl CpuSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime usage counters so the first real sample has a delta to work
        // with instead of reporting zero.
        system.refresh_cpu();
        Self { system }
    }

    pub fn sample(&mut self) -> CpuSnapshot {
        self.system.refresh_cpu();

        let total_usage = f64::from(self.system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);
        let mut per_core_usage: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| f64::from(cpu.cpu_usage()).clamp(0.0, 100.0))
            .collect();
        if per_core_usage.is_empty() {
            per_core_usage.push(total_usage);
        }
        let num_cores = per_core_usage.len() as u32;

        let load = System::load_average();
        let (context_switches, interrupts) = kernel_counters();

        CpuSnapshot {
            num_cores,
            per_core_usage,
            total_usage,
            load_average_1m: load.one.max(0.0),
            load_average_5m: load.five.max(0.0),
            load_average_15m: load.fifteen.max(0.0),
            context_switches,
            interrupts,
        }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Context-switch and interrupt counters. Only /proc exposes these
/// portably enough to bother with; other platforms report zero.
#[cfg(target_os = "linux")]
fn kernel_counters() -> (u64, u64) {
    let Ok(stat) = std::fs::read_to_string("/proc/stat") else {
        return (0, 0);
    };
    let mut ctxt = 0u64;
    let mut intr = 0u64;
    for line in stat.lines() {
        if let Some(rest) = line.strip_prefix("ctxt ") {
            ctxt = rest.trim().parse().unwrap_or(0);
        } else if let Some(rest) = line.strip_prefix("intr ") {
            intr = rest
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
    }
    (ctxt, intr)
}

#[cfg(not(target_os = "linux"))]
fn kernel_counters() -> (u64, u64) {
    (0, 0)
}
