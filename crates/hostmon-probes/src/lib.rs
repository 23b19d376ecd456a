//! Platform probes: concrete OS readers behind a narrow sampling contract.
//!
//! Each sampler wraps its own `sysinfo` handle and refreshes it on every
//! call, the cheapest way to get consistent deltas for CPU percentages.
//! Probes must be safe to call repeatedly, may return empty or partial
//! results on per-item failure, and never panic in steady state.

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod process;

use anyhow::Result;
use hostmon_common::types::{
    CpuSnapshot, DiskEntry, MemorySnapshot, NetworkEntry, ProcessEntry, SystemInfo,
};

/// The sampling contract consumed by the collection scheduler. One
/// implementation per build target; tests substitute their own.
pub trait Probes: Send {
    fn cpu(&mut self) -> Result<CpuSnapshot>;
    fn memory(&mut self) -> Result<MemorySnapshot>;
    fn disks(&mut self) -> Result<Vec<DiskEntry>>;
    fn networks(&mut self) -> Result<Vec<NetworkEntry>>;
    fn processes(&mut self) -> Result<Vec<ProcessEntry>>;
}

/// The real probe set for the current platform.
pub struct PlatformProbes {
    cpu: cpu::CpuSampler,
    memory: memory::MemorySampler,
    disk: disk::DiskSampler,
    network: network::NetworkSampler,
    process: process::ProcessSampler,
}

impl PlatformProbes {
    pub fn new() -> Self {
        Self {
            cpu: cpu::CpuSampler::new(),
            memory: memory::MemorySampler::new(),
            disk: disk::DiskSampler::new(),
            network: network::NetworkSampler::new(),
            process: process::ProcessSampler::new(),
        }
    }
}

impl Default for PlatformProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl Probes for PlatformProbes {
    fn cpu(&mut self) -> Result<CpuSnapshot> {
        Ok(self.cpu.sample())
    }

    fn memory(&mut self) -> Result<MemorySnapshot> {
        Ok(self.memory.sample())
    }

    fn disks(&mut self) -> Result<Vec<DiskEntry>> {
        Ok(self.disk.sample())
    }

    fn networks(&mut self) -> Result<Vec<NetworkEntry>> {
        Ok(self.network.sample())
    }

    fn processes(&mut self) -> Result<Vec<ProcessEntry>> {
        Ok(self.process.sample())
    }
}

/// Host identifier used to tag every sample point this agent produces.
pub fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

/// Platform label for the outbound envelope.
pub fn platform_name() -> &'static str {
    if cfg!(target_os = "linux") {
        "Linux"
    } else if cfg!(target_os = "macos") {
        "macOS"
    } else if cfg!(target_os = "windows") {
        "Windows"
    } else {
        "Unknown"
    }
}

/// One-shot system identity block, used by the CLI `system` command.
pub fn system_info() -> SystemInfo {
    SystemInfo {
        os_name: sysinfo::System::name().unwrap_or_default(),
        os_version: sysinfo::System::os_version().unwrap_or_default(),
        kernel_version: sysinfo::System::kernel_version().unwrap_or_default(),
        hostname: hostname(),
        architecture: sysinfo::System::cpu_arch().unwrap_or_default(),
        uptime_seconds: sysinfo::System::uptime(),
        boot_time: sysinfo::System::boot_time(),
    }
}
