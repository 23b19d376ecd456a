use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One stored observation. Identity is `(timestamp, metric_name, host, tags)`;
/// a second write with the same identity replaces the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    /// Dotted lowercase identifier, e.g. `cpu.total_usage`.
    pub metric_name: String,
    pub host: String,
    /// Canonical tag string (see [`crate::tags`]); empty is valid.
    pub tags: String,
    pub value: f64,
}

impl SamplePoint {
    pub fn new(timestamp: i64, metric_name: &str, host: &str, tags: &str, value: f64) -> Self {
        Self {
            timestamp,
            metric_name: metric_name.to_string(),
            host: host.to_string(),
            tags: tags.to_string(),
            value,
        }
    }
}

/// Current Unix timestamp in seconds.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuSnapshot {
    pub num_cores: u32,
    /// Percentage per core, length == `num_cores`.
    pub per_core_usage: Vec<f64>,
    /// Aggregate usage percentage in [0, 100].
    pub total_usage: f64,
    pub load_average_1m: f64,
    pub load_average_5m: f64,
    pub load_average_15m: f64,
    pub context_switches: u64,
    pub interrupts: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub cached_bytes: u64,
    pub buffers_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiskEntry {
    pub device_name: String,
    pub mount_point: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
    /// Monotonic counters that may reset on wrap; stored as opaque gauges.
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub interface_name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errors_in: u64,
    pub errors_out: u64,
    pub drops_in: u64,
    pub drops_out: u64,
    pub is_up: bool,
    pub speed_mbps: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub executable: String,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub num_threads: u32,
    /// Unix timestamp, seconds.
    pub start_time: i64,
    /// Running, Sleeping, Zombie, ...
    pub state: String,
    pub username: String,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub open_files: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub hostname: String,
    pub architecture: String,
    pub uptime_seconds: u64,
    pub boot_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Comparator for threshold rules. `Equals` uses an absolute tolerance of
/// 1e-3 rather than exact floating-point equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Above,
    Below,
    Equals,
}

pub const EQUALS_TOLERANCE: f64 = 1e-3;

impl AlertCondition {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Above => value > threshold,
            AlertCondition::Below => value < threshold,
            AlertCondition::Equals => (value - threshold).abs() < EQUALS_TOLERANCE,
        }
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertCondition::Above => write!(f, "above"),
            AlertCondition::Below => write!(f, "below"),
            AlertCondition::Equals => write!(f, "equals"),
        }
    }
}

impl std::str::FromStr for AlertCondition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "above" | "gt" => Ok(AlertCondition::Above),
            "below" | "lt" => Ok(AlertCondition::Below),
            "equals" | "eq" => Ok(AlertCondition::Equals),
            _ => Err(format!("unknown alert condition: {s}")),
        }
    }
}

/// A fired alert, handed to every notification channel the rule names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_name: String,
    pub metric: String,
    pub current_value: f64,
    pub threshold: f64,
    pub condition: AlertCondition,
    pub severity: Severity,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    pub message: String,
    pub hostname: String,
    /// Set for process-scoped rules only.
    pub process_name: Option<String>,
    pub process_id: Option<u32>,
}
