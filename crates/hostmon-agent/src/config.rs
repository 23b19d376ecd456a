use anyhow::{Context, Result};
use hostmon_publish::DiscoveryMethod;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Store locally only.
    #[default]
    Local,
    /// Push to an aggregator.
    Distributed,
    /// Both local and remote.
    Hybrid,
}

impl AgentMode {
    pub fn publishes(&self) -> bool {
        matches!(self, AgentMode::Distributed | AgentMode::Hybrid)
    }

    pub fn stores_locally(&self) -> bool {
        matches!(self, AgentMode::Local | AgentMode::Hybrid)
    }
}

/// The agent configuration file (flat YAML key/value).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub mode: AgentMode,
    /// Auto-detected when empty.
    #[serde(default)]
    pub hostname: String,

    // Local storage
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_storage_batch_size")]
    pub storage_batch_size: usize,
    #[serde(default = "default_storage_flush_interval_ms")]
    pub storage_flush_interval_ms: i64,

    // Tiered retention windows
    #[serde(default = "default_raw_retention_hours")]
    pub raw_retention_hours: u32,
    #[serde(default = "default_minute_retention_days")]
    pub minute_retention_days: u32,
    #[serde(default = "default_hour_retention_days")]
    pub hour_retention_days: u32,

    // Aggregator
    #[serde(default)]
    pub aggregator_url: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // Service discovery
    #[serde(default)]
    pub discovery_method: DiscoveryMethod,
    #[serde(default = "default_consul_addr")]
    pub consul_addr: String,
    #[serde(default)]
    pub consul_service_tag: String,
    #[serde(default = "default_discovery_timeout_seconds")]
    pub discovery_timeout_seconds: f64,

    // TLS
    #[serde(default)]
    pub tls_enabled: bool,
    #[serde(default = "default_tls_verify_peer")]
    pub tls_verify_peer: bool,
    #[serde(default)]
    pub tls_ca_cert: String,

    /// Comma-separated `key=value` pairs attached to every envelope.
    #[serde(default)]
    pub host_tags: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty agent config parses")
    }
}

fn default_db_path() -> String {
    "hostmon.db".to_string()
}

fn default_sample_interval_ms() -> u64 {
    1000
}

fn default_storage_batch_size() -> usize {
    100
}

fn default_storage_flush_interval_ms() -> i64 {
    5000
}

fn default_raw_retention_hours() -> u32 {
    24
}

fn default_minute_retention_days() -> u32 {
    30
}

fn default_hour_retention_days() -> u32 {
    365
}

fn default_push_interval_ms() -> u64 {
    5000
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_consul_addr() -> String {
    "http://localhost:8500".to_string()
}

fn default_discovery_timeout_seconds() -> f64 {
    5.0
}

fn default_tls_verify_peer() -> bool {
    true
}

impl AgentConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read agent config {path}"))?;
        let config: Self = serde_yaml::from_str(&content).context("malformed agent config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("malformed agent config")?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms < 100 {
            anyhow::bail!("sample_interval_ms must be >= 100");
        }
        if self.push_interval_ms < 100 {
            anyhow::bail!("push_interval_ms must be >= 100");
        }
        if self.max_queue_size < 1 {
            anyhow::bail!("max_queue_size must be >= 1");
        }
        if self.retry_max_attempts < 1 {
            anyhow::bail!("retry_max_attempts must be >= 1");
        }
        if self.retry_base_delay_ms < 1 {
            anyhow::bail!("retry_base_delay_ms must be >= 1");
        }
        if self.http_timeout_ms < 1 {
            anyhow::bail!("http_timeout_ms must be >= 1");
        }
        if self.mode.publishes() {
            if self.auth_token.is_empty() {
                anyhow::bail!("auth_token is required when mode is not local");
            }
            if self.discovery_method == DiscoveryMethod::None && self.aggregator_url.is_empty() {
                anyhow::bail!(
                    "aggregator_url is required when mode is not local and discovery is none"
                );
            }
        }
        self.parsed_host_tags()?;
        Ok(())
    }

    /// Effective host identifier: the configured name or the detected one.
    pub fn effective_hostname(&self) -> String {
        if self.hostname.is_empty() {
            hostmon_probes::hostname()
        } else {
            self.hostname.clone()
        }
    }

    /// Parses the `host_tags` comma list into a map.
    pub fn parsed_host_tags(&self) -> Result<BTreeMap<String, String>> {
        let mut tags = BTreeMap::new();
        for part in self.host_tags.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("host_tags entry '{part}' is not key=value"))?;
            tags.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(tags)
    }
}
