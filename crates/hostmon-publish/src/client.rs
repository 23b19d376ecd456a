//! Read-side client for the aggregator's HTTP API, used by the CLI.
//!
//! Replies are decoded into schema-typed structs; unknown fields are
//! ignored so older agents keep working against newer aggregators.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection-level failure: DNS, refused, timeout. The CLI maps
    /// this to exit code 2.
    #[error("aggregator unreachable: {0}")]
    Unreachable(reqwest::Error),
    #[error("aggregator returned HTTP {0}")]
    Status(u16),
    #[error("malformed aggregator reply: {0}")]
    Decode(reqwest::Error),
}

/// One monitored host as reported by the aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Latest observation per metric name for one host.
pub type LatestMetrics = BTreeMap<String, f64>;

pub struct AggregatorClient {
    base_url: String,
    auth_token: String,
    client: reqwest::blocking::Client,
}

impl AggregatorClient {
    pub fn new(base_url: &str, auth_token: &str, timeout_ms: u64) -> Result<Self, ClientError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(ClientError::Unreachable)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
            client,
        })
    }

    pub fn hosts(&self) -> Result<Vec<HostRecord>, ClientError> {
        self.get_json(&format!("{}/api/hosts", self.base_url))
    }

    pub fn host(&self, hostname: &str) -> Result<HostRecord, ClientError> {
        self.get_json(&format!("{}/api/hosts/{hostname}", self.base_url))
    }

    pub fn latest_metrics(&self, hostname: &str) -> Result<LatestMetrics, ClientError> {
        self.get_json(&format!(
            "{}/api/hosts/{hostname}/metrics/latest",
            self.base_url
        ))
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ClientError> {
        let response = self
            .client
            .get(url)
            .header("X-SysMon-Token", &self.auth_token)
            .send()
            .map_err(ClientError::Unreachable)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        response.json().map_err(ClientError::Decode)
    }
}
