//! Aggregator endpoint discovery.
//!
//! The publisher resolves its endpoint once before the first publish.
//! Static and Consul resolution are implemented; mDNS honors the same
//! contract but ships without a responder backend and resolves to
//! nothing. An empty result is not fatal: the publisher starts anyway
//! and every publish fails fast until discovery is rerun at the next
//! start.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Consul service name registered by the aggregator.
const AGGREGATOR_SERVICE: &str = "sysmon-aggregator";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// Use the configured aggregator URL directly.
    #[default]
    None,
    Mdns,
    Consul,
    /// Explicit URL, same resolution as `None` but named in config.
    Static,
}

impl std::str::FromStr for DiscoveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "mdns" => Ok(Self::Mdns),
            "consul" => Ok(Self::Consul),
            "static" => Ok(Self::Static),
            other => Err(format!("unknown discovery method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub address: String,
    pub port: u16,
    /// `http` or `https`.
    pub protocol: String,
    pub name: String,
}

impl ServiceEndpoint {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.address, self.port)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverySettings {
    pub aggregator_url: String,
    pub consul_addr: String,
    pub consul_service_tag: String,
    pub tls_enabled: bool,
}

/// Resolves aggregator endpoints with a bounded timeout. An empty vector
/// is a valid outcome the caller must tolerate.
pub fn discover(
    method: DiscoveryMethod,
    settings: &DiscoverySettings,
    timeout: Duration,
) -> Result<Vec<ServiceEndpoint>> {
    match method {
        DiscoveryMethod::None | DiscoveryMethod::Static => {
            Ok(parse_static(&settings.aggregator_url).into_iter().collect())
        }
        DiscoveryMethod::Consul => consul_discover(settings, timeout),
        DiscoveryMethod::Mdns => {
            tracing::warn!(
                service = AGGREGATOR_SERVICE,
                "mDNS discovery has no responder backend on this build, resolving to nothing"
            );
            Ok(Vec::new())
        }
    }
}

/// First endpoint, if any. Convenience for the publisher's single-URL use.
pub fn discover_first(
    method: DiscoveryMethod,
    settings: &DiscoverySettings,
    timeout: Duration,
) -> Result<Option<ServiceEndpoint>> {
    Ok(discover(method, settings, timeout)?.into_iter().next())
}

fn parse_static(url: &str) -> Option<ServiceEndpoint> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let (protocol, rest) = url
        .split_once("://")
        .map(|(p, r)| (p.to_string(), r))
        .unwrap_or_else(|| ("http".to_string(), url));
    let rest = rest.trim_end_matches('/');
    let (address, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => match port_str.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (rest.to_string(), default_port(&protocol)),
        },
        None => (rest.to_string(), default_port(&protocol)),
    };
    Some(ServiceEndpoint {
        address,
        port,
        protocol,
        name: AGGREGATOR_SERVICE.to_string(),
    })
}

fn default_port(protocol: &str) -> u16 {
    if protocol == "https" {
        443
    } else {
        80
    }
}

// Consul health API reply, trimmed to the fields the agent reads.
#[derive(Debug, Deserialize)]
struct ConsulEntry {
    #[serde(rename = "Node")]
    node: ConsulNode,
    #[serde(rename = "Service")]
    service: ConsulService,
}

#[derive(Debug, Deserialize)]
struct ConsulNode {
    #[serde(rename = "Address")]
    address: String,
}

#[derive(Debug, Deserialize)]
struct ConsulService {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

fn consul_discover(settings: &DiscoverySettings, timeout: Duration) -> Result<Vec<ServiceEndpoint>> {
    let base = if settings.consul_addr.is_empty() {
        "http://localhost:8500"
    } else {
        settings.consul_addr.as_str()
    };
    let mut url = format!(
        "{}/v1/health/service/{AGGREGATOR_SERVICE}?passing=true",
        base.trim_end_matches('/')
    );
    if !settings.consul_service_tag.is_empty() {
        url.push_str(&format!("&tag={}", settings.consul_service_tag));
    }

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("building Consul client")?;
    let entries: Vec<ConsulEntry> = client
        .get(&url)
        .send()
        .context("querying Consul")?
        .error_for_status()
        .context("Consul returned an error status")?
        .json()
        .context("decoding Consul reply")?;

    let protocol = if settings.tls_enabled { "https" } else { "http" };
    Ok(entries
        .into_iter()
        .map(|entry| {
            let address = if entry.service.address.is_empty() {
                entry.node.address
            } else {
                entry.service.address
            };
            ServiceEndpoint {
                address,
                port: entry.service.port,
                protocol: protocol.to_string(),
                name: AGGREGATOR_SERVICE.to_string(),
            }
        })
        .collect())
}
