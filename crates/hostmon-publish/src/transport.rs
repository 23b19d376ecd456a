use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no aggregator endpoint resolved")]
    NoEndpoint,
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("aggregator returned HTTP {0}")]
    Status(u16),
}

/// Blocking transport seam. The worker only cares about "did a 2xx come
/// back"; tests substitute failing or recording implementations.
pub trait MetricTransport: Send + Sync {
    /// Posts the serialized envelope. Returns the HTTP status code on a
    /// completed exchange, an error when the exchange itself failed.
    fn post_metrics(&self, endpoint: &str, token: &str, body: String)
        -> Result<u16, TransportError>;
}

/// The JSON envelope posted to `{aggregator_url}/api/metrics`.
#[derive(Debug, Serialize)]
pub struct MetricsEnvelope<'a> {
    pub hostname: &'a str,
    pub version: &'a str,
    pub platform: &'a str,
    pub tags: &'a BTreeMap<String, String>,
    pub metrics: Vec<EnvelopeMetric<'a>>,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeMetric<'a> {
    pub timestamp: i64,
    pub metric_type: &'a str,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<&'a str>,
}

/// Real transport over `reqwest::blocking`. Connect, send, and receive
/// all share the one configured timeout.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, tls_verify_peer: bool) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_millis(timeout_ms))
            .danger_accept_invalid_certs(!tls_verify_peer)
            .build()?;
        Ok(Self { client })
    }
}

impl MetricTransport for HttpTransport {
    fn post_metrics(
        &self,
        endpoint: &str,
        token: &str,
        body: String,
    ) -> Result<u16, TransportError> {
        let url = format!("{}/api/metrics", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-SysMon-Token", token)
            .body(body)
            .send()?;
        Ok(response.status().as_u16())
    }
}
