use crate::NotificationChannel;
use anyhow::Result;
use chrono::{TimeZone, Utc};
use hostmon_common::types::AlertEvent;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// JSON body shape posted to the webhook target.
#[derive(Serialize)]
struct WebhookPayload<'a> {
    alert_name: &'a str,
    metric: &'a str,
    current_value: f64,
    threshold: f64,
    condition: String,
    severity: String,
    hostname: &'a str,
    timestamp: String,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    process_name: Option<&'a str>,
}

#[derive(Debug)]
pub struct WebhookChannel {
    url: String,
    headers: BTreeMap<String, String>,
    client: reqwest::blocking::Client,
}

impl WebhookChannel {
    pub fn new(url: &str, headers: BTreeMap<String, String>, timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            headers,
            client,
        })
    }
}

impl NotificationChannel for WebhookChannel {
    fn send(&self, event: &AlertEvent) -> Result<()> {
        let timestamp = Utc
            .timestamp_opt(event.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let payload = WebhookPayload {
            alert_name: &event.alert_name,
            metric: &event.metric,
            current_value: event.current_value,
            threshold: event.threshold,
            condition: event.condition.to_string(),
            severity: event.severity.to_string(),
            hostname: &event.hostname,
            timestamp,
            message: &event.message,
            process_name: event.process_name.as_deref(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send()?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned HTTP {}", response.status());
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }
}
