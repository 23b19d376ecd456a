//! Notification delivery channels.
//!
//! Alert events are routed to one or more [`NotificationChannel`]
//! implementations named in the firing rule. Built-in channels: a local
//! log file, an HTTP webhook, and email over SMTP. Channels are a closed
//! set constructed from the alert configuration. Delivery failures are
//! reported to the caller, which logs them and moves on; the evaluator
//! never retries a sink.

pub mod channels;


use anyhow::Result;
use hostmon_common::types::AlertEvent;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A delivery target for fired alerts.
///
/// `send` blocks for at most the channel's configured timeout. The
/// implementation must be safe to call from the evaluation worker while
/// no evaluator lock is held.
pub trait NotificationChannel: Send + Sync + std::fmt::Debug {
    fn send(&self, event: &AlertEvent) -> Result<()>;

    /// Channel type name: `"log"`, `"webhook"`, or `"email"`.
    fn channel_type(&self) -> &str;
}

/// One channel definition from the alert configuration's
/// `notifications` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Channel-specific keys (url, smtp_host, path, ...).
    #[serde(flatten)]
    pub config: BTreeMap<String, serde_json::Value>,
}

fn default_enabled() -> bool {
    true
}

impl ChannelSettings {
    fn get_str(&self, key: &str) -> Option<String> {
        self.config
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn get_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(serde_json::Value::as_u64)
    }

    fn require_str(&self, key: &str) -> Result<String> {
        self.get_str(key)
            .ok_or_else(|| anyhow::anyhow!("channel '{}' missing key '{key}'", self.channel_type))
    }
}

/// Builds a channel from its configuration. Unknown types are a
/// configuration error, fatal at startup.
pub fn build_channel(name: &str, settings: &ChannelSettings) -> Result<Box<dyn NotificationChannel>> {
    match settings.channel_type.as_str() {
        "log" => Ok(Box::new(channels::log::LogChannel::new(
            &settings
                .get_str("path")
                .unwrap_or_else(|| "hostmon-alerts.log".to_string()),
            settings.get_u64("max_size_mb").unwrap_or(10),
        ))),
        "webhook" => {
            let url = settings.require_str("url")?;
            let timeout = settings.get_u64("timeout_seconds").unwrap_or(5);
            let headers: BTreeMap<String, String> = settings
                .config
                .get("headers")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            Ok(Box::new(channels::webhook::WebhookChannel::new(
                &url, headers, timeout,
            )?))
        }
        "email" => {
            let host = settings.require_str("smtp_host")?;
            let port = settings.get_u64("smtp_port").unwrap_or(25) as u16;
            let recipients: Vec<String> = settings
                .config
                .get("to")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            if recipients.is_empty() {
                anyhow::bail!("email channel '{name}' has no recipients");
            }
            Ok(Box::new(channels::email::EmailChannel::new(
                &host,
                port,
                settings.get_str("username").as_deref(),
                settings.get_str("password").as_deref(),
                &settings.require_str("from")?,
                recipients,
            )?))
        }
        other => anyhow::bail!("unknown notification channel type '{other}' for '{name}'"),
    }
}
