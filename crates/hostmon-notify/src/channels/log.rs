use crate::NotificationChannel;
use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use hostmon_common::types::AlertEvent;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Appends one line per alert to a local file. When the file grows past
/// `max_size_mb` it is truncated and writing continues; alert logs are a
/// convenience surface, not an audit trail.
#[derive(Debug)]
pub struct LogChannel {
    path: PathBuf,
    max_size_bytes: u64,
    lock: Mutex<()>,
}

impl LogChannel {
    pub fn new(path: &str, max_size_mb: u64) -> Self {
        Self {
            path: PathBuf::from(path),
            max_size_bytes: max_size_mb * 1024 * 1024,
            lock: Mutex::new(()),
        }
    }

    fn format_line(event: &AlertEvent) -> String {
        let when = Utc
            .timestamp_opt(event.timestamp, 0)
            .single()
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d %H:%M:%S");
        format!(
            "{when} [{}] {} - {}\n",
            event.severity, event.hostname, event.message
        )
    }
}

impl NotificationChannel for LogChannel {
    fn send(&self, event: &AlertEvent) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let oversized = std::fs::metadata(&self.path)
            .map(|m| m.len() >= self.max_size_bytes)
            .unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(!oversized)
            .truncate(oversized)
            .write(true)
            .open(&self.path)
            .with_context(|| format!("cannot open alert log {}", self.path.display()))?;

        file.write_all(Self::format_line(event).as_bytes())
            .context("cannot append to alert log")?;
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "log"
    }
}
