use crate::AlertRule;
use anyhow::{Context, Result};
use hostmon_notify::ChannelSettings;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// The `global` section of the alert configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSettings {
    /// Seconds between evaluation passes.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Minimum seconds between successive fire events for the same rule.
    #[serde(default = "default_cooldown")]
    pub cooldown: i64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            cooldown: default_cooldown(),
            enabled: default_enabled(),
        }
    }
}

fn default_check_interval() -> u64 {
    5
}

fn default_cooldown() -> i64 {
    300
}

fn default_enabled() -> bool {
    true
}

/// One rule record as written in the config file. Condition and severity
/// are free-form strings until [`RuleRecord::into_rule`] parses them.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub metric: String,
    pub condition: String,
    pub threshold: f64,
    /// Hold duration in seconds.
    #[serde(default)]
    pub duration: i64,
    pub severity: String,
    #[serde(default)]
    pub notifications: Vec<String>,
    #[serde(default)]
    pub process_name: Option<String>,
}

impl RuleRecord {
    fn into_rule(self, force_process: bool) -> Result<AlertRule> {
        let condition = self
            .condition
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("rule '{}'", self.name))?;
        let severity = self
            .severity
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .with_context(|| format!("rule '{}'", self.name))?;
        if self.duration < 0 {
            anyhow::bail!("rule '{}': duration must be >= 0", self.name);
        }
        let process_name = if force_process {
            Some(self.process_name.unwrap_or_else(|| "*".to_string()))
        } else {
            self.process_name
        };
        Ok(AlertRule {
            name: self.name,
            description: self.description,
            metric: self.metric,
            condition,
            threshold: self.threshold,
            duration_seconds: self.duration,
            severity,
            notifications: self.notifications,
            process_name,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AlertFile {
    #[serde(default)]
    global: GlobalSettings,
    #[serde(default)]
    alerts: Vec<RuleRecord>,
    #[serde(default)]
    process_alerts: Vec<RuleRecord>,
    #[serde(default)]
    notifications: BTreeMap<String, ChannelSettings>,
}

/// Fully parsed and validated alert configuration.
#[derive(Debug, Clone, Default)]
pub struct AlertSettings {
    pub global: GlobalSettings,
    pub rules: Vec<AlertRule>,
    pub channels: BTreeMap<String, ChannelSettings>,
}

impl AlertSettings {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read alert config {path}"))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let file: AlertFile = serde_yaml::from_str(content).context("malformed alert config")?;

        let mut rules = Vec::with_capacity(file.alerts.len() + file.process_alerts.len());
        for record in file.alerts {
            rules.push(record.into_rule(false)?);
        }
        for record in file.process_alerts {
            rules.push(record.into_rule(true)?);
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.name.as_str()) {
                anyhow::bail!("duplicate alert rule name '{}'", rule.name);
            }
        }
        for rule in &rules {
            for channel in &rule.notifications {
                if !file.notifications.contains_key(channel) {
                    anyhow::bail!(
                        "rule '{}' references unknown notification channel '{channel}'",
                        rule.name
                    );
                }
            }
        }

        Ok(Self {
            global: file.global,
            rules,
            channels: file.notifications,
        })
    }
}
