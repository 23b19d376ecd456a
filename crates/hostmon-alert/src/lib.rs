//! Threshold alerting over live metric observations.
//!
//! The [`manager::AlertManager`] owns one [`state::AlertInstance`] per
//! configured rule for the lifetime of the process. Observations flow in
//! from the collection scheduler; a dedicated evaluation worker compares
//! the latest values against every rule on a fixed check interval and
//! dispatches fired events to the notification channels the rule names.
//! Alert state is not persisted: a restart resets every rule to normal.

pub mod config;
pub mod manager;
pub mod state;


use hostmon_common::types::{AlertCondition, Severity};

pub use config::{AlertSettings, GlobalSettings};
pub use manager::AlertManager;
pub use state::{AlertInstance, AlertState};

/// A loaded threshold rule. `process_name` is set for rules scoped to a
/// single process (`"*"` means the busiest process).
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    /// The comparator must hold for this long before the rule fires.
    pub duration_seconds: i64,
    pub severity: Severity,
    pub notifications: Vec<String>,
    pub process_name: Option<String>,
}
