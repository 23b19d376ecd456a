use crate::config::AlertSettings;
use crate::state::{step, AlertInstance, AlertState};
use crate::AlertRule;
use anyhow::Result;
use hostmon_common::types::{now_ts, AlertEvent, CpuSnapshot, MemorySnapshot, ProcessEntry};
use hostmon_notify::{build_channel, NotificationChannel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Key into the latest-values map. Process-scoped rules observe values
/// under `metric|process_name` so two rules on the same metric but
/// different processes never collide.
fn observation_key(rule: &AlertRule) -> String {
    match &rule.process_name {
        Some(name) => format!("{}|{}", rule.metric, name),
        None => rule.metric.clone(),
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    value: f64,
    pid: Option<u32>,
}

struct EvaluatorState {
    instances: HashMap<String, AlertInstance>,
    last_event: HashMap<String, AlertEvent>,
}

/// Owns the rule set, per-rule state machines, and notification sinks.
/// Shared by the daemon, the fan-out, and the CLI behind an `Arc`.
pub struct AlertManager {
    settings: AlertSettings,
    hostname: String,
    channels: HashMap<String, Box<dyn NotificationChannel>>,
    /// Latest observed value per key; written under a short lock, copied
    /// out before evaluation so dispatch never holds it.
    latest: Mutex<HashMap<String, Observation>>,
    evaluator: Mutex<EvaluatorState>,
    running: AtomicBool,
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AlertManager {
    /// Builds the manager and constructs every enabled channel named in
    /// the configuration. Channel construction errors are fatal.
    pub fn new(settings: AlertSettings, hostname: &str) -> Result<Self> {
        let mut channels: HashMap<String, Box<dyn NotificationChannel>> = HashMap::new();
        for (name, channel_settings) in &settings.channels {
            if !channel_settings.enabled {
                tracing::debug!(channel = %name, "notification channel disabled, skipping");
                continue;
            }
            let channel = build_channel(name, channel_settings)?;
            tracing::info!(channel = %name, channel_type = channel.channel_type(), "registered notification channel");
            channels.insert(name.clone(), channel);
        }

        Ok(Self {
            settings,
            hostname: hostname.to_string(),
            channels,
            latest: Mutex::new(HashMap::new()),
            evaluator: Mutex::new(EvaluatorState {
                instances: HashMap::new(),
                last_event: HashMap::new(),
            }),
            running: AtomicBool::new(false),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        })
    }

    /// Replaces or adds a sink under the given name. Used by tests and by
    /// callers wiring custom sinks.
    pub fn register_channel(&mut self, name: &str, channel: Box<dyn NotificationChannel>) {
        self.channels.insert(name.to_string(), channel);
    }

    // ---- observation intake ---------------------------------------------

    pub fn observe(&self, metric: &str, value: f64) {
        let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        latest.insert(metric.to_string(), Observation { value, pid: None });
    }

    pub fn observe_cpu(&self, cpu: &CpuSnapshot) {
        self.observe("cpu.total_usage", cpu.total_usage);
        self.observe("cpu.load_avg_1m", cpu.load_average_1m);
        self.observe("cpu.load_avg_5m", cpu.load_average_5m);
        self.observe("cpu.load_avg_15m", cpu.load_average_15m);
    }

    pub fn observe_memory(&self, mem: &MemorySnapshot) {
        self.observe("memory.total_bytes", mem.total_bytes as f64);
        self.observe("memory.available_bytes", mem.available_bytes as f64);
        self.observe("memory.used_bytes", mem.used_bytes as f64);
        self.observe("memory.usage_percent", mem.usage_percent);
        self.observe("memory.swap_used_bytes", mem.swap_used_bytes as f64);
    }

    /// Records per-process observations for every process-scoped rule.
    /// `"*"` rules track whichever matching process is busiest.
    pub fn observe_processes(&self, processes: &[ProcessEntry]) {
        let keys: Vec<(String, String, String)> = self
            .settings
            .rules
            .iter()
            .filter_map(|rule| {
                rule.process_name.as_ref().map(|proc_name| {
                    (observation_key(rule), rule.metric.clone(), proc_name.clone())
                })
            })
            .collect();
        if keys.is_empty() {
            return;
        }

        let mut latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
        for (key, metric, proc_name) in keys {
            let candidates = processes
                .iter()
                .filter(|p| proc_name == "*" || p.name == proc_name);
            let best = candidates.max_by(|a, b| {
                metric_of(a, &metric)
                    .partial_cmp(&metric_of(b, &metric))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(proc_) = best {
                latest.insert(
                    key,
                    Observation {
                        value: metric_of(proc_, &metric),
                        pid: Some(proc_.pid),
                    },
                );
            }
        }
    }

    // ---- evaluation -------------------------------------------------------

    /// One evaluation pass at the given wall-clock second. The worker
    /// calls this on the check interval; tests call it directly with
    /// synthetic timestamps.
    pub fn evaluate_at(&self, now: i64) {
        let snapshot: HashMap<String, Observation> = {
            let latest = self.latest.lock().unwrap_or_else(|p| p.into_inner());
            latest.clone()
        };

        let mut fired = Vec::new();
        {
            let mut eval = self.evaluator.lock().unwrap_or_else(|p| p.into_inner());
            for rule in &self.settings.rules {
                let Some(observation) = snapshot.get(&observation_key(rule)) else {
                    continue;
                };
                let instance = eval
                    .instances
                    .entry(rule.name.clone())
                    .or_default();
                if step(
                    rule,
                    instance,
                    observation.value,
                    now,
                    self.settings.global.cooldown,
                ) {
                    let event = build_event(rule, observation, now, &self.hostname);
                    eval.last_event.insert(rule.name.clone(), event.clone());
                    fired.push((rule.clone(), event));
                }
            }
        }

        // Dispatch with no lock held.
        for (rule, event) in fired {
            tracing::warn!(rule = %rule.name, value = event.current_value, "alert fired: {}", event.message);
            self.dispatch(&rule, &event);
        }
    }

    fn dispatch(&self, rule: &AlertRule, event: &AlertEvent) {
        for channel_name in &rule.notifications {
            match self.channels.get(channel_name) {
                Some(channel) => {
                    if let Err(e) = channel.send(event) {
                        tracing::error!(
                            channel = %channel_name,
                            rule = %rule.name,
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                }
                None => {
                    tracing::warn!(channel = %channel_name, rule = %rule.name, "rule names unregistered channel");
                }
            }
        }
    }

    // ---- lifecycle --------------------------------------------------------

    /// Launches the evaluation worker. A no-op when already running or
    /// when the configuration disables alerting globally.
    pub fn start(self: Arc<Self>) {
        if !self.settings.global.enabled {
            tracing::info!("alerting disabled by configuration");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stop.0.lock().unwrap_or_else(|p| p.into_inner()) = false;

        let manager = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("alert-evaluator".to_string())
            .spawn(move || manager.run_loop())
            .expect("spawning evaluator thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        tracing::info!(
            check_interval = self.settings.global.check_interval,
            cooldown = self.settings.global.cooldown,
            "alert evaluator started"
        );
    }

    fn run_loop(&self) {
        let interval = Duration::from_secs(self.settings.global.check_interval.max(1));
        let (lock, cvar) = &*self.stop;
        loop {
            self.evaluate_at(now_ts());

            let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            let (guard, _) = cvar
                .wait_timeout_while(guard, interval, |stopped| !*stopped)
                .unwrap_or_else(|p| p.into_inner());
            if *guard {
                break;
            }
        }
    }

    /// Signals the worker, joins it, and discards pending observations.
    /// Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            let (lock, cvar) = &*self.stop;
            *lock.lock().unwrap_or_else(|p| p.into_inner()) = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
        self.latest
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        tracing::info!("alert evaluator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- introspection ----------------------------------------------------

    /// Current state per rule name.
    pub fn states(&self) -> HashMap<String, AlertState> {
        let eval = self.evaluator.lock().unwrap_or_else(|p| p.into_inner());
        eval.instances
            .iter()
            .map(|(name, instance)| (name.clone(), instance.state))
            .collect()
    }

    /// The last fired event for every rule currently in `Firing`.
    pub fn active_alerts(&self) -> Vec<AlertEvent> {
        let eval = self.evaluator.lock().unwrap_or_else(|p| p.into_inner());
        eval.instances
            .iter()
            .filter(|(_, instance)| instance.state == AlertState::Firing)
            .filter_map(|(name, _)| eval.last_event.get(name).cloned())
            .collect()
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.settings.rules
    }
}

fn metric_of(proc_: &ProcessEntry, metric: &str) -> f64 {
    match metric {
        "process.cpu_percent" => proc_.cpu_percent,
        "process.memory_bytes" => proc_.memory_bytes as f64,
        "process.num_threads" => f64::from(proc_.num_threads),
        "process.open_files" => f64::from(proc_.open_files),
        _ => 0.0,
    }
}

fn build_event(rule: &AlertRule, observation: &Observation, now: i64, hostname: &str) -> AlertEvent {
    let message = format!(
        "[{}] {}: {} - current value: {:.2}, threshold: {} {:.2}",
        rule.severity,
        rule.name,
        if rule.description.is_empty() {
            &rule.metric
        } else {
            &rule.description
        },
        observation.value,
        rule.condition,
        rule.threshold,
    );
    AlertEvent {
        alert_name: rule.name.clone(),
        metric: rule.metric.clone(),
        current_value: observation.value,
        threshold: rule.threshold,
        condition: rule.condition,
        severity: rule.severity,
        timestamp: now,
        message,
        hostname: hostname.to_string(),
        process_name: rule.process_name.clone(),
        process_id: observation.pid,
    }
}
