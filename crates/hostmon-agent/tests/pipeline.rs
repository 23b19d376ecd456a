//! End-to-end pipeline: scheduler -> fan-out -> store / evaluator.

use anyhow::Result;
use hostmon_agent::fanout::MetricFanout;
use hostmon_agent::scheduler::CollectionScheduler;
use hostmon_alert::config::{AlertSettings, GlobalSettings};
use hostmon_alert::AlertManager;
use hostmon_common::types::{
    now_ts, CpuSnapshot, DiskEntry, MemorySnapshot, NetworkEntry, ProcessEntry,
};
use hostmon_probes::Probes;
use hostmon_storage::{MetricStore, StoreConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct FakeProbes {
    fail_cpu: bool,
}

impl Probes for FakeProbes {
    fn cpu(&mut self) -> Result<CpuSnapshot> {
        if self.fail_cpu {
            anyhow::bail!("cpu probe offline");
        }
        Ok(CpuSnapshot {
            num_cores: 2,
            per_core_usage: vec![10.0, 20.0],
            total_usage: 15.0,
            load_average_1m: 0.2,
            load_average_5m: 0.3,
            load_average_15m: 0.4,
            context_switches: 12345,
            interrupts: 6789,
        })
    }

    fn memory(&mut self) -> Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            total_bytes: 8_000_000_000,
            available_bytes: 4_000_000_000,
            used_bytes: 4_000_000_000,
            free_bytes: 2_000_000_000,
            cached_bytes: 1_000_000_000,
            buffers_bytes: 500_000_000,
            swap_total_bytes: 1_000_000_000,
            swap_used_bytes: 0,
            usage_percent: 50.0,
        })
    }

    fn disks(&mut self) -> Result<Vec<DiskEntry>> {
        Ok(vec![DiskEntry {
            device_name: "/dev/sda1".to_string(),
            mount_point: "/".to_string(),
            total_bytes: 100_000_000_000,
            used_bytes: 30_000_000_000,
            free_bytes: 70_000_000_000,
            usage_percent: 30.0,
            ..DiskEntry::default()
        }])
    }

    fn networks(&mut self) -> Result<Vec<NetworkEntry>> {
        Ok(vec![NetworkEntry {
            interface_name: "eth0".to_string(),
            bytes_sent: 1000,
            bytes_recv: 2000,
            is_up: true,
            ..NetworkEntry::default()
        }])
    }

    fn processes(&mut self) -> Result<Vec<ProcessEntry>> {
        Ok(vec![ProcessEntry {
            pid: 42,
            name: "fakeproc".to_string(),
            cpu_percent: 3.0,
            memory_bytes: 1_000_000,
            num_threads: 4,
            ..ProcessEntry::default()
        }])
    }
}

fn temp_store(dir: &TempDir) -> Arc<MetricStore> {
    let config = StoreConfig {
        db_path: dir.path().join("agent.db").to_string_lossy().to_string(),
        enable_wal: true,
        batch_size: 100,
        flush_interval_ms: 3_600_000,
    };
    Arc::new(MetricStore::open(config, "it-host").unwrap())
}

fn idle_alerts() -> Arc<AlertManager> {
    let settings = AlertSettings {
        global: GlobalSettings::default(),
        rules: Vec::new(),
        channels: Default::default(),
    };
    Arc::new(AlertManager::new(settings, "it-host").unwrap())
}

fn wait_for_ticks(scheduler: &CollectionScheduler, ticks: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while scheduler.ticks() < ticks {
        assert!(Instant::now() < deadline, "scheduler never ticked");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn cold_start_single_tick_persists_cpu_and_memory_series() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let alerts = idle_alerts();

    let fanout = MetricFanout::new(Some(Arc::clone(&store)), Arc::clone(&alerts), None);
    let scheduler = Arc::new(CollectionScheduler::new(
        Box::new(FakeProbes { fail_cpu: false }),
        fanout,
        100,
    ));

    Arc::clone(&scheduler).start();
    wait_for_ticks(&scheduler, 1);
    scheduler.stop();
    store.flush().unwrap();

    let now = now_ts();
    let cpu_series = [
        "cpu.total_usage",
        "cpu.num_cores",
        "cpu.load_avg_1m",
        "cpu.load_avg_5m",
        "cpu.load_avg_15m",
        "cpu.context_switches",
        "cpu.interrupts",
    ];
    for metric in cpu_series {
        assert!(
            !store.query_range(metric, now - 60, now + 60, 0).unwrap().is_empty(),
            "missing {metric}"
        );
    }
    let memory_series = [
        "memory.total_bytes",
        "memory.available_bytes",
        "memory.used_bytes",
        "memory.free_bytes",
        "memory.cached_bytes",
        "memory.buffers_bytes",
        "memory.usage_percent",
        "memory.swap_total_bytes",
        "memory.swap_used_bytes",
    ];
    for metric in memory_series {
        assert!(
            !store.query_range(metric, now - 60, now + 60, 0).unwrap().is_empty(),
            "missing {metric}"
        );
    }

    // Empty ruleset: nothing fired, nothing is breaching.
    assert!(alerts.active_alerts().is_empty());
    assert!(alerts.states().is_empty());
}

#[test]
fn failing_probe_does_not_stop_the_tick() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let alerts = idle_alerts();

    let fanout = MetricFanout::new(Some(Arc::clone(&store)), alerts, None);
    let scheduler = Arc::new(CollectionScheduler::new(
        Box::new(FakeProbes { fail_cpu: true }),
        fanout,
        100,
    ));

    Arc::clone(&scheduler).start();
    wait_for_ticks(&scheduler, 2);
    scheduler.stop();
    store.flush().unwrap();

    let now = now_ts();
    // CPU series are absent, everything else still landed.
    assert!(store
        .query_range("cpu.total_usage", now - 60, now + 60, 0)
        .unwrap()
        .is_empty());
    assert!(!store
        .query_range("memory.usage_percent", now - 60, now + 60, 0)
        .unwrap()
        .is_empty());
    assert!(!store
        .query_range("disk.usage_percent", now - 60, now + 60, 0)
        .unwrap()
        .is_empty());
}

#[test]
fn scheduler_start_and_stop_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let alerts = idle_alerts();

    let fanout = MetricFanout::new(Some(store), alerts, None);
    let scheduler = Arc::new(CollectionScheduler::new(
        Box::new(FakeProbes { fail_cpu: false }),
        fanout,
        100,
    ));

    Arc::clone(&scheduler).start();
    Arc::clone(&scheduler).start();
    assert!(scheduler.is_running());
    wait_for_ticks(&scheduler, 1);
    scheduler.stop();
    assert!(!scheduler.is_running());
    scheduler.stop();

    // A fresh start resumes ticking.
    let before = scheduler.ticks();
    Arc::clone(&scheduler).start();
    wait_for_ticks(&scheduler, before + 1);
    scheduler.stop();
}

#[test]
fn tick_observations_reach_the_alert_evaluator() {
    use hostmon_common::types::{AlertCondition, Severity};

    let settings = AlertSettings {
        global: GlobalSettings {
            check_interval: 1,
            cooldown: 300,
            enabled: true,
        },
        rules: vec![hostmon_alert::AlertRule {
            name: "mem_half".to_string(),
            description: String::new(),
            metric: "memory.usage_percent".to_string(),
            condition: AlertCondition::Above,
            threshold: 40.0,
            duration_seconds: 0,
            severity: Severity::Info,
            notifications: Vec::new(),
            process_name: None,
        }],
        channels: Default::default(),
    };
    let alerts = Arc::new(AlertManager::new(settings, "it-host").unwrap());

    let fanout = MetricFanout::new(None, Arc::clone(&alerts), None);
    let scheduler = Arc::new(CollectionScheduler::new(
        Box::new(FakeProbes { fail_cpu: false }),
        fanout,
        100,
    ));
    Arc::clone(&scheduler).start();
    wait_for_ticks(&scheduler, 1);
    scheduler.stop();

    // The fake memory snapshot reports 50% which breaches the rule on
    // the first evaluation.
    alerts.evaluate_at(now_ts());
    assert_eq!(alerts.active_alerts().len(), 1);
}
