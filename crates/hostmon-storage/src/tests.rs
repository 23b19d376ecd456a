use crate::{MetricStore, StorageError, StoreConfig, TieredRetention, MAX_BATCH_POINTS};
use hostmon_common::types::{now_ts, CpuSnapshot, DiskEntry, MemorySnapshot, SamplePoint};
use tempfile::TempDir;

fn open_store(dir: &TempDir, batch_size: usize) -> MetricStore {
    let config = StoreConfig {
        db_path: dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string(),
        enable_wal: true,
        batch_size,
        flush_interval_ms: 3_600_000,
    };
    MetricStore::open(config, "test-host").unwrap()
}

fn memory_snapshot() -> MemorySnapshot {
    MemorySnapshot {
        total_bytes: 16_000_000_000,
        available_bytes: 8_000_000_000,
        used_bytes: 8_000_000_000,
        free_bytes: 4_000_000_000,
        cached_bytes: 3_000_000_000,
        buffers_bytes: 1_000_000_000,
        swap_total_bytes: 2_000_000_000,
        swap_used_bytes: 500_000_000,
        usage_percent: 50.0,
    }
}

fn backdated(ts: i64, metric: &str, value: f64) -> SamplePoint {
    SamplePoint::new(ts, metric, "test-host", "", value)
}

#[test]
fn write_flush_query_round_trips_every_value() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    assert!(store.write_memory(&memory_snapshot()));
    store.flush().unwrap();

    let now = now_ts();
    for (metric, expected) in [
        ("memory.total_bytes", 16_000_000_000.0),
        ("memory.available_bytes", 8_000_000_000.0),
        ("memory.used_bytes", 8_000_000_000.0),
        ("memory.free_bytes", 4_000_000_000.0),
        ("memory.cached_bytes", 3_000_000_000.0),
        ("memory.buffers_bytes", 1_000_000_000.0),
        ("memory.usage_percent", 50.0),
        ("memory.swap_total_bytes", 2_000_000_000.0),
        ("memory.swap_used_bytes", 500_000_000.0),
    ] {
        let rows = store.query_range(metric, now - 60, now + 60, 0).unwrap();
        assert_eq!(rows.len(), 1, "missing {metric}");
        assert_eq!(rows[0].value, expected, "wrong value for {metric}");
        assert_eq!(rows[0].host, "test-host");
    }
}

#[test]
fn cpu_write_decomposes_into_expected_series() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let cpu = CpuSnapshot {
        num_cores: 2,
        per_core_usage: vec![10.0, 30.0],
        total_usage: 20.0,
        load_average_1m: 0.5,
        load_average_5m: 0.4,
        load_average_15m: 0.3,
        context_switches: 1000,
        interrupts: 500,
    };
    assert!(store.write_cpu(&cpu));
    store.flush().unwrap();

    let now = now_ts();
    // 7 aggregate series plus one per core.
    for metric in [
        "cpu.total_usage",
        "cpu.num_cores",
        "cpu.load_avg_1m",
        "cpu.load_avg_5m",
        "cpu.load_avg_15m",
        "cpu.context_switches",
        "cpu.interrupts",
    ] {
        assert_eq!(
            store.query_range(metric, now - 60, now + 60, 0).unwrap().len(),
            1,
            "missing {metric}"
        );
    }
    let cores = store
        .query_range("cpu.core_usage", now - 60, now + 60, 0)
        .unwrap();
    assert_eq!(cores.len(), 2);
    assert!(cores.iter().any(|p| p.tags == r#"{"core":"0"}"#));
    assert!(cores.iter().any(|p| p.tags == r#"{"core":"1"}"#));
}

#[test]
fn unflushed_points_are_invisible_to_readers() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    store.write_memory(&memory_snapshot());
    let now = now_ts();
    assert!(store
        .query_range("memory.total_bytes", now - 60, now + 60, 0)
        .unwrap()
        .is_empty());

    store.flush().unwrap();
    assert_eq!(
        store
            .query_range("memory.total_bytes", now - 60, now + 60, 0)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn query_returns_newest_first_and_honors_limit() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let base = now_ts() - 1000;
    let points: Vec<SamplePoint> = (0..10)
        .map(|i| backdated(base + i, "cpu.total_usage", i as f64))
        .collect();
    assert!(store.write_points(points));
    store.flush().unwrap();

    let rows = store
        .query_range("cpu.total_usage", base, base + 100, 3)
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].timestamp, base + 9);
    assert_eq!(rows[1].timestamp, base + 8);
    assert_eq!(rows[2].timestamp, base + 7);

    // limit 0 means unlimited
    let all = store
        .query_range("cpu.total_usage", base, base + 100, 0)
        .unwrap();
    assert_eq!(all.len(), 10);
}

#[test]
fn second_write_with_same_identity_replaces_the_first() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let ts = now_ts() - 100;
    assert!(store.write_points(vec![backdated(ts, "cpu.total_usage", 10.0)]));
    store.flush().unwrap();
    assert!(store.write_points(vec![backdated(ts, "cpu.total_usage", 99.0)]));
    store.flush().unwrap();

    let rows = store.query_range("cpu.total_usage", ts, ts, 0).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, 99.0);
}

#[test]
fn flush_on_empty_batch_is_a_successful_no_op() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);
    store.flush().unwrap();
    store.flush().unwrap();
    assert_eq!(store.pending_points(), 0);
}

#[test]
fn batch_size_trigger_flushes_automatically() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 5);

    // 9 points in one write: crosses batch_size, flushes everything.
    assert!(store.write_memory(&memory_snapshot()));
    assert_eq!(store.pending_points(), 0);

    let now = now_ts();
    assert_eq!(
        store
            .query_range("memory.usage_percent", now - 60, now + 60, 0)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn oversized_write_fails_without_mutating_the_batch() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let disks: Vec<DiskEntry> = (0..1300)
        .map(|i| DiskEntry {
            device_name: format!("/dev/sd{i}"),
            mount_point: format!("/mnt/{i}"),
            total_bytes: 100,
            used_bytes: 50,
            free_bytes: 50,
            usage_percent: 50.0,
            ..DiskEntry::default()
        })
        .collect();

    // 1300 disks * 8 points = 10_400 > cap.
    assert!(!store.write_disks(&disks));
    assert_eq!(store.pending_points(), 0);
    assert_eq!(store.stats().points_dropped, 10_400);
}

#[test]
fn batch_never_exceeds_hard_cap() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let base = now_ts() - 50_000;
    let near_cap: Vec<SamplePoint> = (0..(MAX_BATCH_POINTS as i64 - 4))
        .map(|i| backdated(base + i, "x.fill", 0.0))
        .collect();
    assert!(store.write_points(near_cap));

    // 9 more points would cross the cap: refused, batch untouched.
    assert!(!store.write_memory(&memory_snapshot()));
    assert_eq!(store.pending_points(), MAX_BATCH_POINTS - 4);

    // A small write that still fits is accepted.
    assert!(store.write_points(vec![backdated(base - 1, "x.fill", 1.0)]));
    assert!(store.pending_points() <= MAX_BATCH_POINTS);
}

#[test]
fn retention_deletes_only_points_older_than_the_window() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let now = now_ts();
    let old = now - 10 * 86_400;
    let old_points: Vec<SamplePoint> = (0..1000)
        .map(|i| backdated(old + i, "cpu.total_usage", 1.0))
        .collect();
    let new_points: Vec<SamplePoint> = (0..1000)
        .map(|i| backdated(now - i, "cpu.total_usage", 2.0))
        .collect();
    assert!(store.write_points(old_points));
    assert!(store.write_points(new_points));
    store.flush().unwrap();

    let deleted = store.apply_retention(7).unwrap();
    assert_eq!(deleted, 1000);

    let remaining = store
        .query_range("cpu.total_usage", now - 20 * 86_400, now, 0)
        .unwrap();
    assert_eq!(remaining.len(), 1000);
    assert!(remaining.iter().all(|p| p.value == 2.0));
}

#[test]
fn retention_zero_days_deletes_everything_older_than_now() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let now = now_ts();
    assert!(store.write_points(vec![
        backdated(now - 10, "cpu.total_usage", 1.0),
        backdated(now - 1, "cpu.total_usage", 1.0),
    ]));
    store.flush().unwrap();

    let deleted = store.apply_retention(0).unwrap();
    assert_eq!(deleted, 2);
}

#[test]
fn refuses_to_open_a_newer_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db").to_string_lossy().to_string();
    let config = StoreConfig {
        db_path: path.clone(),
        ..StoreConfig::default()
    };
    drop(MetricStore::open(config.clone(), "test-host").unwrap());

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (99, 0)",
        [],
    )
    .unwrap();
    drop(conn);

    match MetricStore::open(config, "test-host") {
        Err(StorageError::SchemaTooNew { found, .. }) => assert_eq!(found, 99),
        other => panic!("expected SchemaTooNew, got {other:?}"),
    }
}

#[test]
fn open_fails_on_unusable_path() {
    let config = StoreConfig {
        db_path: "/nonexistent-dir/sub/metrics.db".to_string(),
        ..StoreConfig::default()
    };
    assert!(matches!(
        MetricStore::open(config, "test-host"),
        Err(StorageError::Open { .. })
    ));
}

#[test]
fn minute_rollup_averages_complete_buckets_only() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let bucket = ((now_ts() - 600) / 60) * 60;
    assert!(store.write_points(vec![
        backdated(bucket, "cpu.total_usage", 10.0),
        backdated(bucket + 20, "cpu.total_usage", 20.0),
        backdated(bucket + 40, "cpu.total_usage", 30.0),
    ]));
    store.flush().unwrap();

    let rolled = store.rollup_minutes(now_ts()).unwrap();
    assert!(rolled >= 1);

    let avg: f64 = store
        .with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM metrics_1m WHERE metric_name = 'cpu.total_usage' AND timestamp = ?1",
                    [bucket],
                    |row| row.get(0),
                )
                .unwrap())
        })
        .unwrap();
    assert!((avg - 20.0).abs() < 1e-9);
}

#[test]
fn rollup_never_reads_the_current_bucket() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    // A point in a bucket that has not closed yet (the one after the
    // current bucket, so the assertion cannot race a minute boundary).
    let open_bucket = (now_ts() / 60) * 60 + 60;
    assert!(store.write_points(vec![backdated(open_bucket, "cpu.total_usage", 42.0)]));
    store.flush().unwrap();

    // A cutoff in the future still must not touch the open bucket.
    store.rollup_minutes(open_bucket + 3600).unwrap();
    let rows: u64 = store
        .with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT COUNT(*) FROM metrics_1m WHERE timestamp = ?1",
                    [open_bucket],
                    |row| row.get::<_, i64>(0),
                )
                .unwrap() as u64)
        })
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn hour_rollup_reads_the_minute_tier() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    let hour = ((now_ts() - 7200) / 3600) * 3600;
    assert!(store.write_points(vec![
        backdated(hour + 60, "memory.usage_percent", 40.0),
        backdated(hour + 120, "memory.usage_percent", 60.0),
    ]));
    store.flush().unwrap();

    store.rollup_minutes(now_ts()).unwrap();
    let rolled = store.rollup_hours(now_ts()).unwrap();
    assert!(rolled >= 1);

    let avg: f64 = store
        .with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM metrics_1h WHERE metric_name = 'memory.usage_percent' AND timestamp = ?1",
                    [hour],
                    |row| row.get(0),
                )
                .unwrap())
        })
        .unwrap();
    assert!((avg - 50.0).abs() < 1e-9);
}

#[test]
fn tiered_retention_rejects_non_increasing_windows() {
    let bad = TieredRetention {
        raw_hours: 24 * 40,
        minute_days: 30,
        hour_days: 365,
    };
    assert!(bad.validate().is_err());
    assert!(TieredRetention::default().validate().is_ok());
}

#[test]
fn tiered_sweep_prunes_raw_after_rolling_up() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);

    // Two hours old: inside the minute-rollup lookback, outside a
    // 1-hour raw window.
    let old = now_ts() - 7200;
    assert!(store.write_points(vec![
        backdated(old, "cpu.total_usage", 10.0),
        backdated(old + 10, "cpu.total_usage", 30.0),
    ]));
    store.flush().unwrap();

    let tiers = TieredRetention {
        raw_hours: 1,
        minute_days: 30,
        hour_days: 365,
    };
    let sweep = store.apply_tiered_retention(tiers).unwrap();
    assert_eq!(sweep.pruned_raw, 2);
    assert!(sweep.rolled_1m >= 1);
    assert_eq!(store.tier_row_count("metrics").unwrap(), 0);
    assert!(store.tier_row_count("metrics_1m").unwrap() >= 1);
}

#[test]
fn schema_version_reports_current_code_version() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 100_000);
    assert_eq!(store.schema_version().unwrap(), 2);
}
