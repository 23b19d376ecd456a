use crate::error::{Result, StorageError};
use crate::{MAX_BATCH_POINTS, MAX_PERSISTED_PROCESSES};
use chrono::Utc;
use hostmon_common::tags;
use hostmon_common::types::{
    now_ts, CpuSnapshot, DiskEntry, MemorySnapshot, NetworkEntry, ProcessEntry, SamplePoint,
};
use rusqlite::{Connection, ErrorCode, OpenFlags};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Highest schema version this build understands.
const SCHEMA_VERSION: i64 = 2;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
    timestamp INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    host TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    value REAL NOT NULL,
    PRIMARY KEY (timestamp, metric_name, host, tags)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_metrics_name_time ON metrics(metric_name, timestamp);
CREATE INDEX IF NOT EXISTS idx_metrics_time ON metrics(timestamp);
";

const SCHEMA_V2: &str = "
CREATE TABLE IF NOT EXISTS metrics_1m (
    timestamp INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    host TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    value REAL NOT NULL,
    PRIMARY KEY (timestamp, metric_name, host, tags)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_1m_name_time ON metrics_1m(metric_name, timestamp);

CREATE TABLE IF NOT EXISTS metrics_1h (
    timestamp INTEGER NOT NULL,
    metric_name TEXT NOT NULL,
    host TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    value REAL NOT NULL,
    PRIMARY KEY (timestamp, metric_name, host, tags)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_1h_name_time ON metrics_1h(metric_name, timestamp);
";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: String,
    pub enable_wal: bool,
    /// Flush once the batch holds this many points.
    pub batch_size: usize,
    /// Flush once this much time has passed since the last flush.
    pub flush_interval_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "hostmon.db".to_string(),
            enable_wal: true,
            batch_size: 100,
            flush_interval_ms: 5000,
        }
    }
}

/// Write-side counters, readable from the CLI `stats` command.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub points_written: u64,
    pub points_dropped: u64,
    pub flush_failures: u64,
}

struct StoreInner {
    conn: Connection,
    batch: Vec<SamplePoint>,
    last_flush_ms: i64,
    degraded: bool,
}

/// Handle to the on-disk time series. Safe to share across threads; a
/// single mutex serializes batch mutation and flushes, and WAL mode keeps
/// readers in other processes from blocking the writer.
pub struct MetricStore {
    inner: Mutex<StoreInner>,
    config: StoreConfig,
    hostname: String,
    points_written: AtomicU64,
    points_dropped: AtomicU64,
    flush_failures: AtomicU64,
}

impl std::fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricStore")
            .field("config", &self.config)
            .field("hostname", &self.hostname)
            .field("points_written", &self.points_written)
            .field("points_dropped", &self.points_dropped)
            .field("flush_failures", &self.flush_failures)
            .finish()
    }
}

impl MetricStore {
    /// Opens (creating if missing) and migrates the database. Fails when
    /// the path is unusable or the schema is newer than this build.
    pub fn open(config: StoreConfig, hostname: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(Path::new(&config.db_path), flags).map_err(
            |source| StorageError::Open {
                path: config.db_path.clone(),
                source,
            },
        )?;

        if config.enable_wal {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        }
        conn.execute_batch(
            "PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-64000;
             PRAGMA temp_store=MEMORY;",
        )?;

        migrate(&conn)?;

        tracing::info!(path = %config.db_path, "metric store opened");

        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                batch: Vec::with_capacity(config.batch_size),
                last_flush_ms: Utc::now().timestamp_millis(),
                degraded: false,
            }),
            config,
            hostname: hostname.to_string(),
            points_written: AtomicU64::new(0),
            points_dropped: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- write surface -------------------------------------------------

    pub fn write_cpu(&self, cpu: &CpuSnapshot) -> bool {
        let ts = now_ts();
        let mut points = vec![
            self.point(ts, "cpu.total_usage", "", cpu.total_usage),
            self.point(ts, "cpu.num_cores", "", f64::from(cpu.num_cores)),
            self.point(ts, "cpu.load_avg_1m", "", cpu.load_average_1m),
            self.point(ts, "cpu.load_avg_5m", "", cpu.load_average_5m),
            self.point(ts, "cpu.load_avg_15m", "", cpu.load_average_15m),
            self.point(ts, "cpu.context_switches", "", cpu.context_switches as f64),
            self.point(ts, "cpu.interrupts", "", cpu.interrupts as f64),
        ];
        for (core, usage) in cpu.per_core_usage.iter().enumerate() {
            let t = tags::single("core", &core.to_string());
            points.push(self.point(ts, "cpu.core_usage", &t, *usage));
        }
        self.write_points(points)
    }

    pub fn write_memory(&self, mem: &MemorySnapshot) -> bool {
        let ts = now_ts();
        let points = vec![
            self.point(ts, "memory.total_bytes", "", mem.total_bytes as f64),
            self.point(ts, "memory.available_bytes", "", mem.available_bytes as f64),
            self.point(ts, "memory.used_bytes", "", mem.used_bytes as f64),
            self.point(ts, "memory.free_bytes", "", mem.free_bytes as f64),
            self.point(ts, "memory.cached_bytes", "", mem.cached_bytes as f64),
            self.point(ts, "memory.buffers_bytes", "", mem.buffers_bytes as f64),
            self.point(ts, "memory.usage_percent", "", mem.usage_percent),
            self.point(ts, "memory.swap_total_bytes", "", mem.swap_total_bytes as f64),
            self.point(ts, "memory.swap_used_bytes", "", mem.swap_used_bytes as f64),
        ];
        self.write_points(points)
    }

    pub fn write_disks(&self, disks: &[DiskEntry]) -> bool {
        let ts = now_ts();
        let mut points = Vec::with_capacity(disks.len() * 8);
        for disk in disks {
            let t = tags::pair("device", &disk.device_name, "mount", &disk.mount_point);
            points.push(self.point(ts, "disk.total_bytes", &t, disk.total_bytes as f64));
            points.push(self.point(ts, "disk.used_bytes", &t, disk.used_bytes as f64));
            points.push(self.point(ts, "disk.free_bytes", &t, disk.free_bytes as f64));
            points.push(self.point(ts, "disk.usage_percent", &t, disk.usage_percent));
            points.push(self.point(ts, "disk.read_bytes", &t, disk.read_bytes as f64));
            points.push(self.point(ts, "disk.write_bytes", &t, disk.write_bytes as f64));
            points.push(self.point(ts, "disk.read_ops", &t, disk.read_ops as f64));
            points.push(self.point(ts, "disk.write_ops", &t, disk.write_ops as f64));
        }
        self.write_points(points)
    }

    pub fn write_networks(&self, interfaces: &[NetworkEntry]) -> bool {
        let ts = now_ts();
        let mut points = Vec::with_capacity(interfaces.len() * 8);
        for iface in interfaces {
            let t = tags::single("interface", &iface.interface_name);
            points.push(self.point(ts, "network.bytes_sent", &t, iface.bytes_sent as f64));
            points.push(self.point(ts, "network.bytes_recv", &t, iface.bytes_recv as f64));
            points.push(self.point(ts, "network.packets_sent", &t, iface.packets_sent as f64));
            points.push(self.point(ts, "network.packets_recv", &t, iface.packets_recv as f64));
            points.push(self.point(ts, "network.errors_in", &t, iface.errors_in as f64));
            points.push(self.point(ts, "network.errors_out", &t, iface.errors_out as f64));
            points.push(self.point(ts, "network.drops_in", &t, iface.drops_in as f64));
            points.push(self.point(ts, "network.drops_out", &t, iface.drops_out as f64));
        }
        self.write_points(points)
    }

    /// Persists the top processes by CPU plus the total process count.
    pub fn write_processes(&self, processes: &[ProcessEntry]) -> bool {
        let ts = now_ts();
        let mut top: Vec<&ProcessEntry> = processes.iter().collect();
        top.sort_by(|a, b| {
            b.cpu_percent
                .partial_cmp(&a.cpu_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top.truncate(MAX_PERSISTED_PROCESSES);

        let mut points = Vec::with_capacity(top.len() * 3 + 1);
        for proc_ in top {
            let t = tags::pair("name", &proc_.name, "pid", &proc_.pid.to_string());
            points.push(self.point(ts, "process.cpu_percent", &t, proc_.cpu_percent));
            points.push(self.point(ts, "process.memory_bytes", &t, proc_.memory_bytes as f64));
            points.push(self.point(ts, "process.num_threads", &t, f64::from(proc_.num_threads)));
        }
        points.push(self.point(ts, "process.count", "", processes.len() as f64));
        self.write_points(points)
    }

    fn point(&self, ts: i64, name: &str, tags: &str, value: f64) -> SamplePoint {
        SamplePoint::new(ts, name, &self.hostname, tags, value)
    }

    /// Appends points to the batch and flushes when a trigger is hit.
    /// Returns false (and counts the drop) instead of propagating errors;
    /// the scheduler must keep running through a bad disk.
    pub(crate) fn write_points(&self, points: Vec<SamplePoint>) -> bool {
        let count = points.len();
        let mut inner = self.lock();

        if let Err(e) = self.append_locked(&mut inner, points) {
            self.points_dropped.fetch_add(count as u64, Ordering::Relaxed);
            tracing::warn!(error = %e, "dropping {count} points");
            return false;
        }
        self.points_written.fetch_add(count as u64, Ordering::Relaxed);

        let due = inner.batch.len() >= self.config.batch_size
            || Utc::now().timestamp_millis() - inner.last_flush_ms >= self.config.flush_interval_ms;
        if due {
            if let Err(e) = self.flush_locked(&mut inner) {
                tracing::warn!(error = %e, "batch flush failed, retaining batch");
                return false;
            }
        }
        true
    }

    /// Fails without mutating the batch when the write would exceed the
    /// hard cap or the handle is degraded.
    fn append_locked(&self, inner: &mut StoreInner, points: Vec<SamplePoint>) -> Result<()> {
        if inner.degraded {
            return Err(StorageError::Degraded);
        }
        if inner.batch.len() + points.len() > MAX_BATCH_POINTS {
            return Err(StorageError::BufferFull {
                cap: MAX_BATCH_POINTS,
            });
        }
        inner.batch.extend(points);
        Ok(())
    }

    /// Commits the pending batch in one transaction. The batch is retained
    /// on failure and drained by the next successful flush. Flushing an
    /// empty batch is a no-op.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        self.flush_locked(&mut inner)
    }

    fn flush_locked(&self, inner: &mut StoreInner) -> Result<()> {
        if inner.degraded {
            return Err(StorageError::Degraded);
        }
        if inner.batch.is_empty() {
            inner.last_flush_ms = Utc::now().timestamp_millis();
            return Ok(());
        }

        let result = (|| -> Result<()> {
            let tx = inner.conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR REPLACE INTO metrics (timestamp, metric_name, host, tags, value)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?;
                for p in &inner.batch {
                    stmt.execute(rusqlite::params![
                        p.timestamp,
                        &p.metric_name,
                        &p.host,
                        &p.tags,
                        p.value,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                tracing::debug!(points = inner.batch.len(), "batch flushed");
                inner.batch.clear();
                inner.last_flush_ms = Utc::now().timestamp_millis();
                Ok(())
            }
            Err(e) => {
                self.flush_failures.fetch_add(1, Ordering::Relaxed);
                if is_corruption(&e) {
                    tracing::error!(error = %e, "database corruption detected, degrading handle");
                    inner.degraded = true;
                }
                Err(e)
            }
        }
    }

    // ---- read surface --------------------------------------------------

    /// Range query over committed rows, newest first. `limit == 0` means
    /// unlimited. Unflushed batch points are not visible.
    pub fn query_range(
        &self,
        metric_name: &str,
        start_ts: i64,
        end_ts: i64,
        limit: usize,
    ) -> Result<Vec<SamplePoint>> {
        let inner = self.lock();
        let mut sql = String::from(
            "SELECT timestamp, metric_name, host, tags, value FROM metrics
             WHERE metric_name = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp DESC",
        );
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = inner.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(rusqlite::params![metric_name, start_ts, end_ts], |row| {
            Ok(SamplePoint {
                timestamp: row.get(0)?,
                metric_name: row.get(1)?,
                host: row.get(2)?,
                tags: row.get(3)?,
                value: row.get(4)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Deletes raw points older than `days` days. One transactional
    /// delete; space reclaim is left to SQLite (no inline vacuum).
    pub fn apply_retention(&self, days: u32) -> Result<u64> {
        let cutoff = now_ts() - i64::from(days) * 86_400;
        let inner = self.lock();
        let deleted = inner
            .conn
            .execute("DELETE FROM metrics WHERE timestamp < ?1", [cutoff])?;
        tracing::info!(deleted, days, "retention applied");
        Ok(deleted as u64)
    }

    /// Current schema version as recorded on disk.
    pub fn schema_version(&self) -> Result<i64> {
        let inner = self.lock();
        read_schema_version(&inner.conn)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            points_written: self.points_written.load(Ordering::Relaxed),
            points_dropped: self.points_dropped.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
        }
    }

    /// Number of points waiting in the in-memory batch.
    pub fn pending_points(&self) -> usize {
        self.lock().batch.len()
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let inner = self.lock();
        f(&inner.conn)
    }
}

impl Drop for MetricStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "final flush failed on shutdown");
        }
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let current = read_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(StorageError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        record_version(conn, 1)?;
    }
    if current < 2 {
        conn.execute_batch(SCHEMA_V2)?;
        record_version(conn, 2)?;
    }
    Ok(())
}

fn record_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![version, now_ts()],
    )?;
    Ok(())
}

fn read_schema_version(conn: &Connection) -> Result<i64> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    if exists == 0 {
        return Ok(0);
    }
    let version: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

fn is_corruption(err: &StorageError) -> bool {
    match err {
        StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
        ),
        _ => false,
    }
}
