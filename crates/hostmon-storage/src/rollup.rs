//! Tiered rollup and retention.
//!
//! Raw points are averaged into 60-second buckets (`metrics_1m`) and those
//! into 3600-second buckets (`metrics_1h`). A rollup pass only ever reads
//! buckets strictly older than the current wall-clock bucket, so a bucket
//! still being written is never averaged early.

use crate::error::{Result, StorageError};
use crate::store::MetricStore;
use hostmon_common::types::now_ts;

/// How long each tier is kept. Each window must be strictly larger than
/// the previous one or the sweep would delete data it has not rolled up.
#[derive(Debug, Clone, Copy)]
pub struct TieredRetention {
    pub raw_hours: u32,
    pub minute_days: u32,
    pub hour_days: u32,
}

impl Default for TieredRetention {
    fn default() -> Self {
        Self {
            raw_hours: 24,
            minute_days: 30,
            hour_days: 365,
        }
    }
}

impl TieredRetention {
    pub fn validate(&self) -> Result<()> {
        let raw = i64::from(self.raw_hours) * 3600;
        let minute = i64::from(self.minute_days) * 86_400;
        let hour = i64::from(self.hour_days) * 86_400;
        if raw == 0 || raw >= minute || minute >= hour {
            return Err(StorageError::InvalidRetention(format!(
                "windows must be strictly increasing: raw {}h, 1m {}d, 1h {}d",
                self.raw_hours, self.minute_days, self.hour_days
            )));
        }
        Ok(())
    }
}

/// Row counts touched by one maintenance pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct TieredSweep {
    pub rolled_1m: u64,
    pub rolled_1h: u64,
    pub pruned_raw: u64,
    pub pruned_1m: u64,
    pub pruned_1h: u64,
}

/// Lookback windows bound how much source data a single pass re-reads;
/// they match the tier retention defaults so nothing eligible is missed.
const MINUTE_ROLLUP_LOOKBACK: i64 = 86_400;
const HOUR_ROLLUP_LOOKBACK: i64 = 30 * 86_400;

impl MetricStore {
    /// Averages raw points into 1-minute buckets, up to but excluding the
    /// bucket containing `cutoff` (clamped to the current wall-clock
    /// bucket). Returns the number of upserted rows.
    pub fn rollup_minutes(&self, cutoff: i64) -> Result<u64> {
        let cutoff = bucket_floor(cutoff.min(now_ts()), 60);
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR REPLACE INTO metrics_1m (timestamp, metric_name, host, tags, value)
                 SELECT (timestamp / 60) * 60 AS bucket, metric_name, host, tags, AVG(value)
                 FROM metrics
                 WHERE timestamp < ?1 AND timestamp >= ?1 - ?2
                 GROUP BY bucket, metric_name, host, tags",
                rusqlite::params![cutoff, MINUTE_ROLLUP_LOOKBACK],
            )?;
            Ok(changed as u64)
        })
    }

    /// Averages 1-minute rows into 1-hour buckets, same cutoff contract as
    /// [`MetricStore::rollup_minutes`].
    pub fn rollup_hours(&self, cutoff: i64) -> Result<u64> {
        let cutoff = bucket_floor(cutoff.min(now_ts()), 3600);
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR REPLACE INTO metrics_1h (timestamp, metric_name, host, tags, value)
                 SELECT (timestamp / 3600) * 3600 AS bucket, metric_name, host, tags, AVG(value)
                 FROM metrics_1m
                 WHERE timestamp < ?1 AND timestamp >= ?1 - ?2
                 GROUP BY bucket, metric_name, host, tags",
                rusqlite::params![cutoff, HOUR_ROLLUP_LOOKBACK],
            )?;
            Ok(changed as u64)
        })
    }

    /// One maintenance pass: roll both tiers forward, then prune each
    /// tier to its window. Rollup runs first so pruned raw data has
    /// already been averaged.
    pub fn apply_tiered_retention(&self, tiers: TieredRetention) -> Result<TieredSweep> {
        tiers.validate()?;
        let now = now_ts();

        let rolled_1m = self.rollup_minutes(now)?;
        let rolled_1h = self.rollup_hours(now)?;

        let prune = |table: &str, cutoff: i64| -> Result<u64> {
            self.with_conn(|conn| {
                let deleted = conn.execute(
                    &format!("DELETE FROM {table} WHERE timestamp < ?1"),
                    [cutoff],
                )?;
                Ok(deleted as u64)
            })
        };

        let sweep = TieredSweep {
            rolled_1m,
            rolled_1h,
            pruned_raw: prune("metrics", now - i64::from(tiers.raw_hours) * 3600)?,
            pruned_1m: prune("metrics_1m", now - i64::from(tiers.minute_days) * 86_400)?,
            pruned_1h: prune("metrics_1h", now - i64::from(tiers.hour_days) * 86_400)?,
        };
        tracing::info!(
            rolled_1m = sweep.rolled_1m,
            rolled_1h = sweep.rolled_1h,
            pruned_raw = sweep.pruned_raw,
            "tiered retention pass complete"
        );
        Ok(sweep)
    }

    /// Rows currently in a rollup tier, used by tests and `stats`.
    pub fn tier_row_count(&self, table: &str) -> Result<u64> {
        let table = match table {
            "metrics" | "metrics_1m" | "metrics_1h" => table,
            other => return Err(StorageError::UnknownTable(other.to_string())),
        };
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn bucket_floor(ts: i64, width: i64) -> i64 {
    (ts / width) * width
}
