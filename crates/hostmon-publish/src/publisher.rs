use crate::transport::{EnvelopeMetric, MetricTransport, MetricsEnvelope};
use crate::{BATCH_LIMIT, MAX_BACKOFF_MS};
use hostmon_common::types::{now_ts, CpuSnapshot, MemorySnapshot};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// One metric waiting in the outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMetric {
    pub timestamp: i64,
    pub metric_name: String,
    pub value: f64,
    /// Canonical tag string; empty means untagged.
    pub tags: String,
}

impl QueuedMetric {
    pub fn new(timestamp: i64, metric_name: &str, value: f64) -> Self {
        Self {
            timestamp,
            metric_name: metric_name.to_string(),
            value,
            tags: String::new(),
        }
    }
}

/// Delivery counters. `metrics_sent <= publish_successes * BATCH_LIMIT`
/// and `publish_successes + publish_failures <= publish_attempts` hold
/// over any interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub metrics_queued: u64,
    pub metrics_sent: u64,
    pub metrics_failed: u64,
    pub publish_attempts: u64,
    pub publish_successes: u64,
    pub publish_failures: u64,
    pub queue_overflows: u64,
}

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub hostname: String,
    pub platform: String,
    pub auth_token: String,
    pub host_tags: BTreeMap<String, String>,
    /// Worker cadence; clamped to a 100 ms floor.
    pub push_interval_ms: u64,
    pub max_queue_size: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            platform: "Unknown".to_string(),
            auth_token: String::new(),
            host_tags: BTreeMap::new(),
            push_interval_ms: 5000,
            max_queue_size: 1000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

/// Ships queued metrics to the aggregator in bounded batches.
pub struct NetworkPublisher {
    config: PublishConfig,
    transport: Box<dyn MetricTransport>,
    /// Resolved aggregator base URL; `None` makes every publish fail fast.
    endpoint: Mutex<Option<String>>,
    queue: Mutex<VecDeque<QueuedMetric>>,
    stats: Mutex<PublisherStats>,
    running: AtomicBool,
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkPublisher {
    pub fn new(config: PublishConfig, transport: Box<dyn MetricTransport>) -> Self {
        Self {
            config,
            transport,
            endpoint: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            stats: Mutex::new(PublisherStats::default()),
            running: AtomicBool::new(false),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// Sets the aggregator endpoint resolved by service discovery.
    pub fn set_endpoint(&self, endpoint: Option<String>) {
        *self.endpoint.lock().unwrap_or_else(|p| p.into_inner()) = endpoint;
    }

    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    // ---- queueing ---------------------------------------------------------

    /// Enqueues one metric. Refuses (and counts the overflow) when the
    /// queue is at capacity; the queue itself is never mutated on refusal.
    pub fn enqueue(&self, metric: QueuedMetric) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
        if queue.len() >= self.config.max_queue_size {
            drop(queue);
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.queue_overflows += 1;
            return false;
        }
        queue.push_back(metric);
        drop(queue);
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        stats.metrics_queued += 1;
        true
    }

    /// Expands a CPU snapshot into queue entries. Returns false when any
    /// enqueue was refused.
    pub fn queue_cpu(&self, cpu: &CpuSnapshot) -> bool {
        let ts = now_ts();
        let mut ok = true;
        ok &= self.enqueue(QueuedMetric::new(ts, "cpu.total_usage", cpu.total_usage));
        ok &= self.enqueue(QueuedMetric::new(ts, "cpu.num_cores", f64::from(cpu.num_cores)));
        ok &= self.enqueue(QueuedMetric::new(ts, "cpu.load_avg_1m", cpu.load_average_1m));
        ok &= self.enqueue(QueuedMetric::new(ts, "cpu.load_avg_5m", cpu.load_average_5m));
        ok &= self.enqueue(QueuedMetric::new(ts, "cpu.load_avg_15m", cpu.load_average_15m));
        ok &= self.enqueue(QueuedMetric::new(
            ts,
            "cpu.context_switches",
            cpu.context_switches as f64,
        ));
        ok
    }

    /// Expands a memory snapshot into queue entries. Returns false when
    /// any enqueue was refused.
    pub fn queue_memory(&self, mem: &MemorySnapshot) -> bool {
        let ts = now_ts();
        let mut ok = true;
        ok &= self.enqueue(QueuedMetric::new(ts, "memory.total_bytes", mem.total_bytes as f64));
        ok &= self.enqueue(QueuedMetric::new(ts, "memory.used_bytes", mem.used_bytes as f64));
        ok &= self.enqueue(QueuedMetric::new(ts, "memory.free_bytes", mem.free_bytes as f64));
        ok &= self.enqueue(QueuedMetric::new(
            ts,
            "memory.available_bytes",
            mem.available_bytes as f64,
        ));
        ok &= self.enqueue(QueuedMetric::new(ts, "memory.usage_percent", mem.usage_percent));
        ok
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn stats(&self) -> PublisherStats {
        *self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ---- publishing -------------------------------------------------------

    /// Drains one batch from the queue front and ships it with retry.
    /// Called by the worker on each wake; exposed so tests can drive the
    /// pipeline without timing dependence.
    pub fn publish_pending(&self) {
        let batch: Vec<QueuedMetric> = {
            let mut queue = self.queue.lock().unwrap_or_else(|p| p.into_inner());
            let take = queue.len().min(BATCH_LIMIT);
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return;
        }

        let endpoint = self.endpoint();
        let Some(endpoint) = endpoint else {
            // Discovery produced nothing: fail fast, no retries.
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.publish_attempts += 1;
            stats.publish_failures += 1;
            stats.metrics_failed += batch.len() as u64;
            tracing::warn!(batch = batch.len(), "no aggregator endpoint, dropping batch");
            return;
        };

        let body = self.serialize_batch(&batch);
        let mut delivered = false;

        for attempt in 0..self.config.retry_max_attempts {
            let outcome = self
                .transport
                .post_metrics(&endpoint, &self.config.auth_token, body.clone());

            let success = match &outcome {
                Ok(status) => (200..300).contains(status),
                Err(_) => false,
            };
            {
                let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
                stats.publish_attempts += 1;
                if success {
                    stats.publish_successes += 1;
                    stats.metrics_sent += batch.len() as u64;
                } else {
                    stats.publish_failures += 1;
                }
            }

            if success {
                tracing::debug!(batch = batch.len(), "batch published");
                delivered = true;
                break;
            }

            match &outcome {
                Ok(status) => {
                    tracing::warn!(attempt, status = *status, "aggregator rejected batch")
                }
                Err(e) => tracing::warn!(attempt, error = %e, "publish attempt failed"),
            }
            std::thread::sleep(Duration::from_millis(self.backoff_delay_ms(attempt)));
        }

        if !delivered {
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.metrics_failed += batch.len() as u64;
            tracing::error!(
                attempts = self.config.retry_max_attempts,
                dropped = batch.len(),
                "batch dropped after retry exhaustion"
            );
        }
    }

    fn serialize_batch(&self, batch: &[QueuedMetric]) -> String {
        let envelope = MetricsEnvelope {
            hostname: &self.config.hostname,
            version: env!("CARGO_PKG_VERSION"),
            platform: &self.config.platform,
            tags: &self.config.host_tags,
            metrics: batch
                .iter()
                .map(|m| EnvelopeMetric {
                    timestamp: m.timestamp,
                    metric_type: &m.metric_name,
                    value: m.value,
                    tags: if m.tags.is_empty() {
                        None
                    } else {
                        Some(&m.tags)
                    },
                })
                .collect(),
        };
        serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
    }

    fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .config
            .retry_base_delay_ms
            .saturating_mul(1u64 << attempt.min(16));
        delay.min(MAX_BACKOFF_MS)
    }

    // ---- lifecycle --------------------------------------------------------

    /// Launches the publish worker. A no-op when already running.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stop.0.lock().unwrap_or_else(|p| p.into_inner()) = false;

        let publisher = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("network-publisher".to_string())
            .spawn(move || publisher.run_loop())
            .expect("spawning publisher thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        tracing::info!(
            interval_ms = self.config.push_interval_ms,
            queue = self.config.max_queue_size,
            "network publisher started"
        );
    }

    fn run_loop(&self) {
        let interval = Duration::from_millis(self.config.push_interval_ms.max(100));
        let (lock, cvar) = &*self.stop;
        loop {
            {
                let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
                let (guard, _) = cvar
                    .wait_timeout_while(guard, interval, |stopped| !*stopped)
                    .unwrap_or_else(|p| p.into_inner());
                if *guard {
                    break;
                }
            }
            self.publish_pending();
        }
    }

    /// Stops the worker and joins it. Queued metrics stay in place; a
    /// later `start` resumes draining them. Idempotent.
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
        tracing::info!("network publisher stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NetworkPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPublisher")
            .field("queue_len", &self.queue_len())
            .field("running", &self.is_running())
            .finish()
    }
}
