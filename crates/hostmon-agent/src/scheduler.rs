use crate::fanout::{MetricFanout, TickSample};
use hostmon_probes::Probes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Drives periodic sampling. One worker, at most one tick in flight;
/// each tick samples every probe, fans the results out, and sleeps for
/// whatever remains of the period. A tick that overruns its period is
/// followed immediately by the next one, with no catch-up firing.
pub struct CollectionScheduler {
    probes: Mutex<Box<dyn Probes>>,
    fanout: MetricFanout,
    interval: Duration,
    ticks: AtomicU64,
    running: AtomicBool,
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CollectionScheduler {
    /// `interval_ms` is clamped to the 100 ms floor.
    pub fn new(probes: Box<dyn Probes>, fanout: MetricFanout, interval_ms: u64) -> Self {
        Self {
            probes: Mutex::new(probes),
            fanout,
            interval: Duration::from_millis(interval_ms.max(100)),
            ticks: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// Launches the collection worker. A no-op when already running.
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stop.0.lock().unwrap_or_else(|p| p.into_inner()) = false;

        let scheduler = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("collection-scheduler".to_string())
            .spawn(move || scheduler.run_loop())
            .expect("spawning scheduler thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "collection scheduler started");
    }

    fn run_loop(&self) {
        let (lock, cvar) = &*self.stop;
        loop {
            let started = Instant::now();
            let tick = self.sample_once();
            self.fanout.dispatch(&tick);
            self.ticks.fetch_add(1, Ordering::Relaxed);

            let elapsed = started.elapsed();
            if elapsed > self.interval {
                tracing::warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    interval_ms = self.interval.as_millis() as u64,
                    "tick overran its period"
                );
            }
            let remaining = self.interval.saturating_sub(elapsed);

            let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
            if *guard {
                break;
            }
            if remaining.is_zero() {
                continue;
            }
            let (guard, _) = cvar
                .wait_timeout_while(guard, remaining, |stopped| !*stopped)
                .unwrap_or_else(|p| p.into_inner());
            if *guard {
                break;
            }
        }
    }

    /// One sampling pass. A failing probe is logged and skipped; the
    /// rest of the tick still runs.
    fn sample_once(&self) -> TickSample {
        let mut probes = self.probes.lock().unwrap_or_else(|p| p.into_inner());
        let mut tick = TickSample::default();

        match probes.cpu() {
            Ok(cpu) => tick.cpu = Some(cpu),
            Err(e) => tracing::warn!(probe = "cpu", error = %e, "probe failed"),
        }
        match probes.memory() {
            Ok(memory) => tick.memory = Some(memory),
            Err(e) => tracing::warn!(probe = "memory", error = %e, "probe failed"),
        }
        match probes.disks() {
            Ok(disks) => tick.disks = Some(disks),
            Err(e) => tracing::warn!(probe = "disk", error = %e, "probe failed"),
        }
        match probes.networks() {
            Ok(networks) => tick.networks = Some(networks),
            Err(e) => tracing::warn!(probe = "network", error = %e, "probe failed"),
        }
        match probes.processes() {
            Ok(processes) => tick.processes = Some(processes),
            Err(e) => tracing::warn!(probe = "process", error = %e, "probe failed"),
        }
        tick
    }

    /// Signals the worker and blocks until the loop exits. Idempotent.
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
        tracing::info!("collection scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completed tick count.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
