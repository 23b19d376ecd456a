use hostmon_storage::{MetricStore, TieredRetention};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Hourly storage maintenance: roll the tiers forward, then prune each
/// tier to its retention window.
pub struct MaintenanceWorker {
    store: Arc<MetricStore>,
    tiers: TieredRetention,
    interval: Duration,
    running: AtomicBool,
    stop: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceWorker {
    pub fn new(store: Arc<MetricStore>, tiers: TieredRetention) -> Self {
        Self {
            store,
            tiers,
            interval: Duration::from_secs(3600),
            running: AtomicBool::new(false),
            stop: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stop.0.lock().unwrap_or_else(|p| p.into_inner()) = false;

        let worker = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name("storage-maintenance".to_string())
            .spawn(move || worker.run_loop())
            .expect("spawning maintenance thread");
        *self.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
    }

    fn run_loop(&self) {
        let (lock, cvar) = &*self.stop;
        loop {
            // Wait first: the store has nothing to roll up at startup.
            {
                let guard = lock.lock().unwrap_or_else(|p| p.into_inner());
                let (guard, _) = cvar
                    .wait_timeout_while(guard, self.interval, |stopped| !*stopped)
                    .unwrap_or_else(|p| p.into_inner());
                if *guard {
                    break;
                }
            }
            match self.store.apply_tiered_retention(self.tiers) {
                Ok(sweep) => tracing::debug!(
                    rolled_1m = sweep.rolled_1m,
                    pruned_raw = sweep.pruned_raw,
                    "maintenance pass done"
                ),
                Err(e) => tracing::warn!(error = %e, "maintenance pass failed"),
            }
        }
    }

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
    }
}
