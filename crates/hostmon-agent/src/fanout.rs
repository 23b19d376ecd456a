use hostmon_alert::AlertManager;
use hostmon_common::types::{
    CpuSnapshot, DiskEntry, MemorySnapshot, NetworkEntry, ProcessEntry,
};
use hostmon_publish::NetworkPublisher;
use hostmon_storage::MetricStore;
use std::sync::Arc;

/// Everything one scheduler tick produced. Probes that failed leave
/// their slot empty; consumers skip what is missing.
#[derive(Debug, Default)]
pub struct TickSample {
    pub cpu: Option<CpuSnapshot>,
    pub memory: Option<MemorySnapshot>,
    pub disks: Option<Vec<DiskEntry>>,
    pub networks: Option<Vec<NetworkEntry>>,
    pub processes: Option<Vec<ProcessEntry>>,
}

/// The process-wide publish point. The scheduler is the only producer;
/// the store, the alert evaluator, and the network publisher each
/// consume from their own side of this fan-out.
pub struct MetricFanout {
    store: Option<Arc<MetricStore>>,
    alerts: Arc<AlertManager>,
    publisher: Option<Arc<NetworkPublisher>>,
}

impl MetricFanout {
    pub fn new(
        store: Option<Arc<MetricStore>>,
        alerts: Arc<AlertManager>,
        publisher: Option<Arc<NetworkPublisher>>,
    ) -> Self {
        Self {
            store,
            alerts,
            publisher,
        }
    }

    pub fn dispatch(&self, tick: &TickSample) {
        if let Some(store) = &self.store {
            if let Some(cpu) = &tick.cpu {
                store.write_cpu(cpu);
            }
            if let Some(memory) = &tick.memory {
                store.write_memory(memory);
            }
            if let Some(disks) = &tick.disks {
                store.write_disks(disks);
            }
            if let Some(networks) = &tick.networks {
                store.write_networks(networks);
            }
            if let Some(processes) = &tick.processes {
                store.write_processes(processes);
            }
        }

        if let Some(cpu) = &tick.cpu {
            self.alerts.observe_cpu(cpu);
        }
        if let Some(memory) = &tick.memory {
            self.alerts.observe_memory(memory);
        }
        if let Some(disks) = &tick.disks {
            // The evaluator tracks the fullest mount.
            if let Some(worst) = disks
                .iter()
                .map(|d| d.usage_percent)
                .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            {
                self.alerts.observe("disk.usage_percent", worst);
            }
        }
        if let Some(processes) = &tick.processes {
            self.alerts.observe_processes(processes);
        }

        if let Some(publisher) = &self.publisher {
            if let Some(cpu) = &tick.cpu {
                publisher.queue_cpu(cpu);
            }
            if let Some(memory) = &tick.memory {
                publisher.queue_memory(memory);
            }
        }
    }
}
