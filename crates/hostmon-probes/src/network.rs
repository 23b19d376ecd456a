use hostmon_common::types::NetworkEntry;
use sysinfo::Networks;

pub struct NetworkSampler {
    networks: Networks,
}

impl NetworkSampler {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> Vec<NetworkEntry> {
        self.networks.refresh();
        let mut entries = Vec::new();

        for (name, data) in self.networks.iter() {
            let (is_up, speed_mbps) = link_state(name);
            entries.push(NetworkEntry {
                interface_name: name.clone(),
                bytes_sent: data.total_transmitted(),
                bytes_recv: data.total_received(),
                packets_sent: data.total_packets_transmitted(),
                packets_recv: data.total_packets_received(),
                errors_in: data.total_errors_on_received(),
                errors_out: data.total_errors_on_transmitted(),
                drops_in: drop_counter(name, "rx_dropped"),
                drops_out: drop_counter(name, "tx_dropped"),
                is_up,
                speed_mbps,
            });
        }

        entries
    }
}

impl Default for NetworkSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn sysfs_net_value(iface: &str, attr: &str) -> Option<String> {
    let path = format!("/sys/class/net/{iface}/{attr}");
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(target_os = "linux")]
fn link_state(iface: &str) -> (bool, u64) {
    let is_up = sysfs_net_value(iface, "operstate")
        .map(|s| s == "up" || s == "unknown")
        .unwrap_or(true);
    // speed reads -1 for interfaces without a fixed link rate.
    let speed = sysfs_net_value(iface, "speed")
        .and_then(|s| s.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as u64)
        .unwrap_or(0);
    (is_up, speed)
}

#[cfg(target_os = "linux")]
fn drop_counter(iface: &str, counter: &str) -> u64 {
    sysfs_net_value(iface, &format!("statistics/{counter}"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn link_state(_iface: &str) -> (bool, u64) {
    (true, 0)
}

#[cfg(not(target_os = "linux"))]
fn drop_counter(_iface: &str, _counter: &str) -> u64 {
    0
}
