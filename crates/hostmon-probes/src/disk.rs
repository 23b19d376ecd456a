use hostmon_common::types::DiskEntry;
use sysinfo::Disks;

pub struct DiskSampler {
    disks: Disks,
}

impl DiskSampler {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> Vec<DiskEntry> {
        self.disks.refresh();
        let io = io_counters();
        let mut entries = Vec::new();

        for disk in self.disks.iter() {
            let mount = disk.mount_point().to_string_lossy().to_string();

            // Skip virtual/pseudo filesystems (snap, tmpfs, overlay, etc.)
            if mount.starts_with("/snap/")
                || mount.starts_with("/sys/")
                || mount.starts_with("/proc/")
                || mount.starts_with("/dev/")
                || mount.starts_with("/run/")
            {
                continue;
            }

            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let free = disk.available_space();
            let used = total.saturating_sub(free);
            let usage_percent = (used as f64 / total as f64) * 100.0;

            let device = disk.name().to_string_lossy().to_string();
            let short = device.rsplit('/').next().unwrap_or(&device);
            let (read_bytes, write_bytes, read_ops, write_ops) =
                io.get(short).copied().unwrap_or((0, 0, 0, 0));

            entries.push(DiskEntry {
                device_name: device.clone(),
                mount_point: mount,
                total_bytes: total,
                used_bytes: used,
                free_bytes: free,
                usage_percent,
                read_bytes,
                write_bytes,
                read_ops,
                write_ops,
            });
        }

        entries
    }
}

impl Default for DiskSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-device IO counters from /proc/diskstats, keyed by device short
/// name. The counters may reset on wrap; downstream treats them as
/// opaque gauges. Non-Linux targets report zeros.
#[cfg(target_os = "linux")]
fn io_counters() -> std::collections::HashMap<String, (u64, u64, u64, u64)> {
    const SECTOR_SIZE: u64 = 512;
    let mut map = std::collections::HashMap::new();
    let Ok(stats) = std::fs::read_to_string("/proc/diskstats") else {
        return map;
    };
    for line in stats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads _ sectors_read _ writes _ sectors_written ...
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2].to_string();
        let read_ops: u64 = fields[3].parse().unwrap_or(0);
        let read_sectors: u64 = fields[5].parse().unwrap_or(0);
        let write_ops: u64 = fields[7].parse().unwrap_or(0);
        let write_sectors: u64 = fields[9].parse().unwrap_or(0);
        map.insert(
            name,
            (
                read_sectors * SECTOR_SIZE,
                write_sectors * SECTOR_SIZE,
                read_ops,
                write_ops,
            ),
        );
    }
    map
}

#[cfg(not(target_os = "linux"))]
fn io_counters() -> std::collections::HashMap<String, (u64, u64, u64, u64)> {
    std::collections::HashMap::new()
}
