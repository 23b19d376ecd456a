use hostmon_common::types::ProcessEntry;
use sysinfo::{Pid, System, Users};

pub struct ProcessSampler {
    system: System,
    users: Users,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            users: Users::new_with_refreshed_list(),
        }
    }

    pub fn sample(&mut self) -> Vec<ProcessEntry> {
        self.system.refresh_processes();
        let mut entries = Vec::with_capacity(self.system.processes().len());

        for (pid, proc_) in self.system.processes() {
            let username = proc_
                .user_id()
                .and_then(|uid| self.users.get_user_by_id(uid))
                .map(|u| u.name().to_string())
                .unwrap_or_default();
            let io = proc_.disk_usage();
            let (num_threads, open_files) = proc_table_extras(*pid);

            entries.push(ProcessEntry {
                pid: pid.as_u32(),
                ppid: proc_.parent().map(|p| p.as_u32()).unwrap_or(0),
                name: proc_.name().to_string(),
                executable: proc_
                    .exe()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
                cpu_percent: f64::from(proc_.cpu_usage()),
                memory_bytes: proc_.memory(),
                num_threads,
                start_time: proc_.start_time() as i64,
                state: proc_.status().to_string(),
                username,
                read_bytes: io.total_read_bytes,
                write_bytes: io.total_written_bytes,
                open_files,
            });
        }

        entries
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread and descriptor counts come straight from /proc; a process that
/// exits mid-scan simply reports zeros.
#[cfg(target_os = "linux")]
fn proc_table_extras(pid: Pid) -> (u32, u32) {
    let pid = pid.as_u32();
    let num_threads = std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            // Field 2 (comm) may contain spaces; everything after the
            // closing paren is fixed-position, with num_threads at
            // offset 17 of the remainder.
            let rest = stat.rsplit(')').next()?.trim().to_string();
            rest.split_whitespace().nth(17)?.parse().ok()
        })
        .unwrap_or(0);
    let open_files = std::fs::read_dir(format!("/proc/{pid}/fd"))
        .map(|entries| entries.count() as u32)
        .unwrap_or(0);
    (num_threads, open_files)
}

#[cfg(not(target_os = "linux"))]
fn proc_table_extras(_pid: Pid) -> (u32, u32) {
    (0, 0)
}
