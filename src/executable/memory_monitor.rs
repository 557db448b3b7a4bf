/// Out-of-band memory limiting via a per-process control group.
///
/// Only Linux kernels with cgroup v2 byte accounting are supported; other
/// platforms get a null monitor that never reports an OOM kill. The cap is
/// enforced by the kernel itself, not by polling, so memory-kill detection
/// has exact OOM semantics.
pub use imp::MemoryMonitor;

/// Default memory cap when `EXECUTABLE_MEMORY_LIMIT_IN_MB` is absent.
const DEFAULT_MEMORY_LIMIT_MB: i64 = 2048;

/// Reads the configured memory cap from `EXECUTABLE_MEMORY_LIMIT_IN_MB`.
///
/// 0 disables the cap; absence defaults to 2 GB. A non-integer or negative
/// value is fatal.
pub fn get_memory_limit_in_bytes() -> i64 {
    let megabytes = match std::env::var("EXECUTABLE_MEMORY_LIMIT_IN_MB") {
        Ok(value) => match value.parse::<i64>() {
            Ok(mb) if mb >= 0 => mb,
            _ => panic!(
                "EXECUTABLE_MEMORY_LIMIT_IN_MB must be a non-negative integer, got {:?}",
                value
            ),
        },
        Err(_) => DEFAULT_MEMORY_LIMIT_MB,
    };

    megabytes * 1024 * 1024
}

/// Formats a byte count as a human-readable string ("50 MB", "2 GB").
pub fn format_bytes_human_readable(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::types::{Result, TesterError};

    const CGROUP_ROOT: &str = "/sys/fs/cgroup";

    /// Caps a child's memory through a uniquely named cgroup and reports,
    /// after exit, whether the kernel OOM-killed it.
    pub struct MemoryMonitor {
        limit_bytes: i64,
        cgroup_path: Option<PathBuf>,
        initial_oom_kills: u64,
    }

    impl MemoryMonitor {
        pub fn new(limit_bytes: i64) -> Self {
            MemoryMonitor {
                limit_bytes,
                cgroup_path: None,
                initial_oom_kills: 0,
            }
        }

        /// Creates the control group, applies the byte cap, moves `pid` into
        /// it, and snapshots the current OOM-kill counter.
        ///
        /// A cap of zero or less makes the monitor a no-op. Any creation
        /// failure is returned; the caller must not leave the child running
        /// unconstrained.
        pub fn start(&mut self, pid: u32) -> Result<()> {
            if self.limit_bytes <= 0 {
                return Ok(());
            }

            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_nanos();
            let path = PathBuf::from(CGROUP_ROOT).join(format!("testbox-{}-{}", pid, nanos));

            fs::create_dir(&path)
                .map_err(|e| TesterError::Cgroup(format!("failed to create cgroup: {}", e)))?;

            if let Err(e) = fs::write(path.join("memory.max"), self.limit_bytes.to_string()) {
                let _ = fs::remove_dir(&path);
                return Err(TesterError::Cgroup(format!(
                    "failed to set memory limit: {}",
                    e
                )));
            }

            if let Err(e) = fs::write(path.join("cgroup.procs"), pid.to_string()) {
                let _ = fs::remove_dir(&path);
                return Err(TesterError::Cgroup(format!(
                    "failed to add process to cgroup: {}",
                    e
                )));
            }

            self.initial_oom_kills = read_oom_kill_count(&path);
            self.cgroup_path = Some(path);

            Ok(())
        }

        /// True iff the OOM-kill counter advanced past the start snapshot.
        pub fn was_oom_killed(&self) -> bool {
            match &self.cgroup_path {
                Some(path) => read_oom_kill_count(path) > self.initial_oom_kills,
                None => false,
            }
        }

        /// Removes the control group, best-effort.
        pub fn stop(&mut self) {
            if let Some(path) = self.cgroup_path.take() {
                if let Err(e) = fs::remove_dir(&path) {
                    log::warn!("failed to remove cgroup {}: {}", path.display(), e);
                }
            }
        }
    }

    impl Drop for MemoryMonitor {
        fn drop(&mut self) {
            self.stop();
        }
    }

    /// Reads the `oom_kill` counter from the group's memory.events file.
    fn read_oom_kill_count(cgroup_path: &std::path::Path) -> u64 {
        let contents = match fs::read_to_string(cgroup_path.join("memory.events")) {
            Ok(contents) => contents,
            Err(_) => return 0,
        };

        for line in contents.lines() {
            if let Some(count) = line.strip_prefix("oom_kill ") {
                return count.trim().parse().unwrap_or(0);
            }
        }

        0
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use crate::types::Result;

    /// Null monitor for platforms without byte-accounted control groups.
    pub struct MemoryMonitor;

    impl MemoryMonitor {
        pub fn new(_limit_bytes: i64) -> Self {
            MemoryMonitor
        }

        pub fn start(&mut self, _pid: u32) -> Result<()> {
            Ok(())
        }

        pub fn was_oom_killed(&self) -> bool {
            false
        }

        pub fn stop(&mut self) {}
    }
}
