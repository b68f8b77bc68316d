use super::{CaptureError, ProcessSample, Snapshot, SnapshotSource};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

pub struct LinuxProcReader {
    page_size: u64,
    clock_ticks: u64,
    boot_time: u64,
}

impl LinuxProcReader {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as u64 };
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) as u64 }.max(1);
        let boot_time = Self::read_boot_time();
        Self {
            page_size,
            clock_ticks,
            boot_time,
        }
    }

    fn read_boot_time() -> u64 {
        let stat = fs::read_to_string("/proc/stat").unwrap_or_default();
        for line in stat.lines() {
            if let Some(rest) = line.strip_prefix("btime ") {
                return rest.trim().parse().unwrap_or(0);
            }
        }
        0
    }

    /// Reads one process. Any read failure (vanished mid-read, permission
    /// denied) yields None and the process is left out of the snapshot.
    fn parse_process(&self, pid: u32) -> Option<ProcessSample> {
        let proc_dir = format!("/proc/{}", pid);
        let proc_dir = Path::new(&proc_dir);

        let stat = fs::read_to_string(proc_dir.join("stat")).ok()?;
        // comm may contain spaces and parentheses; fields resume after the
        // last ')'.
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let comm = stat.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = stat.get(close + 2..)?.split_whitespace().collect();
        // rest[0] is stat field 3 (state); fields are 1-indexed in proc(5).
        if rest.len() < 22 {
            return None;
        }
        let state = rest[0].chars().next().unwrap_or('?');
        let utime: u64 = rest[11].parse().ok()?;
        let stime: u64 = rest[12].parse().ok()?;
        let start_time_ticks: u64 = rest[19].parse().ok()?;
        let rss_pages: u64 = rest[21].parse().ok()?;

        let uid = self.read_uid(proc_dir)?;
        let rss_bytes = rss_pages * self.page_size;
        let shared_bytes = self.read_shared(proc_dir);
        // statm resident minus shared approximates the unique set.
        let uss_bytes = shared_bytes.map(|s| rss_bytes.saturating_sub(s));
        let (read_bytes, write_bytes) = self.read_io(proc_dir);

        Some(ProcessSample {
            pid,
            uid,
            comm,
            cpu_time_secs: (utime + stime) as f64 / self.clock_ticks as f64,
            rss_bytes,
            uss_bytes,
            shared_bytes,
            read_bytes,
            write_bytes,
            start_time: self.boot_time + start_time_ticks / self.clock_ticks,
            state: state.into(),
        })
    }

    fn read_uid(&self, proc_dir: &Path) -> Option<u32> {
        let status = fs::read_to_string(proc_dir.join("status")).ok()?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("Uid:") {
                return rest.split_whitespace().next()?.parse().ok();
            }
        }
        None
    }

    fn read_shared(&self, proc_dir: &Path) -> Option<u64> {
        let statm = fs::read_to_string(proc_dir.join("statm")).ok()?;
        let shared_pages: u64 = statm.split_whitespace().nth(2)?.parse().ok()?;
        Some(shared_pages * self.page_size)
    }

    /// I/O counters need ptrace-level access for other users' processes;
    /// absence degrades to None.
    fn read_io(&self, proc_dir: &Path) -> (Option<u64>, Option<u64>) {
        let Ok(io) = fs::read_to_string(proc_dir.join("io")) else {
            return (None, None);
        };
        let mut read_bytes = None;
        let mut write_bytes = None;
        for line in io.lines() {
            if let Some(rest) = line.strip_prefix("read_bytes:") {
                read_bytes = rest.trim().parse().ok();
            } else if let Some(rest) = line.strip_prefix("write_bytes:") {
                write_bytes = rest.trim().parse().ok();
            }
        }
        (read_bytes, write_bytes)
    }
}

impl Default for LinuxProcReader {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for LinuxProcReader {
    fn capture(&mut self) -> Result<Snapshot, CaptureError> {
        let taken_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let mut snapshot = Snapshot::new(taken_at);
        for entry in fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(pid) = name.parse::<u32>() else { continue };
            match self.parse_process(pid) {
                Some(sample) => snapshot.insert(sample),
                None => debug!(pid, "process unreadable, skipped"),
            }
        }
        Ok(snapshot)
    }
}
