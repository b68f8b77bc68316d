//! Process table snapshots (reads /proc on Linux)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod linux;

pub use linux::LinuxProcReader;

/// Identity of one process lifetime. PIDs get reused; a reused pid with a
/// different start time is a different logical process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcKey {
    pub pid: u32,
    /// Process start time, seconds since the epoch.
    pub start_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcState {
    Running,
    Sleeping,
    DiskSleep,
    Zombie,
    Stopped,
    Other(char),
}

impl From<char> for ProcState {
    fn from(c: char) -> Self {
        match c {
            'R' => ProcState::Running,
            'S' => ProcState::Sleeping,
            'D' => ProcState::DiskSleep,
            'Z' => ProcState::Zombie,
            'T' | 't' => ProcState::Stopped,
            other => ProcState::Other(other),
        }
    }
}

/// One process as measured at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub uid: u32,
    pub comm: String,
    /// Cumulative CPU time (user + system) consumed so far, in seconds.
    /// Monotonic for a given process lifetime.
    pub cpu_time_secs: f64,
    pub rss_bytes: u64,
    pub uss_bytes: Option<u64>,
    pub shared_bytes: Option<u64>,
    pub read_bytes: Option<u64>,
    pub write_bytes: Option<u64>,
    pub start_time: u64,
    pub state: ProcState,
}

impl ProcessSample {
    pub fn key(&self) -> ProcKey {
        ProcKey {
            pid: self.pid,
            start_time: self.start_time,
        }
    }
}

/// A complete per-process measurement taken at one instant. Immutable once
/// produced; the sample loop keeps only the two most recent.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Capture time, seconds since the epoch.
    pub taken_at: f64,
    pub processes: HashMap<ProcKey, ProcessSample>,
}

impl Snapshot {
    pub fn new(taken_at: f64) -> Self {
        Snapshot {
            taken_at,
            processes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, sample: ProcessSample) {
        self.processes.insert(sample.key(), sample);
    }

    pub fn by_pid(&self, pid: u32) -> Option<&ProcessSample> {
        self.processes.values().find(|p| p.pid == pid)
    }
}

/// Whole-table capture failed. Individual unreadable processes are skipped
/// inside the reader and never surface as errors.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("process table inaccessible: {0}")]
    Fatal(#[from] std::io::Error),
}

pub trait SnapshotSource: Send {
    fn capture(&mut self) -> Result<Snapshot, CaptureError>;
}
