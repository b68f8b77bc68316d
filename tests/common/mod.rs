//! Shared test doubles: a scripted snapshot source and an in-memory
//! notification transport with an inspectable call log.
#![allow(dead_code)]

use procwatch::collector::{CaptureError, ProcState, ProcessSample, Snapshot, SnapshotSource};
use procwatch::config::Config;
use procwatch::notifier::{NotifyError, NotifyTransport, Urgency};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.general.sample_interval_seconds = 5.0;
    config.general.core_count = 1;
    config.detection.cpu.threshold_percent = 50.0;
    config.detection.cpu.duration_seconds = 5.0;
    config.detection.memory.threshold_bytes = 1_000_000_000;
    config.detection.memory.duration_seconds = 5.0;
    config.detection.memory.tolerance_bytes = 0;
    config
}

pub fn sample(pid: u32, start_time: u64, cpu_time_secs: f64, rss_bytes: u64) -> ProcessSample {
    ProcessSample {
        pid,
        uid: 1000,
        comm: format!("proc-{}", pid),
        cpu_time_secs,
        rss_bytes,
        uss_bytes: None,
        shared_bytes: None,
        read_bytes: None,
        write_bytes: None,
        start_time,
        state: ProcState::Running,
    }
}

pub fn snapshot(taken_at: f64, samples: Vec<ProcessSample>) -> Snapshot {
    let mut snap = Snapshot::new(taken_at);
    for s in samples {
        snap.insert(s);
    }
    snap
}

/// Returns queued snapshots in order; a fatal capture error once exhausted
/// (or wherever an explicit error was queued).
pub struct ScriptedSource {
    queue: VecDeque<Result<Snapshot, CaptureError>>,
}

impl ScriptedSource {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            queue: snapshots.into_iter().map(Ok).collect(),
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.queue.push_back(Ok(snapshot));
    }

    pub fn push_error(&mut self) {
        self.queue.push_back(Err(CaptureError::Fatal(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "scripted failure",
        ))));
    }
}

impl SnapshotSource for ScriptedSource {
    fn capture(&mut self) -> Result<Snapshot, CaptureError> {
        self.queue.pop_front().unwrap_or_else(|| {
            Err(CaptureError::Fatal(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "script exhausted",
            )))
        })
    }
}

#[derive(Default)]
pub struct TransportLog {
    pub available: bool,
    pub next_id: u32,
    /// Ids currently displayed. Removing one simulates the user dismissing
    /// the notification externally.
    pub open: BTreeSet<u32>,
    pub created: Vec<(u32, String, String)>,
    pub replaced: Vec<(u32, String)>,
    pub closed: Vec<u32>,
}

impl TransportLog {
    pub fn dismiss(&mut self, id: u32) {
        self.open.remove(&id);
    }
}

#[derive(Clone)]
pub struct MockTransport {
    pub log: Arc<Mutex<TransportLog>>,
}

impl MockTransport {
    pub fn new(available: bool) -> Self {
        Self {
            log: Arc::new(Mutex::new(TransportLog {
                available,
                next_id: 1,
                ..TransportLog::default()
            })),
        }
    }
}

impl NotifyTransport for MockTransport {
    fn probe(&mut self) -> bool {
        self.log.lock().unwrap().available
    }

    fn create(&mut self, title: &str, body: &str, _urgency: Urgency) -> Result<u32, NotifyError> {
        let mut log = self.log.lock().unwrap();
        if !log.available {
            return Err(NotifyError::Unavailable);
        }
        let id = log.next_id;
        log.next_id += 1;
        log.open.insert(id);
        log.created.push((id, title.to_string(), body.to_string()));
        Ok(id)
    }

    fn replace(&mut self, id: u32, body: &str) -> Result<(), NotifyError> {
        let mut log = self.log.lock().unwrap();
        if !log.available {
            return Err(NotifyError::Unavailable);
        }
        if !log.open.contains(&id) {
            return Err(NotifyError::Stale);
        }
        log.replaced.push((id, body.to_string()));
        Ok(())
    }

    fn close(&mut self, id: u32) {
        let mut log = self.log.lock().unwrap();
        log.open.remove(&id);
        log.closed.push(id);
    }
}
