//! IPC protocol definitions (JSON messages)

use crate::alerts::AlertState;
use crate::collector::{ProcState, ProcessSample};
use crate::detector::TriggerKind;
use crate::metrics::DerivedMetrics;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    ListProcesses,
    GetAlerts,
    Pause,
    Resume,
    SetNotifications { params: SetNotificationsParams },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetNotificationsParams {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Ok,
    Error { message: String },
    Status { data: StatusData },
    Processes { data: Vec<ProcessEntry> },
    Alerts { data: Vec<AlertEntry> },
    /// Pushed to every connected client when a new offense episode starts.
    Alert { data: AlertEntry },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub monitored: u32,
    pub offending: u32,
    pub paused: bool,
    pub notifications_enabled: bool,
    pub alerts_raised: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub start_time: u64,
    pub uid: u32,
    pub comm: String,
    pub state: ProcState,
    pub cpu_percent: f64,
    pub rss_bytes: u64,
    pub rss_delta: i64,
    pub io_active: bool,
}

impl ProcessEntry {
    pub fn new(sample: &ProcessSample, metrics: &DerivedMetrics) -> Self {
        ProcessEntry {
            pid: sample.pid,
            start_time: sample.start_time,
            uid: sample.uid,
            comm: sample.comm.clone(),
            state: sample.state,
            cpu_percent: metrics.cpu_percent,
            rss_bytes: sample.rss_bytes,
            rss_delta: metrics.rss_delta,
            io_active: metrics.io_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntry {
    pub pid: u32,
    pub start_time: u64,
    pub comm: String,
    pub kind: TriggerKind,
    pub since: f64,
    pub last_seen: f64,
    pub peak: f64,
}

impl From<&AlertState> for AlertEntry {
    fn from(state: &AlertState) -> Self {
        AlertEntry {
            pid: state.key.pid,
            start_time: state.key.start_time,
            comm: state.comm.clone(),
            kind: state.kind,
            since: state.since,
            last_seen: state.last_seen,
            peak: state.peak,
        }
    }
}
