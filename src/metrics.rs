//! Per-process derived metrics between two snapshots

use crate::collector::{ProcKey, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// Present in both snapshots; deltas are meaningful.
    Continuing,
    /// First seen this tick; no deltas yet.
    New,
    /// Tombstone: present only in the previous snapshot. Emitted for exactly
    /// one tick so downstream state can be retracted.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// 100 x (cpu-time delta) / elapsed, clamped to [0, 100 x core_count].
    pub cpu_percent: f64,
    pub rss_delta: i64,
    /// Read or write counters increased since the previous sample. Only set
    /// when the counters were readable in both samples.
    pub io_active: bool,
    pub status: SampleStatus,
}

impl DerivedMetrics {
    fn zero(status: SampleStatus) -> Self {
        DerivedMetrics {
            cpu_percent: 0.0,
            rss_delta: 0,
            io_active: false,
            status,
        }
    }
}

/// Computes per-key metrics for the union of both snapshots. CPU percent is
/// always derived from the cumulative counter, so a missed tick just widens
/// the elapsed window and the averaged percent stays correct. A non-positive
/// elapsed (clock anomaly, back-to-back calls) forces every percent to zero.
pub fn compute(
    prev: Option<&Snapshot>,
    cur: &Snapshot,
    core_count: u32,
) -> HashMap<ProcKey, DerivedMetrics> {
    let mut out = HashMap::with_capacity(cur.processes.len());

    let Some(prev) = prev else {
        for key in cur.processes.keys() {
            out.insert(*key, DerivedMetrics::zero(SampleStatus::New));
        }
        return out;
    };

    let elapsed = cur.taken_at - prev.taken_at;
    let max_percent = 100.0 * core_count.max(1) as f64;

    for (key, sample) in &cur.processes {
        let Some(before) = prev.processes.get(key) else {
            out.insert(*key, DerivedMetrics::zero(SampleStatus::New));
            continue;
        };
        let cpu_percent = if elapsed > 0.0 {
            let delta = (sample.cpu_time_secs - before.cpu_time_secs).max(0.0);
            (100.0 * delta / elapsed).clamp(0.0, max_percent)
        } else {
            0.0
        };
        let io_active = match (
            before.read_bytes,
            sample.read_bytes,
            before.write_bytes,
            sample.write_bytes,
        ) {
            (Some(r0), Some(r1), Some(w0), Some(w1)) => r1 > r0 || w1 > w0,
            _ => false,
        };
        out.insert(
            *key,
            DerivedMetrics {
                cpu_percent,
                rss_delta: sample.rss_bytes as i64 - before.rss_bytes as i64,
                io_active,
                status: SampleStatus::Continuing,
            },
        );
    }

    for key in prev.processes.keys() {
        if !cur.processes.contains_key(key) {
            out.insert(*key, DerivedMetrics::zero(SampleStatus::Removed));
        }
    }

    out
}
