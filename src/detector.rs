//! Threshold evaluation with per-process hysteresis

use crate::collector::{ProcKey, ProcessSample};
use crate::config::DetectionConfig;
use crate::metrics::{DerivedMetrics, SampleStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Cpu,
    Memory,
}

/// A process found offending on this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Current reading of the triggering metric: CPU percent, or RSS bytes.
    pub value: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunState {
    cpu_run_secs: f64,
    mem_run_secs: f64,
}

/// Tracks how long each process has continuously satisfied a rule. A single
/// tick below threshold resets the run to zero; there is no debounce on the
/// way down, so an alert never outlives the condition it reports.
pub struct ThresholdDetector {
    config: DetectionConfig,
    runs: HashMap<ProcKey, RunState>,
}

impl ThresholdDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            runs: HashMap::new(),
        }
    }

    /// Evaluates one process for this tick. `elapsed` is the wall time the
    /// tick covers for hysteresis purposes; the sampler passes zero on the
    /// first tick after a resume so pause gaps never count toward a
    /// sustained-duration run.
    pub fn evaluate(
        &mut self,
        key: ProcKey,
        sample: &ProcessSample,
        metrics: &DerivedMetrics,
        elapsed: f64,
    ) -> Option<Trigger> {
        let run = self.runs.entry(key).or_default();

        let cpu_high = metrics.cpu_percent >= self.config.cpu.threshold_percent;
        run.cpu_run_secs = if cpu_high {
            run.cpu_run_secs + elapsed
        } else {
            0.0
        };

        // New processes have no measured delta yet, so a growth run cannot
        // start on their first tick.
        let rss_growing = metrics.status == SampleStatus::Continuing
            && sample.rss_bytes >= self.config.memory.threshold_bytes
            && metrics.rss_delta >= -(self.config.memory.tolerance_bytes as i64);
        run.mem_run_secs = if rss_growing {
            run.mem_run_secs + elapsed
        } else {
            0.0
        };

        // CPU wins when both rules fire on the same tick.
        if cpu_high && run.cpu_run_secs >= self.config.cpu.duration_seconds {
            return Some(Trigger {
                kind: TriggerKind::Cpu,
                value: metrics.cpu_percent,
            });
        }
        if rss_growing && run.mem_run_secs >= self.config.memory.duration_seconds {
            return Some(Trigger {
                kind: TriggerKind::Memory,
                value: sample.rss_bytes as f64,
            });
        }
        None
    }

    /// Drops run state for processes no longer in the table.
    pub fn cleanup(&mut self, alive: &HashSet<ProcKey>) {
        self.runs.retain(|key, _| alive.contains(key));
    }
}
