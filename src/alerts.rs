//! Per-process alert state lifecycle

use crate::collector::{ProcKey, ProcessSample};
use crate::detector::{Trigger, TriggerKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// State of one offense episode. An entry exists iff the process is
/// currently offending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub key: ProcKey,
    pub comm: String,
    pub kind: TriggerKind,
    /// When the episode started, seconds since the epoch.
    pub since: f64,
    /// Last tick the offense was still live.
    pub last_seen: f64,
    /// Maximum reading of the triggering metric during this episode.
    pub peak: f64,
    /// Open notification id, if the forwarder's create succeeded.
    pub handle: Option<u32>,
    /// Set once the notification has been re-opened after an external
    /// dismissal; the episode then stays silent until it ends.
    pub reopened: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Started,
    Continuing,
}

/// Process-indexed alert table. Single writer: the sample loop. Readers only
/// ever see cloned copies via the published state.
#[derive(Default)]
pub struct AlertStateStore {
    entries: HashMap<ProcKey, AlertState>,
}

impl AlertStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ProcKey) -> Option<&AlertState> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Creates or refreshes the entry for an offending process. The episode
    /// clock starts only on the tick where the offense first appears.
    pub fn upsert(
        &mut self,
        key: ProcKey,
        trigger: &Trigger,
        sample: &ProcessSample,
        now: f64,
    ) -> Upsert {
        match self.entries.get_mut(&key) {
            Some(state) => {
                state.last_seen = now;
                state.peak = state.peak.max(trigger.value);
                Upsert::Continuing
            }
            None => {
                self.entries.insert(
                    key,
                    AlertState {
                        key,
                        comm: sample.comm.clone(),
                        kind: trigger.kind,
                        since: now,
                        last_seen: now,
                        peak: trigger.value,
                        handle: None,
                        reopened: false,
                    },
                );
                Upsert::Started
            }
        }
    }

    pub fn set_handle(&mut self, key: &ProcKey, handle: Option<u32>) {
        if let Some(state) = self.entries.get_mut(key) {
            state.handle = handle;
        }
    }

    pub fn mark_reopened(&mut self, key: &ProcKey) {
        if let Some(state) = self.entries.get_mut(key) {
            state.reopened = true;
        }
    }

    /// Removes the entry, handing back its state (and any open notification
    /// handle inside) for the forwarder to close.
    pub fn retract(&mut self, key: &ProcKey) -> Option<AlertState> {
        self.entries.remove(key)
    }

    /// Shutdown path: drains every entry so all notifications get closed.
    pub fn retract_all(&mut self) -> Vec<AlertState> {
        self.entries.drain().map(|(_, state)| state).collect()
    }

    /// Cloned view for publishing, ordered by key for stable output.
    pub fn to_vec(&self) -> Vec<AlertState> {
        let mut alerts: Vec<AlertState> = self.entries.values().cloned().collect();
        alerts.sort_by_key(|a| a.key);
        alerts
    }
}
