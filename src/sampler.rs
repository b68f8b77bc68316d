//! The sampling loop: capture, evaluate, forward, publish
//!
//! One tick runs to completion before the next may fire; an overrunning
//! tick defers the next one rather than running concurrently. The loop is
//! the single writer of all alert state; everything it shares with the
//! control socket goes out as immutable copies on a watch channel.

use crate::alerts::{AlertState, AlertStateStore, Upsert};
use crate::collector::{ProcKey, Snapshot, SnapshotSource};
use crate::config::Config;
use crate::detector::ThresholdDetector;
use crate::metrics::{self, DerivedMetrics, SampleStatus};
use crate::notifier::{Delivery, NotificationForwarder, NotifyTransport};
use crate::protocol::{AlertEntry, Response};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
    SetNotifications(bool),
    Shutdown,
}

/// Everything the presentation side may read, re-published after every
/// completed tick. Cheap to clone; readers never mutate.
#[derive(Clone)]
pub struct PublishedState {
    pub snapshot: Arc<Snapshot>,
    pub metrics: Arc<HashMap<ProcKey, DerivedMetrics>>,
    pub alerts: Arc<Vec<AlertState>>,
    pub paused: bool,
    pub notifications_enabled: bool,
    pub alerts_raised: u64,
}

impl Default for PublishedState {
    fn default() -> Self {
        PublishedState {
            snapshot: Arc::new(Snapshot::new(0.0)),
            metrics: Arc::new(HashMap::new()),
            alerts: Arc::new(Vec::new()),
            paused: false,
            notifications_enabled: true,
            alerts_raised: 0,
        }
    }
}

pub struct SampleLoop<S: SnapshotSource, T: NotifyTransport> {
    source: S,
    detector: ThresholdDetector,
    store: AlertStateStore,
    forwarder: NotificationForwarder<T>,
    interval_secs: f64,
    core_count: u32,
    prev: Option<Arc<Snapshot>>,
    paused: bool,
    /// Set on resume; the next tick's hysteresis elapsed is forced to zero
    /// so a pause gap never counts toward a sustained-duration run.
    resumed: bool,
    alerts_raised: u64,
    publish_tx: watch::Sender<PublishedState>,
    events_tx: broadcast::Sender<String>,
}

impl<S: SnapshotSource, T: NotifyTransport> SampleLoop<S, T> {
    pub fn new(
        config: Config,
        source: S,
        transport: T,
        events_tx: broadcast::Sender<String>,
    ) -> (Self, watch::Receiver<PublishedState>) {
        let core_count = config.effective_core_count();
        let forwarder = NotificationForwarder::new(
            transport,
            config.detection.clone(),
            config.general.notifications_enabled,
        );
        let (publish_tx, publish_rx) = watch::channel(PublishedState {
            notifications_enabled: config.general.notifications_enabled,
            ..PublishedState::default()
        });
        let sampler = SampleLoop {
            source,
            detector: ThresholdDetector::new(config.detection),
            store: AlertStateStore::new(),
            forwarder,
            interval_secs: config.general.sample_interval_seconds,
            core_count,
            prev: None,
            paused: false,
            resumed: false,
            alerts_raised: 0,
            publish_tx,
            events_tx,
        };
        (sampler, publish_rx)
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let period = Duration::from_secs_f64(self.interval_secs.max(0.1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.paused {
                        self.tick();
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(Command::Pause) => self.pause(),
                    Some(Command::Resume) => self.resume(),
                    Some(Command::SetNotifications(on)) => {
                        self.forwarder.set_notifications(on);
                        self.publish_flags();
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }
        self.shutdown();
    }

    /// Suspends the timer-driven ticks. Existing alert state and open
    /// notifications are deliberately left untouched.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            info!("sampling paused, alert state left untouched");
            self.publish_flags();
        }
    }

    /// Resumes ticking. The pause gap is excluded from sustained-duration
    /// accounting so a long pause cannot manufacture an offense.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.resumed = true;
            info!("sampling resumed");
            self.publish_flags();
        }
    }

    /// One complete tick: capture, compute deltas, evaluate every key in
    /// the union of previous and current snapshots, drive notifications,
    /// publish. Synchronous on purpose so tests can step it with scripted
    /// sources and synthetic timestamps.
    pub fn tick(&mut self) {
        let cur = match self.source.capture() {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                // Keep previous snapshot and alert state; retry next tick.
                error!(error = %e, "snapshot capture failed");
                return;
            }
        };
        let metrics = Arc::new(metrics::compute(
            self.prev.as_deref(),
            &cur,
            self.core_count,
        ));
        let elapsed = self
            .prev
            .as_ref()
            .map(|p| (cur.taken_at - p.taken_at).max(0.0))
            .unwrap_or(0.0);
        let hyst_elapsed = if self.resumed { 0.0 } else { elapsed };
        self.resumed = false;

        self.forwarder.tick();

        for (key, m) in metrics.iter() {
            if m.status == SampleStatus::Removed {
                if let Some(state) = self.store.retract(key) {
                    info!(pid = key.pid, comm = %state.comm, "offending process exited, alert retracted");
                    self.forwarder.close(&state);
                }
                continue;
            }
            let Some(sample) = cur.processes.get(key) else {
                continue;
            };
            match self.detector.evaluate(*key, sample, m, hyst_elapsed) {
                Some(trigger) => {
                    // A different rule taking over ends the old episode.
                    if self.store.get(key).is_some_and(|s| s.kind != trigger.kind) {
                        if let Some(old) = self.store.retract(key) {
                            self.forwarder.close(&old);
                        }
                    }
                    let outcome = self.store.upsert(*key, &trigger, sample, cur.taken_at);
                    let Some(state) = self.store.get(key).cloned() else {
                        continue;
                    };
                    match outcome {
                        Upsert::Started => {
                            self.alerts_raised += 1;
                            info!(
                                pid = key.pid,
                                comm = %state.comm,
                                kind = ?state.kind,
                                value = trigger.value,
                                "process offending"
                            );
                            let handle = self.forwarder.open(&state);
                            self.store.set_handle(key, handle);
                            self.broadcast_alert(&state);
                        }
                        Upsert::Continuing => match self.forwarder.update(&state) {
                            Delivery::Unchanged => {}
                            Delivery::Opened(id) => self.store.set_handle(key, Some(id)),
                            Delivery::Reopened(id) => {
                                self.store.set_handle(key, Some(id));
                                self.store.mark_reopened(key);
                            }
                            Delivery::Cleared => self.store.set_handle(key, None),
                        },
                    }
                }
                None => {
                    if let Some(state) = self.store.retract(key) {
                        info!(pid = key.pid, comm = %state.comm, "process back under limits, alert cleared");
                        self.forwarder.close(&state);
                    }
                }
            }
        }

        let alive: HashSet<ProcKey> = cur.processes.keys().copied().collect();
        self.detector.cleanup(&alive);

        self.publish(Arc::clone(&cur), metrics);
        self.prev = Some(cur);
    }

    fn publish(&self, snapshot: Arc<Snapshot>, metrics: Arc<HashMap<ProcKey, DerivedMetrics>>) {
        let state = PublishedState {
            snapshot,
            metrics,
            alerts: Arc::new(self.store.to_vec()),
            paused: self.paused,
            notifications_enabled: self.forwarder.notifications_enabled(),
            alerts_raised: self.alerts_raised,
        };
        // Send even with no receivers; late subscribers get the last state.
        let _ = self.publish_tx.send(state);
    }

    fn publish_flags(&self) {
        self.publish_tx.send_modify(|state| {
            state.paused = self.paused;
            state.notifications_enabled = self.forwarder.notifications_enabled();
        });
    }

    fn broadcast_alert(&self, state: &AlertState) {
        let event = Response::Alert {
            data: AlertEntry::from(state),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            let _ = self.events_tx.send(json);
        }
    }

    fn shutdown(&mut self) {
        let states = self.store.retract_all();
        if !states.is_empty() {
            info!(count = states.len(), "closing open notifications on shutdown");
        }
        self.forwarder.close_all(&states);
    }
}
