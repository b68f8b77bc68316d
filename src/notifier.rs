//! Desktop notification forwarding
//!
//! The forwarder turns alert-state transitions into create/replace/close
//! calls against the freedesktop notification service, and keeps working
//! (as a no-op) when no such service is present. Availability is probed at
//! startup; any failed call flips the forwarder into a disabled mode from
//! which it periodically re-probes, so a notification daemon started later
//! is picked up without a restart.

use crate::alerts::AlertState;
use crate::config::DetectionConfig;
use crate::detector::TriggerKind;
use notify_rust::{Notification, NotificationHandle, Timeout};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Ticks between availability re-probes while the transport is down.
const REPROBE_TICKS: u32 = 15;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport unavailable")]
    Unavailable,
    #[error("notification no longer exists")]
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

/// The notification service boundary. Kept minimal so tests can substitute
/// a scripted transport.
pub trait NotifyTransport: Send {
    /// Availability check without side effects.
    fn probe(&mut self) -> bool;
    fn create(&mut self, title: &str, body: &str, urgency: Urgency) -> Result<u32, NotifyError>;
    fn replace(&mut self, id: u32, body: &str) -> Result<(), NotifyError>;
    fn close(&mut self, id: u32);
}

/// notify-rust backed transport. Handles are retained so the notification
/// can be replaced in place and closed on retraction.
pub struct DesktopNotifier {
    handles: HashMap<u32, NotificationHandle>,
    timeout: Timeout,
}

impl DesktopNotifier {
    pub fn new(timeout_seconds: u32) -> Self {
        let timeout = if timeout_seconds == 0 {
            Timeout::Never
        } else {
            Timeout::Milliseconds(timeout_seconds * 1000)
        };
        Self {
            handles: HashMap::new(),
            timeout,
        }
    }
}

impl NotifyTransport for DesktopNotifier {
    fn probe(&mut self) -> bool {
        notify_rust::get_server_information().is_ok()
    }

    fn create(&mut self, title: &str, body: &str, urgency: Urgency) -> Result<u32, NotifyError> {
        let urgency = match urgency {
            Urgency::Low => notify_rust::Urgency::Low,
            Urgency::Normal => notify_rust::Urgency::Normal,
            Urgency::Critical => notify_rust::Urgency::Critical,
        };
        let handle = Notification::new()
            .appname("procwatch")
            .icon("dialog-warning")
            .summary(title)
            .body(body)
            .urgency(urgency)
            .timeout(self.timeout)
            .show()
            .map_err(|_| NotifyError::Unavailable)?;
        let id = handle.id();
        self.handles.insert(id, handle);
        Ok(id)
    }

    fn replace(&mut self, id: u32, body: &str) -> Result<(), NotifyError> {
        // The freedesktop protocol cannot report whether the target was
        // dismissed; a replace against a dismissed id silently re-displays.
        let handle = self.handles.get_mut(&id).ok_or(NotifyError::Stale)?;
        handle.body(body);
        handle.update();
        Ok(())
    }

    fn close(&mut self, id: u32) {
        if let Some(handle) = self.handles.remove(&id) {
            handle.close();
        }
    }
}

/// What the forwarder did with a continuing alert's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Existing notification replaced in place (or nothing to do).
    Unchanged,
    /// A fresh notification was opened (transport recovered mid-episode).
    Opened(u32),
    /// The old notification had vanished; a replacement was opened. The
    /// episode must be latched so this happens at most once.
    Reopened(u32),
    /// The handle is gone and no replacement was made.
    Cleared,
}

pub struct NotificationForwarder<T: NotifyTransport> {
    transport: T,
    detection: DetectionConfig,
    available: bool,
    notify_on: bool,
    ticks_until_reprobe: u32,
}

impl<T: NotifyTransport> NotificationForwarder<T> {
    pub fn new(mut transport: T, detection: DetectionConfig, notify_on: bool) -> Self {
        let available = transport.probe();
        if !available {
            warn!("notification transport unavailable at startup, running without desktop notifications");
        }
        Self {
            transport,
            detection,
            available,
            notify_on,
            ticks_until_reprobe: REPROBE_TICKS,
        }
    }

    pub fn available(&self) -> bool {
        self.available
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notify_on
    }

    pub fn set_notifications(&mut self, on: bool) {
        self.notify_on = on;
        info!(enabled = on, "desktop notifications toggled");
    }

    /// Called once per sample tick; drives the bounded re-probe while the
    /// transport is down.
    pub fn tick(&mut self) {
        if self.available {
            return;
        }
        if self.ticks_until_reprobe > 0 {
            self.ticks_until_reprobe -= 1;
            return;
        }
        if self.transport.probe() {
            self.available = true;
            info!("notification transport available again");
        } else {
            self.ticks_until_reprobe = REPROBE_TICKS;
        }
    }

    fn mark_unavailable(&mut self) {
        self.available = false;
        self.ticks_until_reprobe = REPROBE_TICKS;
        warn!("notification transport unreachable, disabling until it returns");
    }

    /// New offense episode: open a notification. None when the transport is
    /// down or notifications are switched off; the alert itself stays live
    /// in published state either way.
    pub fn open(&mut self, state: &AlertState) -> Option<u32> {
        if !self.notify_on || !self.available {
            return None;
        }
        match self
            .transport
            .create(&self.title(state), &self.body(state), Urgency::Normal)
        {
            Ok(id) => {
                debug!(pid = state.key.pid, id, "notification opened");
                Some(id)
            }
            Err(_) => {
                self.mark_unavailable();
                None
            }
        }
    }

    /// Continuing offense: refresh the live notification. Re-opens once per
    /// episode if the user dismissed it externally; after that the episode
    /// stays silent until it ends.
    pub fn update(&mut self, state: &AlertState) -> Delivery {
        if !self.notify_on || !self.available {
            return Delivery::Unchanged;
        }
        let body = self.body(state);
        let Some(id) = state.handle else {
            if state.reopened {
                // Already notified and dismissed; nothing more this episode.
                return Delivery::Unchanged;
            }
            // No handle yet (transport was down when the episode started).
            return match self.transport.create(&self.title(state), &body, Urgency::Normal) {
                Ok(id) => Delivery::Opened(id),
                Err(_) => {
                    self.mark_unavailable();
                    Delivery::Unchanged
                }
            };
        };
        match self.transport.replace(id, &body) {
            Ok(()) => Delivery::Unchanged,
            Err(NotifyError::Stale) => {
                if state.reopened {
                    return Delivery::Cleared;
                }
                match self.transport.create(&self.title(state), &body, Urgency::Normal) {
                    Ok(new_id) => {
                        debug!(pid = state.key.pid, new_id, "notification re-opened after dismissal");
                        Delivery::Reopened(new_id)
                    }
                    Err(_) => {
                        self.mark_unavailable();
                        Delivery::Cleared
                    }
                }
            }
            Err(NotifyError::Unavailable) => {
                self.mark_unavailable();
                Delivery::Unchanged
            }
        }
    }

    /// Episode over (process recovered or exited): close the notification.
    pub fn close(&mut self, state: &AlertState) {
        if let Some(id) = state.handle {
            if self.available {
                self.transport.close(id);
            }
        }
    }

    pub fn close_all(&mut self, states: &[AlertState]) {
        for state in states {
            self.close(state);
        }
    }

    fn title(&self, state: &AlertState) -> String {
        let name = short_name(&state.comm);
        match state.kind {
            TriggerKind::Cpu => format!("High CPU use [{}]", name),
            TriggerKind::Memory => format!("Resident memory growth [{}]", name),
        }
    }

    fn body(&self, state: &AlertState) -> String {
        let sustained = state.last_seen - state.since;
        match state.kind {
            TriggerKind::Cpu => format!(
                "PID {} ({}) CPU >= {:.0}% for {:.0} seconds, peak {:.0}%",
                state.key.pid,
                state.comm,
                self.detection.cpu.threshold_percent,
                sustained + self.detection.cpu.duration_seconds,
                state.peak,
            ),
            TriggerKind::Memory => format!(
                "PID {} ({}) rss above {:.0} MB and growing for at least {:.0} seconds, peak {:.0} MB",
                state.key.pid,
                state.comm,
                self.detection.memory.threshold_bytes as f64 / 1_000_000.0,
                sustained + self.detection.memory.duration_seconds,
                state.peak / 1_000_000.0,
            ),
        }
    }
}

fn short_name(comm: &str) -> String {
    if comm.chars().count() > 20 {
        let head: String = comm.chars().take(18).collect();
        format!("{}..", head)
    } else {
        comm.to_string()
    }
}
