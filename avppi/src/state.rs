//! Shared supervisor state
//!
//! Thread-safe state observed across the control loops and the HTTP API:
//! the event broadcaster, the last window decision, the watchdog status and
//! the intervention counter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};

use crate::playback::watchdog::WatchdogStatus;

/// Recovery tier applied by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Stop and restart the current item
    Restart,
    /// Remove the current item from the playlist
    Remove,
}

/// What started a remote sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOrigin {
    Startup,
    Scheduled,
    Operator,
}

/// Supervisor events broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// Playback window opened, playback resumed
    WindowOpened { at: DateTime<Utc> },
    /// Playback window closed, playback paused
    WindowClosed { at: DateTime<Utc> },
    SyncStarted { origin: SyncOrigin, at: DateTime<Utc> },
    SyncFinished {
        origin: SyncOrigin,
        success: bool,
        message: String,
        at: DateTime<Utc>,
    },
    PlaylistReloaded { items: usize, at: DateTime<Utc> },
    WatchdogIntervention {
        media: String,
        action: RecoveryAction,
        attempt: u32,
        at: DateTime<Utc>,
    },
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster
    pub event_tx: broadcast::Sender<SupervisorEvent>,

    /// Last decision of the window loop (`None` = unknown / schedule disabled)
    pub window_active: RwLock<Option<bool>>,

    /// Latest watchdog view, published every tick
    pub watchdog: RwLock<WatchdogStatus>,

    /// Total watchdog recoveries since startup
    pub watchdog_interventions_total: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            event_tx,
            window_active: RwLock::new(None),
            watchdog: RwLock::new(WatchdogStatus::default()),
            watchdog_interventions_total: AtomicU64::new(0),
        }
    }

    /// Broadcast an event (no subscribers is fine)
    pub fn broadcast_event(&self, event: SupervisorEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    pub async fn window_active(&self) -> Option<bool> {
        *self.window_active.read().await
    }

    pub async fn set_window_active(&self, active: Option<bool>) {
        *self.window_active.write().await = active;
    }

    pub async fn watchdog_status(&self) -> WatchdogStatus {
        self.watchdog.read().await.clone()
    }

    pub async fn set_watchdog_status(&self, status: WatchdogStatus) {
        *self.watchdog.write().await = status;
    }

    pub fn increment_watchdog_interventions(&self) {
        self.watchdog_interventions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_watchdog_interventions(&self) -> u64 {
        self.watchdog_interventions_total.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
