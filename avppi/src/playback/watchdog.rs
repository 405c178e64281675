//! Playback watchdog
//!
//! Compares successive engine snapshots to detect a wedged decoder: the
//! engine keeps reporting `playing` (or `buffering`) while the position does
//! not move. Recovery is tiered:
//!
//! 1. soft: stop and restart the current item, bounded by
//!    `max_soft_recoveries` consecutive attempts
//! 2. hard: remove the item from the playlist and resume the next one (the
//!    idle clip when nothing is left)
//!
//! ```text
//!   Idle ──active snapshot──▶ Stable ──no progress──▶ Stalling
//!                               ▲                        │ stalled ≥ threshold
//!                               │ progress / new media   ▼
//!                               └──────────────────── Recovering
//! ```
//!
//! The stall window restarts after every escalation. The stall counter
//! resets whenever the position advances; the attempt counter only once
//! playback gets past the position the last recovery was issued at, so an
//! item that replays fine up to the same broken spot still escalates. Both
//! reset when the media identity changes or playback is not active. The
//! first snapshot after a restart is a new baseline: the seek back to zero
//! caused by the restart itself is not progress.
//!
//! The engine lock is held only for the snapshot read and the recovery
//! command, never across the wait between ticks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use avppi_common::config::WatchdogToml;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::controller::PlaybackController;
use super::engine::PlaybackSnapshot;
use crate::error::Result;
use crate::state::{RecoveryAction, SharedState, SupervisorEvent};
use crate::tasks::ControlLoop;

/// Backward jump treated as an operator seek rather than a stall
pub const SEEK_BACK_TOLERANCE_MS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub tick_interval: Duration,
    pub freeze_threshold: Duration,
    /// Minimum forward movement per tick counted as progress
    pub min_progress_ms: i64,
    /// Soft restarts tried before the item is removed
    pub max_soft_recoveries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self::from(&WatchdogToml::default())
    }
}

impl From<&WatchdogToml> for WatchdogConfig {
    fn from(raw: &WatchdogToml) -> Self {
        Self {
            enabled: raw.enabled,
            tick_interval: Duration::from_secs(raw.tick_interval_secs.max(1)),
            freeze_threshold: Duration::from_secs(raw.freeze_threshold_secs),
            min_progress_ms: raw.min_progress_ms.max(1),
            max_soft_recoveries: raw.max_soft_recoveries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum WatchdogPhase {
    /// Nothing is playing
    Idle,
    /// Position is advancing
    Stable,
    /// No progress for `stalled_ms`
    Stalling { stalled_ms: u64 },
    /// A recovery was issued; waiting for progress
    Recovering { attempts: u32 },
}

/// Watchdog view published to shared state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogStatus {
    pub enabled: bool,
    #[serde(flatten)]
    pub phase: WatchdogPhase,
    pub recovery_attempts: u32,
    pub media: Option<String>,
    pub position_ms: Option<i64>,
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for WatchdogStatus {
    fn default() -> Self {
        Self {
            enabled: false,
            phase: WatchdogPhase::Idle,
            recovery_attempts: 0,
            media: None,
            position_ms: None,
            last_check: None,
        }
    }
}

/// Recovery requested by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovery {
    pub action: RecoveryAction,
    /// 1-based attempt number within the current escalation sequence
    pub attempt: u32,
}

/// Snapshot-driven freeze detection state machine
#[derive(Debug)]
pub struct FreezeDetector {
    config: WatchdogConfig,
    last: Option<PlaybackSnapshot>,
    stalled: Duration,
    attempts: u32,
    /// Position of the last recovery while `attempts > 0`
    frozen_at: Option<i64>,
    rebaseline: bool,
    phase: WatchdogPhase,
}

impl FreezeDetector {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last: None,
            stalled: Duration::ZERO,
            attempts: 0,
            frozen_at: None,
            rebaseline: false,
            phase: WatchdogPhase::Idle,
        }
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn stalled(&self) -> Duration {
        self.stalled
    }

    fn reset(&mut self) {
        self.stalled = Duration::ZERO;
        self.attempts = 0;
        self.frozen_at = None;
        self.rebaseline = false;
    }

    /// Position is short of where the last recovery was issued
    fn before_frozen_point(&self, snapshot: &PlaybackSnapshot) -> bool {
        matches!(self.frozen_at, Some(frozen) if snapshot.position_ms <= frozen + self.config.min_progress_ms)
    }

    fn advanced(&self, previous: &PlaybackSnapshot, current: &PlaybackSnapshot) -> bool {
        let delta = current.position_ms - previous.position_ms;
        delta >= self.config.min_progress_ms || delta < -SEEK_BACK_TOLERANCE_MS
    }

    /// Feed one tick's snapshot; returns the recovery to perform, if any
    pub fn observe(&mut self, snapshot: &PlaybackSnapshot) -> Option<Recovery> {
        let verdict = self.evaluate(snapshot);
        self.last = Some(snapshot.clone());
        verdict
    }

    fn evaluate(&mut self, snapshot: &PlaybackSnapshot) -> Option<Recovery> {
        if !snapshot.state.is_active() || snapshot.position_ms < 0 {
            self.reset();
            self.phase = WatchdogPhase::Idle;
            return None;
        }

        let previous = match &self.last {
            Some(previous) if previous.state.is_active() && previous.position_ms >= 0 => previous,
            _ => {
                self.phase = WatchdogPhase::Stable;
                return None;
            }
        };

        if previous.media != snapshot.media {
            debug!(media = %snapshot.media, "Media changed, watchdog counters reset");
            self.reset();
            self.phase = WatchdogPhase::Stable;
            return None;
        }

        if self.rebaseline {
            self.rebaseline = false;
            return None;
        }

        if self.advanced(previous, snapshot) {
            self.stalled = Duration::ZERO;
            self.phase = WatchdogPhase::Stable;
            if !self.before_frozen_point(snapshot) {
                if self.attempts > 0 {
                    info!(media = %snapshot.media, "Playback progressed past the frozen point");
                }
                self.reset();
            }
            return None;
        }

        self.stalled += self.config.tick_interval;
        if self.stalled < self.config.freeze_threshold {
            self.phase = WatchdogPhase::Stalling {
                stalled_ms: self.stalled.as_millis() as u64,
            };
            return None;
        }

        self.stalled = Duration::ZERO;
        self.rebaseline = true;
        let recovery = if self.attempts < self.config.max_soft_recoveries {
            self.attempts += 1;
            self.frozen_at = Some(snapshot.position_ms);
            Recovery {
                action: RecoveryAction::Restart,
                attempt: self.attempts,
            }
        } else {
            let attempt = self.attempts + 1;
            self.attempts = 0;
            self.frozen_at = None;
            Recovery {
                action: RecoveryAction::Remove,
                attempt,
            }
        };
        self.phase = WatchdogPhase::Recovering {
            attempts: recovery.attempt,
        };
        Some(recovery)
    }
}

/// Watchdog control loop
pub struct PlaybackWatchdog {
    controller: Arc<PlaybackController>,
    state: Arc<SharedState>,
    detector: FreezeDetector,
    enabled: bool,
}

impl PlaybackWatchdog {
    pub fn new(controller: Arc<PlaybackController>, state: Arc<SharedState>, config: WatchdogConfig) -> Self {
        let enabled = config.enabled;
        Self {
            controller,
            state,
            detector: FreezeDetector::new(config),
            enabled,
        }
    }

    async fn publish(&self, snapshot: Option<&PlaybackSnapshot>) {
        self.state
            .set_watchdog_status(WatchdogStatus {
                enabled: self.enabled,
                phase: self.detector.phase(),
                recovery_attempts: self.detector.attempts(),
                media: snapshot.map(|s| s.media.clone()),
                position_ms: snapshot.map(|s| s.position_ms),
                last_check: Some(Utc::now()),
            })
            .await;
    }

    async fn recover(&self, recovery: Recovery, snapshot: &PlaybackSnapshot) -> Result<()> {
        self.state.increment_watchdog_interventions();
        self.state.broadcast_event(SupervisorEvent::WatchdogIntervention {
            media: snapshot.media.clone(),
            action: recovery.action,
            attempt: recovery.attempt,
            at: Utc::now(),
        });

        match recovery.action {
            RecoveryAction::Restart => {
                warn!(
                    media = %snapshot.media,
                    position_ms = snapshot.position_ms,
                    attempt = recovery.attempt,
                    "Playback frozen, restarting current item"
                );
                self.controller.recover(false).await
            }
            RecoveryAction::Remove => {
                error!(
                    media = %snapshot.media,
                    attempt = recovery.attempt,
                    "Playback still frozen after restarts, removing item"
                );
                match self.controller.remove_current_media().await? {
                    Some(name) => {
                        info!(media = %name, "Frozen item removed from playlist");
                        Ok(())
                    }
                    None => {
                        warn!("Frozen item not found in playlist, restarting instead");
                        self.controller.recover(false).await
                    }
                }
            }
        }
    }
}

#[async_trait]
impl ControlLoop for PlaybackWatchdog {
    fn name(&self) -> &'static str {
        "playback_watchdog"
    }

    async fn tick(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let snapshot = match self.controller.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Watchdog snapshot failed, skipping tick: {}", e);
                return Ok(());
            }
        };

        let verdict = self.detector.observe(&snapshot);
        self.publish(Some(&snapshot)).await;

        if let Some(recovery) = verdict {
            self.recover(recovery, &snapshot).await?;
        }
        Ok(())
    }
}
