//! Playback window evaluation
//!
//! [`is_within_window`] decides whether a local date-time falls inside the
//! configured window. [`PlaybackScheduler`] samples it periodically and
//! edge-triggers the engine: play when the window opens, pause when it
//! closes, nothing while the decision is unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use avppi_common::time::{weekday_from_index, weekday_index};
use avppi_common::TimeOfDay;
use chrono::{Datelike, NaiveDateTime, Utc, Weekday};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::db::{ScheduleSettings, SettingsStore};
use crate::error::Result;
use crate::playback::PlaybackController;
use crate::state::{SharedState, SupervisorEvent};
use crate::tasks::ControlLoop;

/// Parsed playback window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub enabled: bool,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub days: Vec<Weekday>,
}

impl ScheduleWindow {
    /// Parse stored settings; `None` when a time is malformed
    pub fn from_settings(settings: &ScheduleSettings) -> Option<Self> {
        let start = TimeOfDay::parse(&settings.start).ok()?;
        let end = TimeOfDay::parse(&settings.end).ok()?;
        let days = settings.days.iter().filter_map(|d| weekday_from_index(*d)).collect();
        Some(Self {
            enabled: settings.enabled,
            start,
            end,
            days,
        })
    }

    fn includes(&self, day: Weekday) -> bool {
        self.days.contains(&day)
    }
}

/// True when `now` falls inside the window
///
/// - disabled: never inside (the scheduler resumes playback instead)
/// - `start == end`: all day on the selected days
/// - `start < end`: selected day and `start <= t < end`
/// - `start > end` (overnight): selected day and `t >= start`, or the
///   previous day selected and `t < end`
pub fn is_within_window(window: &ScheduleWindow, now: NaiveDateTime) -> bool {
    if !window.enabled || window.days.is_empty() {
        return false;
    }

    let weekday = now.weekday();
    let t = now.time();
    let start = window.start.as_naive();
    let end = window.end.as_naive();

    if start == end {
        return window.includes(weekday);
    }
    if start < end {
        return window.includes(weekday) && start <= t && t < end;
    }
    if window.includes(weekday) && t >= start {
        return true;
    }
    window.includes(weekday.pred()) && t < end
}

/// Evaluate stored settings; malformed times count as outside the window
pub fn settings_active(settings: &ScheduleSettings, now: NaiveDateTime) -> bool {
    match ScheduleWindow::from_settings(settings) {
        Some(window) => is_within_window(&window, now),
        None => {
            warn!(start = %settings.start, end = %settings.end, "Malformed schedule times, treating as inactive");
            false
        }
    }
}

/// Window sampling loop
pub struct PlaybackScheduler {
    store: SettingsStore,
    controller: Arc<PlaybackController>,
    state: Arc<SharedState>,
    clock: Arc<dyn Clock>,
    /// Last decision applied to the engine (`None` = unknown)
    last_active: Option<bool>,
}

impl PlaybackScheduler {
    pub fn new(
        store: SettingsStore,
        controller: Arc<PlaybackController>,
        state: Arc<SharedState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            controller,
            state,
            clock,
            last_active: None,
        }
    }

    pub fn last_active(&self) -> Option<bool> {
        self.last_active
    }

    /// One evaluation; public so tests can drive it without the loop
    pub async fn evaluate(&mut self) -> Result<()> {
        let settings = self.store.schedule().await?;

        if !settings.enabled {
            if self.last_active == Some(false) {
                info!("Schedule disabled, resuming playback");
                self.controller.play().await?;
                self.state
                    .broadcast_event(SupervisorEvent::WindowOpened { at: Utc::now() });
            }
            self.last_active = None;
            self.state.set_window_active(None).await;
            return Ok(());
        }

        let now = self.clock.now();
        let active = settings_active(&settings, now);
        let previous = self.last_active.unwrap_or(!active);

        if active && !previous {
            info!(weekday = weekday_index(now.weekday()), time = %now.format("%H:%M"), "Schedule window started, resuming playback");
            self.controller.play().await?;
            self.state
                .broadcast_event(SupervisorEvent::WindowOpened { at: Utc::now() });
        } else if !active && previous {
            info!(weekday = weekday_index(now.weekday()), time = %now.format("%H:%M"), "Schedule window ended, pausing playback");
            self.controller.pause().await?;
            self.state
                .broadcast_event(SupervisorEvent::WindowClosed { at: Utc::now() });
        } else {
            debug!(active, "Schedule window unchanged");
        }

        // Only remembered once the command went through, so a failed
        // transition is retried next tick
        self.last_active = Some(active);
        self.state.set_window_active(Some(active)).await;
        Ok(())
    }
}

#[async_trait]
impl ControlLoop for PlaybackScheduler {
    fn name(&self) -> &'static str {
        "playback_scheduler"
    }

    async fn tick(&mut self) -> Result<()> {
        self.evaluate().await
    }
}
