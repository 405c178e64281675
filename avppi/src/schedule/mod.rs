//! Time-driven supervisor loops: playback window and daily sync

pub mod sync_trigger;
pub mod window;

pub use sync_trigger::{ScheduledSync, SyncTrigger, TriggerOutcome};
pub use window::{is_within_window, settings_active, PlaybackScheduler, ScheduleWindow};
