//! Playback: engine interface and adapters, playlist controller, watchdog

pub mod controller;
pub mod engine;
pub mod mpv;
pub mod simulated;
pub mod watchdog;

pub use controller::{PlaybackController, PlaybackStatus};
pub use engine::{EngineError, EngineResult, MediaEngine, PlaybackSnapshot, PlaybackState};
pub use mpv::MpvEngine;
pub use simulated::SimulatedEngine;
pub use watchdog::{FreezeDetector, PlaybackWatchdog, WatchdogConfig, WatchdogPhase, WatchdogStatus};
