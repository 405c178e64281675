//! Media engine interface
//!
//! The engine is the external player that actually renders video. The rest
//! of the crate talks to it only through [`MediaEngine`]: transport commands,
//! its internal playlist, and point-in-time [`PlaybackSnapshot`]s.
//!
//! Adapters normalize whatever state model the player exposes into the closed
//! [`PlaybackState`] set.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Closed set of playback states reported by engine adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    Buffering,
    Ended,
    Error,
    Unknown,
}

impl PlaybackState {
    /// States in which the position is expected to advance
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Buffering)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Ended => "ended",
            PlaybackState::Error => "error",
            PlaybackState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the engine, produced on demand and never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    /// Stable identity of the current item (engine location, usually an absolute path)
    pub media: String,
    /// Position in the current item; negative when the engine has none
    pub position_ms: i64,
    pub state: PlaybackState,
}

impl PlaybackSnapshot {
    pub fn new(media: impl Into<String>, position_ms: i64, state: PlaybackState) -> Self {
        Self {
            media: media.into(),
            position_ms,
            state,
        }
    }
}

/// Engine adapter failures
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected or failed a command
    #[error("engine command '{command}' failed: {reason}")]
    Command { command: String, reason: String },

    /// The engine process or connection is not available
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// Index outside the engine playlist
    #[error("playlist index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Transport-level I/O failure
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Capability set of an external media player
///
/// Implementations are driven exclusively by the playback controller, which
/// serializes every call behind its command lock, so methods take `&mut self`.
/// Locations are engine-level item identifiers (absolute paths for local
/// files, or player-specific URLs for the idle clip).
pub trait MediaEngine: Send {
    /// Resume or start playback of the current item
    fn play(&mut self) -> EngineResult<()>;

    /// Pause (idempotent: pausing a paused engine is a no-op)
    fn pause(&mut self) -> EngineResult<()>;

    /// Toggle between playing and paused
    fn toggle_pause(&mut self) -> EngineResult<()>;

    /// Stop playback, keeping the engine playlist
    fn stop(&mut self) -> EngineResult<()>;

    fn next(&mut self) -> EngineResult<()>;

    fn previous(&mut self) -> EngineResult<()>;

    /// Set output volume, 0-100
    fn set_volume(&mut self, percent: u8) -> EngineResult<()>;

    /// Current output volume, 0-100
    fn volume(&mut self) -> EngineResult<u8>;

    /// Remove every entry from the engine playlist
    fn clear(&mut self) -> EngineResult<()>;

    /// Append an entry to the engine playlist
    fn append(&mut self, location: &str) -> EngineResult<()>;

    /// Insert an entry at `index` (`index == len` appends)
    fn insert(&mut self, index: usize, location: &str) -> EngineResult<()>;

    /// Engine playlist, in order
    fn entries(&mut self) -> EngineResult<Vec<String>>;

    /// Index of the current entry, if any
    fn current_index(&mut self) -> EngineResult<Option<usize>>;

    /// Start playing the entry at `index`
    fn play_index(&mut self, index: usize) -> EngineResult<()>;

    fn snapshot(&mut self) -> EngineResult<PlaybackSnapshot>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(PlaybackState::Playing.is_active());
        assert!(PlaybackState::Buffering.is_active());
        for state in [
            PlaybackState::Paused,
            PlaybackState::Stopped,
            PlaybackState::Ended,
            PlaybackState::Error,
            PlaybackState::Unknown,
        ] {
            assert!(!state.is_active(), "{} should not be active", state);
        }
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&PlaybackState::Buffering).unwrap();
        assert_eq!(json, "\"buffering\"");
    }
}
