//! In-process simulated media engine
//!
//! Used for headless runs (`engine = "simulated"`) and as the test double for
//! the controller, watchdog and schedulers. Clones share the same state, so a
//! test can keep a handle after boxing the engine into the controller.
//!
//! Position advances with wall-clock time while playing (or only through
//! [`SimulatedEngine::advance`] in manual mode). Faults can be injected:
//! a frozen decoder that keeps reporting `Playing`, failing commands,
//! failing snapshots and slow (blocking) snapshots.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::engine::{EngineError, EngineResult, MediaEngine, PlaybackSnapshot, PlaybackState};

#[derive(Debug)]
struct SimState {
    entries: Vec<String>,
    current: Option<usize>,
    state: PlaybackState,
    volume: u8,
    /// Position accumulated before `running_since`
    base_position_ms: i64,
    running_since: Option<Instant>,
    auto_advance: bool,
    frozen: bool,
    fail_commands: bool,
    fail_snapshots: bool,
    snapshot_delay: Duration,
    commands: Vec<String>,
}

impl SimState {
    fn position_ms(&self) -> i64 {
        match (self.running_since, self.auto_advance, self.frozen) {
            (Some(since), true, false) => self.base_position_ms + since.elapsed().as_millis() as i64,
            _ => self.base_position_ms,
        }
    }

    /// Fold elapsed time into the base position and stop the clock
    fn settle(&mut self) {
        self.base_position_ms = self.position_ms();
        self.running_since = None;
    }

    fn start_clock(&mut self) {
        self.settle();
        self.running_since = Some(Instant::now());
    }

    fn begin_item(&mut self, index: usize) {
        self.current = Some(index);
        self.base_position_ms = 0;
        self.state = PlaybackState::Playing;
        self.running_since = Some(Instant::now());
    }
}

/// Simulated engine with shared, inspectable state
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    /// Engine whose position follows the wall clock while playing
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                entries: Vec::new(),
                current: None,
                state: PlaybackState::Stopped,
                volume: 100,
                base_position_ms: 0,
                running_since: None,
                auto_advance: true,
                frozen: false,
                fail_commands: false,
                fail_snapshots: false,
                snapshot_delay: Duration::ZERO,
                commands: Vec::new(),
            })),
        }
    }

    /// Engine whose position only moves through [`SimulatedEngine::advance`]
    pub fn manual() -> Self {
        let engine = Self::new();
        engine.state().auto_advance = false;
        engine
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, name: &str) -> EngineResult<MutexGuard<'_, SimState>> {
        let mut state = self.state();
        if state.fail_commands {
            return Err(EngineError::command(name, "injected failure"));
        }
        state.commands.push(name.to_string());
        Ok(state)
    }

    /// Move the position forward (manual mode, or on top of the wall clock)
    pub fn advance(&self, ms: i64) {
        let mut state = self.state();
        if state.state.is_active() && !state.frozen {
            state.base_position_ms += ms;
        }
    }

    /// Set the position of the current item
    pub fn set_position(&self, ms: i64) {
        let mut state = self.state();
        state.base_position_ms = ms;
        if state.running_since.is_some() {
            state.running_since = Some(Instant::now());
        }
    }

    /// Wedge the decoder: state stays `Playing` but the position stops
    pub fn freeze(&self) {
        let mut state = self.state();
        state.settle();
        state.frozen = true;
        if state.state == PlaybackState::Playing {
            state.running_since = Some(Instant::now());
        }
    }

    pub fn unfreeze(&self) {
        let mut state = self.state();
        state.frozen = false;
        if state.state == PlaybackState::Playing {
            state.running_since = Some(Instant::now());
        }
    }

    /// Force the reported playback state
    pub fn force_state(&self, playback_state: PlaybackState) {
        self.state().state = playback_state;
    }

    pub fn set_fail_commands(&self, fail: bool) {
        self.state().fail_commands = fail;
    }

    pub fn set_fail_snapshots(&self, fail: bool) {
        self.state().fail_snapshots = fail;
    }

    /// Block the calling thread for `delay` on every snapshot, like a
    /// player that answers its IPC slowly
    pub fn set_snapshot_delay(&self, delay: Duration) {
        self.state().snapshot_delay = delay;
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Engine-side playlist (inspection without the command log)
    pub fn playlist(&self) -> Vec<String> {
        self.state().entries.clone()
    }

    pub fn current_entry(&self) -> Option<String> {
        let state = self.state();
        state.current.and_then(|i| state.entries.get(i).cloned())
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.state().state
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaEngine for SimulatedEngine {
    fn play(&mut self) -> EngineResult<()> {
        let mut state = self.command("play")?;
        if state.entries.is_empty() {
            return Ok(());
        }
        if state.current.is_none() {
            state.begin_item(0);
            return Ok(());
        }
        if state.state != PlaybackState::Playing {
            if matches!(state.state, PlaybackState::Stopped | PlaybackState::Ended) {
                state.base_position_ms = 0;
            }
            state.state = PlaybackState::Playing;
            state.start_clock();
        }
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        let mut state = self.command("pause")?;
        if state.state.is_active() {
            state.settle();
            state.state = PlaybackState::Paused;
        }
        Ok(())
    }

    fn toggle_pause(&mut self) -> EngineResult<()> {
        let mut state = self.command("toggle_pause")?;
        match state.state {
            PlaybackState::Playing | PlaybackState::Buffering => {
                state.settle();
                state.state = PlaybackState::Paused;
            }
            PlaybackState::Paused => {
                state.state = PlaybackState::Playing;
                state.start_clock();
            }
            _ => {}
        }
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        let mut state = self.command("stop")?;
        state.running_since = None;
        state.base_position_ms = 0;
        state.state = PlaybackState::Stopped;
        Ok(())
    }

    fn next(&mut self) -> EngineResult<()> {
        let mut state = self.command("next")?;
        if state.entries.is_empty() {
            return Ok(());
        }
        let next = state.current.map(|i| (i + 1) % state.entries.len()).unwrap_or(0);
        state.begin_item(next);
        Ok(())
    }

    fn previous(&mut self) -> EngineResult<()> {
        let mut state = self.command("previous")?;
        if state.entries.is_empty() {
            return Ok(());
        }
        let len = state.entries.len();
        let prev = state.current.map(|i| (i + len - 1) % len).unwrap_or(0);
        state.begin_item(prev);
        Ok(())
    }

    fn set_volume(&mut self, percent: u8) -> EngineResult<()> {
        let mut state = self.command("set_volume")?;
        state.volume = percent.min(100);
        Ok(())
    }

    fn volume(&mut self) -> EngineResult<u8> {
        Ok(self.state().volume)
    }

    fn clear(&mut self) -> EngineResult<()> {
        let mut state = self.command("clear")?;
        state.entries.clear();
        state.current = None;
        state.running_since = None;
        state.base_position_ms = 0;
        state.state = PlaybackState::Stopped;
        Ok(())
    }

    fn append(&mut self, location: &str) -> EngineResult<()> {
        let mut state = self.command("append")?;
        state.entries.push(location.to_string());
        Ok(())
    }

    fn insert(&mut self, index: usize, location: &str) -> EngineResult<()> {
        let mut state = self.command("insert")?;
        let len = state.entries.len();
        if index > len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        state.entries.insert(index, location.to_string());
        if let Some(current) = state.current {
            if index <= current {
                state.current = Some(current + 1);
            }
        }
        Ok(())
    }

    fn entries(&mut self) -> EngineResult<Vec<String>> {
        Ok(self.state().entries.clone())
    }

    fn current_index(&mut self) -> EngineResult<Option<usize>> {
        Ok(self.state().current)
    }

    fn play_index(&mut self, index: usize) -> EngineResult<()> {
        let mut state = self.command("play_index")?;
        let len = state.entries.len();
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        state.begin_item(index);
        Ok(())
    }

    fn snapshot(&mut self) -> EngineResult<PlaybackSnapshot> {
        let delay = self.state().snapshot_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let state = self.state();
        if state.fail_snapshots {
            return Err(EngineError::Unavailable("injected snapshot failure".to_string()));
        }
        let media = state
            .current
            .and_then(|i| state.entries.get(i).cloned())
            .unwrap_or_default();
        Ok(PlaybackSnapshot::new(media, state.position_ms(), state.state))
    }
}
