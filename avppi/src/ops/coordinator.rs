//! Operation coordinator
//!
//! At most one long-running operator job (remote sync, remote test,
//! sanitize, remote config update, rescan, insert) runs at a time.
//! Acquisition never blocks: a second request while busy is rejected and the
//! caller reports a conflict. Release is scoped through [`JobGuard`], so a job
//! that fails or panics still frees the slot.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Kinds of long-running jobs arbitrated by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Sync,
    Test,
    Sanitize,
    ConfigUpdate,
    Rescan,
    Insert,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Sync => "sync",
            JobKind::Test => "test",
            JobKind::Sanitize => "sanitize",
            JobKind::ConfigUpdate => "config_update",
            JobKind::Rescan => "rescan",
            JobKind::Insert => "insert",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-slot job arbiter, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct OperationCoordinator {
    active: Arc<Mutex<Option<JobKind>>>,
}

impl OperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<JobKind>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `kind`
    ///
    /// Returns `Err(active)` with the running job when the slot is taken.
    pub fn try_acquire(&self, kind: JobKind) -> Result<JobGuard, JobKind> {
        let mut slot = self.slot();
        if let Some(active) = *slot {
            debug!(requested = %kind, active = %active, "Job rejected, coordinator busy");
            return Err(active);
        }
        *slot = Some(kind);
        debug!(job = %kind, "Job slot acquired");
        Ok(JobGuard {
            coordinator: self.clone(),
            kind,
        })
    }

    /// Non-blocking busy check
    pub fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    pub fn active_job(&self) -> Option<JobKind> {
        *self.slot()
    }
}

/// Holds the coordinator slot; released on drop
#[derive(Debug)]
pub struct JobGuard {
    coordinator: OperationCoordinator,
    kind: JobKind,
}

impl JobGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut slot = self.coordinator.slot();
        if *slot == Some(self.kind) {
            *slot = None;
        }
        debug!(job = %self.kind, "Job slot released");
    }
}
