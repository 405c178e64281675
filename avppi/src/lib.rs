//! # AVPPi playback supervisor
//!
//! Keeps a looping video playlist running on an unattended appliance:
//! - Playback window scheduling (play/pause on schedule edges)
//! - Daily remote sync with playlist reload
//! - Freeze detection with tiered recovery
//! - Mutual exclusion of long-running maintenance jobs
//! - Operator HTTP API

pub mod api;
pub mod app;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod ops;
pub mod playback;
pub mod schedule;
pub mod state;
pub mod tasks;

pub use error::{Error, Result};
