//! # AVPPi Common Library
//!
//! Shared code for the AVPPi playback appliance:
//! - Error types
//! - Configuration loading (TOML + root folder resolution)
//! - Time-of-day and weekday helpers used by the schedulers
//! - SQLite pool and settings table initialization

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::TimeOfDay;
