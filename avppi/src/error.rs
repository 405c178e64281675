//! Error types for avppi
//!
//! Module-level error type using thiserror. Busy conflicts are a normal
//! outcome (another long job holds the coordinator), not a fault.

use thiserror::Error;

use crate::ops::coordinator::JobKind;
use crate::playback::engine::EngineError;

/// Main error type for the avppi crate
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbled up from avppi-common
    #[error(transparent)]
    Common(#[from] avppi_common::Error),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored settings could not be (de)serialized
    #[error("Settings encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Rejected configuration or settings update
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// Media engine command failed
    #[error("Playback engine error: {0}")]
    Engine(#[from] EngineError),

    /// Another long-running job holds the coordinator
    #[error("Operation rejected: {active} job already running")]
    Busy { active: JobKind },

    /// A remote sync or transcode job failed
    #[error("Job failed: {0}")]
    Job(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using avppi Error
pub type Result<T> = std::result::Result<T, Error>;
