//! Errors raised while loading configuration, opening the settings
//! database and parsing operator-supplied times

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite pool or schema setup failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config file or database directory could not be read or created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing config file, bad TOML, or an out-of-range setting
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed value from an operator (e.g. a time that is not HH:MM)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
