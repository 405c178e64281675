//! avppi runtime configuration
//!
//! The file-level configuration comes from `avppi_common::config`; this
//! layer applies command-line overrides and converts intervals into the
//! types the control loops take.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use avppi_common::config::{load_config, AppConfig};

use crate::error::{Error, Result};
use crate::playback::WatchdogConfig;

/// Which media engine adapter drives playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Mpv,
    /// In-process engine without video output
    Simulated,
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mpv" => Ok(EngineKind::Mpv),
            "simulated" | "sim" => Ok(EngineKind::Simulated),
            other => Err(Error::Validation(format!(
                "unknown engine '{}' (expected 'mpv' or 'simulated')",
                other
            ))),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Mpv => f.write_str("mpv"),
            EngineKind::Simulated => f.write_str("simulated"),
        }
    }
}

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
    pub engine: Option<String>,
}

/// Appliance configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub engine: EngineKind,
    pub watchdog: WatchdogConfig,
    pub window_interval: Duration,
    pub sync_interval: Duration,
}

impl Config {
    /// Load the config file (see `avppi_common::config` for resolution) and
    /// apply overrides
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides) -> Result<Self> {
        let app = load_config(config_path)?;
        Self::from_app(app, overrides)
    }

    pub fn from_app(mut app: AppConfig, overrides: CliOverrides) -> Result<Self> {
        if let Some(host) = overrides.host {
            app.api_host = host;
        }
        if let Some(port) = overrides.port {
            app.api_port = port;
        }
        if let Some(database) = overrides.database {
            app.state_database = database;
        }
        if let Some(engine) = overrides.engine {
            app.engine = engine;
        }

        let engine = app.engine.parse()?;
        Ok(Self {
            engine,
            watchdog: WatchdogConfig::from(&app.watchdog),
            window_interval: Duration::from_secs(app.schedule.window_interval_secs),
            sync_interval: Duration::from_secs(app.schedule.sync_interval_secs),
            app,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.app.api_host, self.app.api_port)
    }
}
