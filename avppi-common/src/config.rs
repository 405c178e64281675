//! Configuration loading and config file resolution
//!
//! Config file resolution priority:
//! 1. Explicit path (command-line argument)
//! 2. `AVPPI_CONFIG_PATH` environment variable
//! 3. `~/.config/avppi/config.toml`, then `/etc/avppi/config.toml`
//! 4. Compiled defaults (no file)
//!
//! A missing config file is not fatal: the appliance logs a warning and
//! starts with compiled defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "AVPPI_CONFIG_PATH";

/// Watchdog tuning (`[watchdog]` table)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogToml {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub freeze_threshold_secs: u64,
    pub min_progress_ms: i64,
    pub max_soft_recoveries: u32,
}

impl Default for WatchdogToml {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 5,
            freeze_threshold_secs: 15,
            min_progress_ms: 750,
            max_soft_recoveries: 2,
        }
    }
}

/// Scheduler cadences (`[schedule]` table)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleToml {
    pub window_interval_secs: u64,
    pub sync_interval_secs: u64,
}

impl Default for ScheduleToml {
    fn default() -> Self {
        Self {
            window_interval_secs: 30,
            sync_interval_secs: 60,
        }
    }
}

/// Raw TOML configuration file contents
///
/// Every field has a default so partial files are accepted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub media_directory: String,
    pub log_directory: Option<String>,
    pub state_database: String,
    pub idle_media: String,
    pub remote_name: String,
    pub remote_path: String,
    pub default_language: String,
    pub api_host: String,
    pub api_port: u16,
    pub rclone_binary: String,
    pub rclone_config_path: String,
    pub restart_command: String,
    pub allow_shutdown_commands: bool,
    pub max_playlist_items: usize,
    pub engine: String,
    pub mpv_binary: String,
    pub mpv_socket: String,
    pub mpv_options: Vec<String>,
    pub watchdog: WatchdogToml,
    pub schedule: ScheduleToml,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            media_directory: "media".to_string(),
            log_directory: Some("logs".to_string()),
            state_database: "data/state.db".to_string(),
            idle_media: "av://lavfi:color=c=black".to_string(),
            remote_name: "drive".to_string(),
            remote_path: "AVPPi-medias".to_string(),
            default_language: "fr".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            rclone_binary: "rclone".to_string(),
            rclone_config_path: "~/.config/rclone/rclone.conf".to_string(),
            restart_command: "sudo /sbin/reboot".to_string(),
            allow_shutdown_commands: false,
            max_playlist_items: 500,
            engine: "mpv".to_string(),
            mpv_binary: "mpv".to_string(),
            mpv_socket: "/tmp/avppi-mpv.sock".to_string(),
            mpv_options: vec!["--fullscreen".to_string(), "--really-quiet".to_string()],
            watchdog: WatchdogToml::default(),
            schedule: ScheduleToml::default(),
        }
    }
}

/// Fully resolved application configuration
///
/// Paths are absolute: relative entries resolve against the base directory
/// (the config file's directory, or the working directory without a file).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub media_directory: PathBuf,
    pub log_directory: Option<PathBuf>,
    pub state_database: PathBuf,
    pub idle_media: String,
    pub remote_name: String,
    pub remote_path: String,
    pub default_language: String,
    pub api_host: String,
    pub api_port: u16,
    pub rclone_binary: String,
    pub rclone_config_path: PathBuf,
    pub restart_command: String,
    pub allow_shutdown_commands: bool,
    pub max_playlist_items: usize,
    pub engine: String,
    pub mpv_binary: String,
    pub mpv_socket: PathBuf,
    pub mpv_options: Vec<String>,
    pub watchdog: WatchdogToml,
    pub schedule: ScheduleToml,
    /// File the configuration was read from (None = compiled defaults)
    pub source: Option<PathBuf>,
}

impl AppConfig {
    /// Resolve raw TOML values against a base directory
    pub fn from_toml(raw: TomlConfig, base_dir: &Path, source: Option<PathBuf>) -> Result<Self> {
        validate(&raw)?;
        Ok(Self::resolve(raw, base_dir, source))
    }

    /// Compiled defaults resolved against `base_dir`
    pub fn defaults(base_dir: &Path) -> Self {
        Self::resolve(TomlConfig::default(), base_dir, None)
    }

    fn resolve(raw: TomlConfig, base_dir: &Path, source: Option<PathBuf>) -> Self {
        Self {
            media_directory: resolve_path(&raw.media_directory, base_dir),
            log_directory: raw.log_directory.as_deref().map(|p| resolve_path(p, base_dir)),
            state_database: resolve_path(&raw.state_database, base_dir),
            idle_media: raw.idle_media,
            remote_name: raw.remote_name,
            remote_path: raw.remote_path,
            default_language: raw.default_language,
            api_host: raw.api_host,
            api_port: raw.api_port,
            rclone_binary: raw.rclone_binary,
            rclone_config_path: resolve_path(&raw.rclone_config_path, base_dir),
            restart_command: raw.restart_command,
            allow_shutdown_commands: raw.allow_shutdown_commands,
            max_playlist_items: raw.max_playlist_items,
            engine: raw.engine,
            mpv_binary: raw.mpv_binary,
            mpv_socket: resolve_path(&raw.mpv_socket, base_dir),
            mpv_options: raw.mpv_options,
            watchdog: raw.watchdog,
            schedule: raw.schedule,
            source,
        }
    }
}

fn validate(raw: &TomlConfig) -> Result<()> {
    if raw.max_playlist_items == 0 {
        return Err(Error::Config("max_playlist_items must be at least 1".to_string()));
    }
    if raw.watchdog.tick_interval_secs == 0 {
        return Err(Error::Config("watchdog.tick_interval_secs must be at least 1".to_string()));
    }
    if raw.schedule.window_interval_secs == 0 || raw.schedule.sync_interval_secs == 0 {
        return Err(Error::Config("schedule intervals must be at least 1 second".to_string()));
    }
    Ok(())
}

/// Parse a TOML document into the raw config
pub fn parse_toml(content: &str) -> Result<TomlConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
}

/// Load configuration following the resolution priority
///
/// An explicit path that does not exist is an error; implicit locations
/// that do not exist fall through to compiled defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(Error::Config(format!("Configuration file not found: {}", p.display())));
            }
            Some(p.to_path_buf())
        }
        None => locate_config_file(),
    };

    match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let raw = parse_toml(&content)?;
            let base_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            info!("Loaded configuration from {}", path.display());
            AppConfig::from_toml(raw, &base_dir, Some(path))
        }
        None => {
            warn!("No configuration file found, using compiled defaults");
            let cwd = std::env::current_dir()?;
            Ok(AppConfig::defaults(&cwd))
        }
    }
}

/// Find the config file from the environment or standard locations
fn locate_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        warn!("{} points to missing file {}", CONFIG_PATH_ENV, path.display());
    }

    let user_config = dirs::config_dir().map(|d| d.join("avppi").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/avppi/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Expand `~` and resolve relative paths against `base_dir`
pub fn resolve_path(value: &str, base_dir: &Path) -> PathBuf {
    let expanded = if value == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(value))
    } else if let Some(rest) = value.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(value),
        }
    } else {
        PathBuf::from(value)
    };

    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}
