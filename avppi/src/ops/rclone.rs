//! Remote sync through rclone
//!
//! Mirrors the remote folder into the media directory, checks connectivity,
//! and writes the rclone remote definition. Command output and progress go
//! to an in-memory ring of recent lines shown to operators.
//!
//! Exclusivity is the coordinator's job; these methods assume the caller
//! holds the slot.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::db::{RemoteUpdate, SettingsStore};
use crate::error::{Error, Result};

/// Lines kept in the operator log ring
pub const LOG_CAPACITY: usize = 500;

/// Outcome of one external command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

/// Remote content source
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Mirror the remote folder into the media directory
    async fn sync_media(&self, remote_path: Option<&str>) -> Result<CommandResult>;

    /// List the remote root to check credentials and reachability
    async fn test_connection(&self) -> Result<CommandResult>;

    /// Write the remote definition and persist token and path
    async fn update_config(&self, token: &str, remote_path: Option<&str>) -> Result<PathBuf>;

    /// Recent log lines, oldest first
    fn recent_logs(&self) -> Vec<String>;
}

/// Bounded ring of timestamped log lines
#[derive(Debug)]
pub struct LogRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `message` as `"<UTC timestamp> UTC | message"`
    pub fn push(&self, message: &str) {
        let line = format!("{} UTC | {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message);
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

/// rclone-backed [`RemoteSync`]
pub struct RcloneManager {
    binary: String,
    config_path: PathBuf,
    media_directory: PathBuf,
    store: SettingsStore,
    log: LogRing,
}

impl RcloneManager {
    pub fn new(binary: impl Into<String>, config_path: PathBuf, media_directory: PathBuf, store: SettingsStore) -> Self {
        Self {
            binary: binary.into(),
            config_path,
            media_directory,
            store,
            log: LogRing::new(LOG_CAPACITY),
        }
    }

    fn append_log(&self, message: &str) {
        info!(target: "avppi::rclone", "{}", message);
        self.log.push(message);
    }

    /// `<remote_name>:<remote_path>` from stored settings
    async fn remote_spec(&self, remote_path: Option<&str>) -> Result<String> {
        let remote = self.store.remote().await?;
        let path = remote_path
            .filter(|p| !p.is_empty())
            .unwrap_or(&remote.remote_path);
        Ok(format!("{}:{}", remote.remote_name, path))
    }

    async fn run(&self, args: &[String]) -> Result<CommandResult> {
        self.append_log(&format!("Running command: {} {}", self.binary, args.join(" ")));

        let output = Command::new(&self.binary)
            .args(args)
            .arg("--config")
            .arg(&self.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                self.append_log(&format!("Cannot start {}: {}", self.binary, e));
                Error::Job(format!("cannot start {}: {}", self.binary, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        for line in stdout.lines() {
            self.append_log(&format!("rclone stdout | {}", line));
        }
        for line in stderr.lines() {
            self.append_log(&format!("rclone stderr | {}", line));
        }

        let returncode = output.status.code().unwrap_or(-1);
        let success = output.status.success();
        if success {
            self.append_log("Command completed successfully");
        } else {
            warn!(returncode, "rclone command failed");
            self.append_log(&format!("Command failed with exit code {}", returncode));
        }

        Ok(CommandResult {
            success,
            stdout,
            stderr,
            returncode,
        })
    }
}

/// rclone remote definition for a Google Drive token
pub fn render_remote_config(remote_name: &str, token: &str) -> String {
    format!(
        "[{}]\ntype = drive\nscope = drive.file\ntoken = {}\n",
        remote_name,
        token.trim()
    )
}

#[async_trait]
impl RemoteSync for RcloneManager {
    async fn sync_media(&self, remote_path: Option<&str>) -> Result<CommandResult> {
        let remote = self.remote_spec(remote_path).await?;
        tokio::fs::create_dir_all(&self.media_directory).await?;
        let local = self.media_directory.to_string_lossy().into_owned();
        self.append_log(&format!("Starting sync from {} to {}", remote, local));
        self.run(&[
            "sync".to_string(),
            remote,
            local,
            "--create-empty-src-dirs".to_string(),
        ])
        .await
    }

    async fn test_connection(&self) -> Result<CommandResult> {
        let remote = self.remote_spec(None).await?;
        self.append_log(&format!("Testing connectivity to {}", remote));
        self.run(&[
            "lsf".to_string(),
            remote,
            "--max-depth".to_string(),
            "1".to_string(),
            "--files-only".to_string(),
        ])
        .await
    }

    async fn update_config(&self, token: &str, remote_path: Option<&str>) -> Result<PathBuf> {
        if token.trim().is_empty() {
            return Err(Error::Validation("Token must not be empty.".to_string()));
        }
        // A line break would let the token inject keys into the config file
        if token.trim().contains(['\n', '\r']) {
            return Err(Error::Validation("Token must be a single line.".to_string()));
        }
        let remote = self.store.remote().await?;

        if let Some(parent) = self.config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.append_log(&format!("Updating rclone config at {}", self.config_path.display()));
        tokio::fs::write(&self.config_path, render_remote_config(&remote.remote_name, token)).await?;

        self.store
            .update_remote(RemoteUpdate {
                token: Some(token.trim().to_string()),
                remote_path: remote_path.filter(|p| !p.is_empty()).map(str::to_string),
            })
            .await?;
        self.append_log("rclone configuration was updated");
        Ok(self.config_path.clone())
    }

    fn recent_logs(&self) -> Vec<String> {
        self.log.snapshot()
    }
}

impl std::fmt::Debug for RcloneManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RcloneManager")
            .field("binary", &self.binary)
            .field("config_path", &self.config_path)
            .field("media_directory", &self.media_directory)
            .finish()
    }
}
