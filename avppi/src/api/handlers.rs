//! HTTP request handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{error, info, warn};

use super::error::{ApiError, ApiResult};
use super::AppContext;
use crate::db::{ScheduleSettings, ScheduleUpdate, SyncScheduleSettings, SyncScheduleUpdate};
use crate::ops::CommandResult;
use crate::playback::{PlaybackStatus, WatchdogStatus};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Uniform reply for operator actions
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl OperationResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            details: None,
        })
    }

    fn with_details(success: bool, message: impl Into<String>, details: Value) -> Json<Self> {
        Json(Self {
            success,
            message: message.into(),
            details: Some(details),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub playback: PlaybackStatus,
    pub language: String,
    pub videos: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub size_bytes: u64,
    pub modified_at: i64,
}

#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub videos: Vec<VideoEntry>,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub level: i64,
}

#[derive(Debug, Deserialize)]
pub struct InsertRequest {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct RcloneConfigRequest {
    pub token: String,
    pub remote_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SettingsSummary {
    pub language: String,
    pub remote_name: String,
    pub remote_path: String,
    pub local_directory: String,
    pub rclone_config_path: String,
    pub schedule: ScheduleSettings,
    pub sync_schedule: SyncScheduleSettings,
}

#[derive(Debug, Serialize)]
pub struct WatchdogResponse {
    #[serde(flatten)]
    pub status: WatchdogStatus,
    pub interventions_total: u64,
    pub window_active: Option<bool>,
}

// ============================================================================
// Status
// ============================================================================

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "module": "avppi",
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
    }))
}

pub async fn get_status(State(ctx): State<AppContext>) -> ApiResult<Json<StatusResponse>> {
    let playback = ctx.core.controller().status().await?;
    let language = ctx.core.store().language().await?;
    let videos = ctx.core.list_media().await.into_iter().map(|m| m.name).collect();
    Ok(Json(StatusResponse {
        playback,
        language,
        videos,
    }))
}

pub async fn get_media(State(ctx): State<AppContext>) -> Json<MediaResponse> {
    let videos = ctx
        .core
        .list_media()
        .await
        .into_iter()
        .map(|m| VideoEntry {
            name: m.name,
            size_bytes: m.size_bytes,
            modified_at: m.modified_at,
        })
        .collect();
    Json(MediaResponse { videos })
}

pub async fn get_watchdog(State(ctx): State<AppContext>) -> Json<WatchdogResponse> {
    let state = ctx.core.state();
    Json(WatchdogResponse {
        status: state.watchdog_status().await,
        interventions_total: state.get_watchdog_interventions(),
        window_active: state.window_active().await,
    })
}

// ============================================================================
// Playback control
// ============================================================================

pub async fn play_pause(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    ctx.core.controller().toggle_pause().await?;
    Ok(OperationResponse::ok("Playback toggled"))
}

pub async fn next(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    ctx.core.controller().next().await?;
    Ok(OperationResponse::ok("Skipped to next media"))
}

pub async fn previous(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    ctx.core.controller().previous().await?;
    Ok(OperationResponse::ok("Returned to previous media"))
}

pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<Json<OperationResponse>> {
    let level = u8::try_from(req.level)
        .ok()
        .filter(|l| *l <= 100)
        .ok_or_else(|| ApiError::BadRequest("Volume level must be between 0 and 100".to_string()))?;
    ctx.core.controller().set_volume(level).await?;
    Ok(OperationResponse::with_details(
        true,
        format!("Volume set to {}%", level),
        json!({ "level": level }),
    ))
}

pub async fn insert_media(
    State(ctx): State<AppContext>,
    Json(req): Json<InsertRequest>,
) -> ApiResult<Json<OperationResponse>> {
    let item = ctx.core.insert_after_current(&req.filename).await?;
    Ok(OperationResponse::ok(format!("{} will play next", item.name)))
}

pub async fn set_language(
    State(ctx): State<AppContext>,
    Json(req): Json<LanguageRequest>,
) -> ApiResult<Json<OperationResponse>> {
    ctx.core.store().set_language(&req.language).await?;
    Ok(OperationResponse::ok("Language updated"))
}

// ============================================================================
// System
// ============================================================================

pub async fn rescan(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    let count = ctx.core.rescan_media(true).await?;
    Ok(OperationResponse::with_details(
        true,
        "Media library rescanned",
        json!({ "count": count }),
    ))
}

/// Run the configured restart command in the background
pub async fn restart(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    if !ctx.config.app.allow_shutdown_commands {
        return Err(ApiError::Forbidden("Restart commands are disabled".to_string()));
    }
    let command = ctx.config.app.restart_command.clone();
    if command.trim().is_empty() {
        return Err(ApiError::Forbidden("No restart command configured".to_string()));
    }

    warn!(command = %command, "Operator requested a system restart");
    tokio::spawn(async move {
        match Command::new("sh").arg("-c").arg(&command).status().await {
            Ok(status) if status.success() => info!("Restart command completed"),
            Ok(status) => error!("Restart command exited with {}", status),
            Err(e) => error!("Cannot run restart command: {}", e),
        }
    });
    Ok(OperationResponse::ok("Restart requested"))
}

// ============================================================================
// Remote sync and maintenance
// ============================================================================

fn command_response(result: CommandResult, ok_message: &str, failed_message: &str) -> Json<OperationResponse> {
    let message = if result.success { ok_message } else { failed_message };
    OperationResponse::with_details(result.success, message, json!({ "returncode": result.returncode }))
}

pub async fn rclone_sync(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    let result = ctx.core.sync_and_reload().await?;
    Ok(command_response(result, "Synchronization completed", "Synchronization failed"))
}

pub async fn rclone_test(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    let result = ctx.core.run_remote_test().await?;
    Ok(command_response(result, "Connection test succeeded", "Connection test failed"))
}

pub async fn rclone_config(
    State(ctx): State<AppContext>,
    Json(req): Json<RcloneConfigRequest>,
) -> ApiResult<Json<OperationResponse>> {
    let path = ctx
        .core
        .update_remote_config(&req.token, req.remote_path.as_deref())
        .await?;
    Ok(OperationResponse::with_details(
        true,
        "rclone configuration updated",
        json!({ "path": path.display().to_string() }),
    ))
}

pub async fn rclone_sanitize(State(ctx): State<AppContext>) -> ApiResult<Json<OperationResponse>> {
    let processed = ctx.core.sanitize_media().await?;
    let count = processed.len();
    Ok(OperationResponse::with_details(
        true,
        format!("{} media file(s) sanitized", count),
        json!({ "processed": processed, "count": count }),
    ))
}

pub async fn rclone_logs(State(ctx): State<AppContext>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: ctx.core.remote_logs(),
    })
}

// ============================================================================
// Settings
// ============================================================================

pub async fn settings_summary(State(ctx): State<AppContext>) -> ApiResult<Json<SettingsSummary>> {
    let snapshot = ctx.core.store().snapshot().await?;
    Ok(Json(SettingsSummary {
        language: snapshot.language,
        remote_name: snapshot.remote.remote_name,
        remote_path: snapshot.remote.remote_path,
        local_directory: ctx.core.media_directory().display().to_string(),
        rclone_config_path: ctx.config.app.rclone_config_path.display().to_string(),
        schedule: snapshot.schedule,
        sync_schedule: snapshot.sync_schedule,
    }))
}

pub async fn update_schedule(
    State(ctx): State<AppContext>,
    Json(update): Json<ScheduleUpdate>,
) -> ApiResult<Json<OperationResponse>> {
    let schedule = ctx.core.update_schedule(update).await?;
    Ok(OperationResponse::with_details(
        true,
        "Playback schedule updated",
        json!({ "schedule": schedule }),
    ))
}

pub async fn update_sync_schedule(
    State(ctx): State<AppContext>,
    Json(update): Json<SyncScheduleUpdate>,
) -> ApiResult<Json<OperationResponse>> {
    let sync_schedule = ctx.core.update_sync_schedule(update).await?;
    Ok(OperationResponse::with_details(
        true,
        "Sync schedule updated",
        json!({ "sync_schedule": sync_schedule }),
    ))
}
