//! Operator HTTP API
//!
//! JSON endpoints for playback control, maintenance jobs and settings.
//! Long-running jobs answer 409 while another one holds the coordinator.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::ApplicationCore;
use crate::config::Config;

pub use error::{ApiError, ApiResult};
pub use handlers::OperationResponse;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub core: Arc<ApplicationCore>,
    pub config: Arc<Config>,
}

/// Build the API router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/status", get(handlers::get_status))
        .route("/api/media", get(handlers::get_media))
        .route("/api/watchdog", get(handlers::get_watchdog))
        // Playback control
        .route("/api/control/play-pause", post(handlers::play_pause))
        .route("/api/control/next", post(handlers::next))
        .route("/api/control/previous", post(handlers::previous))
        .route("/api/control/volume", post(handlers::set_volume))
        .route("/api/playlist/insert", post(handlers::insert_media))
        // System
        .route("/api/system/rescan", post(handlers::rescan))
        .route("/api/system/restart", post(handlers::restart))
        // Remote sync and maintenance
        .route("/api/rclone/sync", post(handlers::rclone_sync))
        .route("/api/rclone/test", post(handlers::rclone_test))
        .route("/api/rclone/config", post(handlers::rclone_config))
        .route("/api/rclone/sanitize", post(handlers::rclone_sanitize))
        .route("/api/rclone/logs", get(handlers::rclone_logs))
        // Settings
        .route("/api/settings/language", post(handlers::set_language))
        .route("/api/settings/summary", get(handlers::settings_summary))
        .route("/api/settings/schedule", post(handlers::update_schedule))
        .route("/api/settings/sync-schedule", post(handlers::update_sync_schedule))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
