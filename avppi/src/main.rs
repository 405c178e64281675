//! AVPPi playback supervisor - main entry point
//!
//! Loads configuration, opens the settings database, starts the media
//! engine and the supervisor loops, then serves the operator API until
//! SIGINT/SIGTERM.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avppi::api::{self, AppContext};
use avppi::app::{ApplicationCore, CoreOptions};
use avppi::clock::SystemClock;
use avppi::config::{CliOverrides, Config, EngineKind};
use avppi::db::{SettingsDefaults, SettingsStore};
use avppi::ops::{MediaSanitizer, RcloneManager};
use avppi::playback::{MediaEngine, MpvEngine, PlaybackController, SimulatedEngine};
use avppi::state::SharedState;
use avppi_common::db::init_database;

/// Command-line arguments for avppi
#[derive(Parser, Debug)]
#[command(name = "avppi")]
#[command(about = "Playback supervisor for the AVPPi video appliance")]
#[command(version)]
struct Args {
    /// Configuration file (default: AVPPI_CONFIG_PATH, then standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the API binds to
    #[arg(long, env = "AVPPI_HOST")]
    host: Option<String>,

    /// Port the API listens on
    #[arg(short, long, env = "AVPPI_PORT")]
    port: Option<u16>,

    /// Settings database path
    #[arg(long, env = "AVPPI_DATABASE")]
    database: Option<PathBuf>,

    /// Media engine: mpv or simulated
    #[arg(long, env = "AVPPI_ENGINE")]
    engine: Option<String>,

    /// Skip the remote sync normally run right after start
    #[arg(long)]
    no_startup_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(
        args.config.as_deref(),
        CliOverrides {
            host: args.host,
            port: args.port,
            database: args.database,
            engine: args.engine,
        },
    )
    .context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!(
        "AVPPi supervisor v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config.app.source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }
    info!("Media directory: {}", config.app.media_directory.display());

    let db = init_database(&config.app.state_database)
        .await
        .context("Failed to open settings database")?;
    let store = SettingsStore::open(
        db,
        SettingsDefaults {
            language: config.app.default_language.clone(),
            remote_path: config.app.remote_path.clone(),
            remote_name: config.app.remote_name.clone(),
        },
    )
    .await
    .context("Failed to initialize settings")?;

    let engine = create_engine(&config).await?;
    info!(engine = %config.engine, "Media engine ready");

    let controller = Arc::new(PlaybackController::new(
        engine,
        config.app.idle_media.clone(),
        store.clone(),
    ));
    let state = Arc::new(SharedState::new());
    let remote = Arc::new(RcloneManager::new(
        config.app.rclone_binary.clone(),
        config.app.rclone_config_path.clone(),
        config.app.media_directory.clone(),
        store.clone(),
    ));
    let transcoder = Arc::new(MediaSanitizer::new(config.app.media_directory.clone()));

    let mut options = CoreOptions::from_config(&config);
    options.startup_sync = !args.no_startup_sync;
    let core = ApplicationCore::new(
        options,
        store,
        controller,
        state,
        remote,
        transcoder,
        Arc::new(SystemClock),
    );
    core.start().await.context("Failed to start supervisor")?;

    let addr = config.bind_addr();
    let app = api::create_router(AppContext {
        core: Arc::clone(&core),
        config: Arc::new(config),
    });

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    core.shutdown().await;
    info!("Shutdown complete");
    served
}

fn init_tracing(config: &Config) -> Result<()> {
    let file_layer = match &config.app.log_directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("avppi.log"))
                .context("Failed to open log file")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "avppi=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

async fn create_engine(config: &Config) -> Result<Box<dyn MediaEngine>> {
    match config.engine {
        EngineKind::Mpv => {
            let binary = config.app.mpv_binary.clone();
            let socket = config.app.mpv_socket.clone();
            let options = config.app.mpv_options.clone();
            // Connecting polls the IPC socket with blocking sleeps
            let engine = tokio::task::spawn_blocking(move || MpvEngine::spawn(&binary, &socket, &options))
                .await
                .context("mpv startup task failed")?
                .context("Failed to start mpv")?;
            Ok(Box::new(engine))
        }
        EngineKind::Simulated => {
            warn!("Using the simulated media engine, no video output");
            Ok(Box::new(SimulatedEngine::new()))
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
