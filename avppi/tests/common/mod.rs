//! Shared test harness: in-memory settings, simulated engine, fake jobs

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tempfile::TempDir;
use tokio::sync::Notify;

use avppi::app::{ApplicationCore, CoreOptions};
use avppi::clock::{Clock, ManualClock};
use avppi::db::{SettingsDefaults, SettingsStore};
use avppi::ops::{CommandResult, RemoteSync, Transcoder};
use avppi::playback::{PlaybackController, SimulatedEngine, WatchdogConfig};
use avppi::state::SharedState;
use avppi::{Error, Result};
use avppi_common::db::init_memory_database;

pub const IDLE: &str = "av://lavfi:color=c=black";

/// Remote sync double; a sync drops `synced.mp4` into the media directory
///
/// With `hold_sync` set, a sync parks until `release` is notified.
pub struct FakeRemote {
    media_directory: PathBuf,
    pub succeed: AtomicBool,
    pub hold_sync: AtomicBool,
    pub release: Notify,
    pub syncs: AtomicUsize,
    pub tests: AtomicUsize,
    pub configs: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRemote {
    pub fn new(media_directory: PathBuf) -> Self {
        Self {
            media_directory,
            succeed: AtomicBool::new(true),
            hold_sync: AtomicBool::new(false),
            release: Notify::new(),
            syncs: AtomicUsize::new(0),
            tests: AtomicUsize::new(0),
            configs: Mutex::new(Vec::new()),
        }
    }

    fn result(&self) -> CommandResult {
        let success = self.succeed.load(Ordering::SeqCst);
        CommandResult {
            success,
            stdout: String::new(),
            stderr: if success { String::new() } else { "remote unreachable".to_string() },
            returncode: if success { 0 } else { 1 },
        }
    }
}

#[async_trait]
impl RemoteSync for FakeRemote {
    async fn sync_media(&self, _remote_path: Option<&str>) -> Result<CommandResult> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        if self.hold_sync.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.succeed.load(Ordering::SeqCst) {
            std::fs::write(self.media_directory.join("synced.mp4"), b"synced")?;
        }
        Ok(self.result())
    }

    async fn test_connection(&self) -> Result<CommandResult> {
        self.tests.fetch_add(1, Ordering::SeqCst);
        Ok(self.result())
    }

    async fn update_config(&self, token: &str, remote_path: Option<&str>) -> Result<PathBuf> {
        if token.trim().is_empty() {
            return Err(Error::Validation("Token must not be empty.".to_string()));
        }
        self.configs
            .lock()
            .unwrap()
            .push((token.to_string(), remote_path.map(str::to_string)));
        Ok(self.media_directory.join("rclone.conf"))
    }

    fn recent_logs(&self) -> Vec<String> {
        vec!["2026-01-01 06:00:00 UTC | fake".to_string()]
    }
}

/// Transcoder double returning a fixed outcome
pub struct FakeTranscoder {
    pub fail: AtomicBool,
    pub runs: AtomicUsize,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn sanitize(&self) -> Result<Vec<String>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Job("ffmpeg failed for a.mp4".to_string()));
        }
        Ok(vec!["a.mp4".to_string()])
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: SettingsStore,
    pub engine: SimulatedEngine,
    pub controller: Arc<PlaybackController>,
    pub state: Arc<SharedState>,
    pub clock: Arc<ManualClock>,
    pub remote: Arc<FakeRemote>,
    pub transcoder: Arc<FakeTranscoder>,
    pub core: Arc<ApplicationCore>,
}

impl Harness {
    pub fn media_dir(&self) -> PathBuf {
        self.dir.path().join("media")
    }
}

pub fn at(date: (i32, u32, u32), hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

pub async fn memory_store() -> SettingsStore {
    SettingsStore::open(
        init_memory_database().await.unwrap(),
        SettingsDefaults {
            language: "fr".to_string(),
            remote_path: "AVPPi-medias".to_string(),
            remote_name: "drive".to_string(),
        },
    )
    .await
    .unwrap()
}

pub fn write_media(dir: &Path, names: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    for name in names {
        std::fs::write(dir.join(name), name.as_bytes()).unwrap();
    }
}

/// Core over `files`, media loaded, loops not started
///
/// The clock starts on Monday 2026-03-02 at 05:00, before the default
/// 06:00 sync time.
pub async fn harness(files: &[&str]) -> Harness {
    harness_with(files, false).await
}

pub async fn harness_with(files: &[&str], startup_sync: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let media = dir.path().join("media");
    write_media(&media, files);

    let store = memory_store().await;
    let engine = SimulatedEngine::manual();
    let controller = Arc::new(PlaybackController::new(Box::new(engine.clone()), IDLE, store.clone()));
    let state = Arc::new(SharedState::new());
    let clock = Arc::new(ManualClock::new(at((2026, 3, 2), 5, 0)));
    let remote = Arc::new(FakeRemote::new(media.clone()));
    let transcoder = Arc::new(FakeTranscoder {
        fail: AtomicBool::new(false),
        runs: AtomicUsize::new(0),
    });

    let options = CoreOptions {
        media_directory: media,
        max_playlist_items: 500,
        window_interval: Duration::from_secs(30),
        sync_interval: Duration::from_secs(60),
        watchdog: WatchdogConfig::default(),
        startup_sync,
    };
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let core = ApplicationCore::new(
        options,
        store.clone(),
        Arc::clone(&controller),
        Arc::clone(&state),
        remote.clone(),
        transcoder.clone(),
        dyn_clock,
    );
    core.rescan_media(true).await.unwrap();

    Harness {
        dir,
        store,
        engine,
        controller,
        state,
        clock,
        remote,
        transcoder,
        core,
    }
}
