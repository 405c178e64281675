//! Application core
//!
//! Wires the settings store, playback controller, control loops and
//! maintenance jobs together. Every operator job that rebuilds the playlist
//! or touches the remote configuration holds the coordinator slot for its
//! whole duration; composite jobs (sync then reload, sanitize then reload)
//! never release it in between.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::db::{ScheduleSettings, ScheduleUpdate, SettingsStore, SyncScheduleSettings, SyncScheduleUpdate};
use crate::error::{Error, Result};
use crate::media::{scan_media, MediaItem};
use crate::ops::{CommandResult, JobGuard, JobKind, OperationCoordinator, RemoteSync, Transcoder};
use crate::playback::{PlaybackController, PlaybackWatchdog, WatchdogConfig};
use crate::schedule::{PlaybackScheduler, ScheduledSync, SyncTrigger};
use crate::state::{SharedState, SupervisorEvent, SyncOrigin};
use crate::tasks::{spawn_loop, LoopHandle, LoopWaker};

/// Core tuning taken from the configuration
#[derive(Debug, Clone)]
pub struct CoreOptions {
    pub media_directory: PathBuf,
    pub max_playlist_items: usize,
    pub window_interval: Duration,
    pub sync_interval: Duration,
    pub watchdog: WatchdogConfig,
    /// Run a remote sync in the background right after start
    pub startup_sync: bool,
}

impl CoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_directory: config.app.media_directory.clone(),
            max_playlist_items: config.app.max_playlist_items,
            window_interval: config.window_interval,
            sync_interval: config.sync_interval,
            watchdog: config.watchdog.clone(),
            startup_sync: true,
        }
    }
}

pub struct ApplicationCore {
    options: CoreOptions,
    store: SettingsStore,
    controller: Arc<PlaybackController>,
    coordinator: OperationCoordinator,
    state: Arc<SharedState>,
    remote: Arc<dyn RemoteSync>,
    transcoder: Arc<dyn Transcoder>,
    clock: Arc<dyn Clock>,
    media: RwLock<Vec<MediaItem>>,
    loops: Mutex<Vec<LoopHandle>>,
    startup_task: Mutex<Option<JoinHandle<()>>>,
    window_waker: LoopWaker,
    sync_waker: LoopWaker,
    shutdown: CancellationToken,
}

impl ApplicationCore {
    pub fn new(
        options: CoreOptions,
        store: SettingsStore,
        controller: Arc<PlaybackController>,
        state: Arc<SharedState>,
        remote: Arc<dyn RemoteSync>,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            store,
            controller,
            coordinator: OperationCoordinator::new(),
            state,
            remote,
            transcoder,
            clock,
            media: RwLock::new(Vec::new()),
            loops: Mutex::new(Vec::new()),
            startup_task: Mutex::new(None),
            window_waker: LoopWaker::new(),
            sync_waker: LoopWaker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    pub fn coordinator(&self) -> &OperationCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn media_directory(&self) -> &Path {
        &self.options.media_directory
    }

    /// Load media, restore volume, start playback and the control loops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return Err(Error::Internal("application core already started".to_string()));
        }

        let items = self.scan().await?;
        info!(items = items.len(), directory = %self.options.media_directory.display(), "Initial media scan");
        *self.media.write().await = items.clone();
        self.controller.load_playlist(items).await?;

        let volume = self.store.volume().await?;
        self.controller.set_volume(volume).await?;
        self.controller.play().await?;

        let scheduler = PlaybackScheduler::new(
            self.store.clone(),
            Arc::clone(&self.controller),
            Arc::clone(&self.state),
            Arc::clone(&self.clock),
        );
        loops.push(spawn_loop(
            scheduler,
            self.options.window_interval,
            self.window_waker.clone(),
            self.shutdown.child_token(),
        ));

        let job: Arc<dyn ScheduledSync> = self.clone();
        let trigger = SyncTrigger::new(
            self.store.clone(),
            self.coordinator.clone(),
            job,
            Arc::clone(&self.clock),
        );
        loops.push(spawn_loop(
            trigger,
            self.options.sync_interval,
            self.sync_waker.clone(),
            self.shutdown.child_token(),
        ));

        let watchdog = PlaybackWatchdog::new(
            Arc::clone(&self.controller),
            Arc::clone(&self.state),
            self.options.watchdog.clone(),
        );
        loops.push(spawn_loop(
            watchdog,
            self.options.watchdog.tick_interval,
            LoopWaker::new(),
            self.shutdown.child_token(),
        ));

        if self.options.startup_sync {
            let core = Arc::clone(self);
            let cancel = self.shutdown.child_token();
            let task = tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => info!("Startup sync abandoned at shutdown"),
                    _ = core.startup_sync() => {}
                }
            });
            *self.startup_task.lock().await = Some(task);
        }

        info!(loops = loops.len(), "Application core started");
        Ok(())
    }

    async fn startup_sync(&self) {
        let guard = match self.coordinator.try_acquire(JobKind::Sync) {
            Ok(guard) => guard,
            Err(active) => {
                info!(active = %active, "Skipping startup sync, another job is running");
                return;
            }
        };
        if let Err(e) = self.run_sync(&guard, SyncOrigin::Startup).await {
            warn!("Startup sync failed: {}", e);
        }
    }

    /// Stop every control loop and the startup sync, and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(task) = self.startup_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Startup sync task failed: {}", e);
            }
        }
        let handles: Vec<LoopHandle> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            let name = handle.name();
            handle.stop().await;
            info!(task = name, "Loop shut down");
        }
    }

    /// Names of loops that are still running
    pub async fn running_loops(&self) -> Vec<&'static str> {
        self.loops
            .lock()
            .await
            .iter()
            .filter(|h| !h.is_finished())
            .map(|h| h.name())
            .collect()
    }

    pub async fn list_media(&self) -> Vec<MediaItem> {
        self.media.read().await.clone()
    }

    fn acquire(&self, kind: JobKind) -> Result<JobGuard> {
        self.coordinator.try_acquire(kind).map_err(|active| {
            info!(requested = %kind, active = %active, "Operation rejected, coordinator busy");
            Error::Busy { active }
        })
    }

    async fn scan(&self) -> Result<Vec<MediaItem>> {
        let directory = self.options.media_directory.clone();
        let limit = self.options.max_playlist_items;
        tokio::task::spawn_blocking(move || scan_media(&directory, limit))
            .await
            .map_err(|e| Error::Internal(format!("media scan task failed: {}", e)))
    }

    /// Rescan and rebuild the playlist; the caller holds the coordinator
    ///
    /// Playback stays paused when `autoplay` is false or the playback
    /// window is currently closed.
    async fn reload_playlist(&self, autoplay: bool) -> Result<usize> {
        let items = self.scan().await?;
        let count = items.len();
        *self.media.write().await = items.clone();
        self.controller.load_playlist(items).await?;

        let window_closed = self.state.window_active().await == Some(false);
        if count > 0 && (!autoplay || window_closed) {
            self.controller.pause().await?;
        }

        info!(items = count, "Playlist reloaded");
        self.state.broadcast_event(SupervisorEvent::PlaylistReloaded {
            items: count,
            at: Utc::now(),
        });
        Ok(count)
    }

    /// Insert a known media file right after the current item
    pub async fn insert_after_current(&self, filename: &str) -> Result<MediaItem> {
        let _guard = self.acquire(JobKind::Insert)?;
        let item = self
            .media
            .read()
            .await
            .iter()
            .find(|m| m.name == filename)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("media '{}'", filename)))?;
        self.controller.insert_after_current(item.clone()).await?;
        Ok(item)
    }

    /// Rescan the media directory; returns the new item count
    pub async fn rescan_media(&self, autoplay: bool) -> Result<usize> {
        let _guard = self.acquire(JobKind::Rescan)?;
        self.reload_playlist(autoplay).await
    }

    /// Operator-requested sync followed by a playlist reload
    pub async fn sync_and_reload(&self) -> Result<CommandResult> {
        let guard = self.acquire(JobKind::Sync)?;
        self.run_sync(&guard, SyncOrigin::Operator).await
    }

    async fn run_sync(&self, guard: &JobGuard, origin: SyncOrigin) -> Result<CommandResult> {
        info!(job = %guard.kind(), origin = ?origin, "Remote sync started");
        self.state.broadcast_event(SupervisorEvent::SyncStarted { origin, at: Utc::now() });

        let outcome = self.remote.sync_media(None).await;
        let finished = |success: bool, message: String| SupervisorEvent::SyncFinished {
            origin,
            success,
            message,
            at: Utc::now(),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(origin = ?origin, "Remote sync could not run: {}", e);
                self.state.broadcast_event(finished(false, e.to_string()));
                return Err(e);
            }
        };

        // A partial sync may still have brought new files, reload either way
        let reloaded = self.reload_playlist(true).await;
        let message = match (&reloaded, result.success) {
            (Ok(items), true) => format!("Synchronization finished, {} media loaded", items),
            (Ok(_), false) => format!("Synchronization failed with exit code {}", result.returncode),
            (Err(e), _) => format!("Playlist reload failed: {}", e),
        };
        let success = result.success && reloaded.is_ok();
        if success {
            info!(origin = ?origin, "{}", message);
        } else {
            warn!(origin = ?origin, "{}", message);
        }
        self.state.broadcast_event(finished(success, message));
        reloaded?;
        Ok(result)
    }

    pub async fn run_remote_test(&self) -> Result<CommandResult> {
        let _guard = self.acquire(JobKind::Test)?;
        self.remote.test_connection().await
    }

    pub async fn update_remote_config(&self, token: &str, remote_path: Option<&str>) -> Result<PathBuf> {
        let _guard = self.acquire(JobKind::ConfigUpdate)?;
        self.remote.update_config(token, remote_path).await
    }

    pub fn remote_logs(&self) -> Vec<String> {
        self.remote.recent_logs()
    }

    /// Stop playback, normalize the media directory, reload and resume
    ///
    /// The playlist is reloaded even when sanitizing fails part-way.
    pub async fn sanitize_media(&self) -> Result<Vec<String>> {
        let _guard = self.acquire(JobKind::Sanitize)?;
        self.controller.stop().await?;
        let outcome = self.transcoder.sanitize().await;
        self.reload_playlist(true).await?;
        let processed = outcome?;
        info!(processed = processed.len(), "Media sanitized");
        Ok(processed)
    }

    /// Validate and store the playback window, then re-evaluate it now
    pub async fn update_schedule(&self, update: ScheduleUpdate) -> Result<ScheduleSettings> {
        let schedule = self.store.update_schedule(update).await?;
        self.window_waker.wake();
        Ok(schedule)
    }

    /// Validate and store the sync schedule, then re-evaluate it now
    pub async fn update_sync_schedule(&self, update: SyncScheduleUpdate) -> Result<SyncScheduleSettings> {
        let schedule = self.store.update_sync_schedule(update).await?;
        self.sync_waker.wake();
        Ok(schedule)
    }
}

#[async_trait]
impl ScheduledSync for ApplicationCore {
    async fn sync_and_reload(&self, guard: &JobGuard, origin: SyncOrigin) -> Result<bool> {
        Ok(self.run_sync(guard, origin).await?.success)
    }
}
