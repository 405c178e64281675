//! Playback controller
//!
//! Owns the media engine behind the command lock together with the
//! application-side playlist. The two lists are kept index-consistent: entry
//! `i` of the engine playlist is always `playlist[i].path`, except while the
//! idle clip is loaded (application playlist empty, engine holds the clip).
//!
//! Every engine call goes through the lock, which serializes operator
//! commands, scheduled play/pause and watchdog recovery. Engine adapters do
//! blocking I/O, so calls run on the blocking pool; a multi-step sequence
//! (loading a playlist, removing an item) is a single blocking call.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::engine::{EngineError, EngineResult, MediaEngine, PlaybackSnapshot, PlaybackState};
use crate::db::SettingsStore;
use crate::error::Result;
use crate::media::MediaItem;

/// Pause between stop and restart during a recovery cycle
pub const RECOVERY_SETTLE: Duration = Duration::from_millis(500);

/// Operator-facing playback status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub volume_percent: u8,
    /// File name of the current item (empty when nothing is loaded)
    pub current_track: String,
}

/// Engine moved onto the blocking pool for each call
struct EngineHandle {
    engine: Arc<StdMutex<Box<dyn MediaEngine>>>,
}

impl EngineHandle {
    async fn run<T, F>(&self, call: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn MediaEngine) -> EngineResult<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
            call(&mut **engine)
        })
        .await
        .map_err(|e| EngineError::Unavailable(format!("engine call aborted: {}", e)))?
    }
}

fn load_idle(engine: &mut dyn MediaEngine, idle_media: &str) -> EngineResult<()> {
    info!("Playlist is empty, loading idle clip");
    engine.clear()?;
    engine.append(idle_media)?;
    engine.play_index(0)
}

struct ControllerInner {
    engine: EngineHandle,
    playlist: Vec<MediaItem>,
    idle_loaded: bool,
}

impl ControllerInner {
    /// Replace both playlists and start at `start_index` (clamped)
    async fn set_playlist(&mut self, items: Vec<MediaItem>, start_index: usize, idle_media: &str) -> EngineResult<()> {
        let locations: Vec<String> = items.iter().map(MediaItem::location).collect();
        let index = start_index.min(locations.len().saturating_sub(1));
        let idle_media = idle_media.to_string();
        self.playlist = items;

        let idle = locations.is_empty();
        self.engine
            .run(move |engine| {
                engine.stop()?;
                engine.clear()?;
                if locations.is_empty() {
                    return load_idle(engine, &idle_media);
                }
                for location in &locations {
                    engine.append(location)?;
                }
                engine.play_index(index)
            })
            .await?;

        self.idle_loaded = idle;
        if !idle {
            info!(items = self.playlist.len(), start = index, "Playlist loaded");
        }
        Ok(())
    }
}

pub struct PlaybackController {
    inner: Mutex<ControllerInner>,
    idle_media: String,
    settings: SettingsStore,
}

impl PlaybackController {
    pub fn new(engine: Box<dyn MediaEngine>, idle_media: impl Into<String>, settings: SettingsStore) -> Self {
        Self {
            inner: Mutex::new(ControllerInner {
                engine: EngineHandle {
                    engine: Arc::new(StdMutex::new(engine)),
                },
                playlist: Vec::new(),
                idle_loaded: false,
            }),
            idle_media: idle_media.into(),
            settings,
        }
    }

    /// Replace the playlist with `items` and start from the first one
    ///
    /// An empty list loads the idle clip.
    pub async fn load_playlist(&self, items: Vec<MediaItem>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.set_playlist(items, 0, &self.idle_media).await?;
        Ok(())
    }

    /// Insert `item` right after the current entry
    ///
    /// Appends when nothing is current. Replaces the idle clip when it is
    /// loaded. Returns the index the item landed at.
    pub async fn insert_after_current(&self, item: MediaItem) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let name = item.name.clone();

        if inner.idle_loaded {
            inner.set_playlist(vec![item], 0, &self.idle_media).await?;
            info!(media = %name, position = 0, "Inserted media, replacing idle clip");
            return Ok(0);
        }

        let location = item.location();
        let target = inner
            .engine
            .run(move |engine| {
                let target = match engine.current_index()? {
                    Some(current) => current + 1,
                    None => engine.entries()?.len(),
                };
                engine.insert(target, &location)?;
                Ok(target)
            })
            .await?;
        let target = target.min(inner.playlist.len());
        inner.playlist.insert(target, item);
        info!(media = %name, position = target, "Inserted media after current");
        Ok(target)
    }

    /// Drop the current item from both playlists and resume at the next one
    ///
    /// Every playlist entry with the same path is removed. Returns the file
    /// name of the removed item, or `None` when nothing identifiable is
    /// playing (no current entry, idle clip, or an entry the application
    /// playlist does not know).
    pub async fn remove_current_media(&self) -> Result<Option<String>> {
        let mut inner = self.inner.lock().await;
        if inner.idle_loaded {
            return Ok(None);
        }
        let location = inner
            .engine
            .run(|engine| {
                let current = match engine.current_index()? {
                    Some(index) => index,
                    None => return Ok(None),
                };
                Ok(engine.entries()?.get(current).cloned())
            })
            .await?;
        let location = match location {
            Some(location) => location,
            None => return Ok(None),
        };
        let target = Path::new(&location);

        let removed_index = match inner.playlist.iter().position(|item| item.path == target) {
            Some(index) => index,
            None => return Ok(None),
        };
        let removed_name = inner.playlist[removed_index].name.clone();
        let remaining: Vec<MediaItem> = inner
            .playlist
            .iter()
            .filter(|item| item.path != target)
            .cloned()
            .collect();

        warn!(media = %removed_name, "Removed problematic media from playlist");
        let next_index = if removed_index < remaining.len() { removed_index } else { 0 };
        inner.set_playlist(remaining, next_index, &self.idle_media).await?;
        Ok(Some(removed_name))
    }

    /// Stop, wait briefly, then restart the current item (or skip ahead)
    ///
    /// The command lock is held for the whole cycle.
    pub async fn recover(&self, skip: bool) -> Result<()> {
        let inner = self.inner.lock().await;
        warn!(skip, "Attempting playback recovery cycle");
        inner.engine.run(|engine| engine.stop()).await?;
        tokio::time::sleep(RECOVERY_SETTLE).await;
        if skip {
            inner.engine.run(|engine| engine.next()).await?;
        } else {
            inner.engine.run(|engine| engine.play()).await?;
        }
        Ok(())
    }

    pub async fn play(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.play()).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.pause()).await?;
        Ok(())
    }

    pub async fn toggle_pause(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.toggle_pause()).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.stop()).await?;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.next()).await?;
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        self.inner.lock().await.engine.run(|engine| engine.previous()).await?;
        Ok(())
    }

    /// Apply and persist the output volume
    pub async fn set_volume(&self, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        {
            let inner = self.inner.lock().await;
            inner.engine.run(move |engine| engine.set_volume(percent)).await?;
        }
        self.settings.set_volume(percent).await
    }

    pub async fn volume(&self) -> Result<u8> {
        Ok(self.inner.lock().await.engine.run(|engine| engine.volume()).await?)
    }

    /// Snapshot of the engine, taken under the command lock
    pub async fn snapshot(&self) -> EngineResult<PlaybackSnapshot> {
        self.inner.lock().await.engine.run(|engine| engine.snapshot()).await
    }

    pub async fn status(&self) -> Result<PlaybackStatus> {
        let inner = self.inner.lock().await;
        let (snapshot, volume_percent) = inner
            .engine
            .run(|engine| Ok((engine.snapshot()?, engine.volume()?)))
            .await?;
        let current_track = if inner.idle_loaded {
            String::new()
        } else {
            display_name(&snapshot.media)
        };
        Ok(PlaybackStatus {
            state: snapshot.state,
            volume_percent,
            current_track,
        })
    }

    /// Application-side playlist
    pub async fn playlist(&self) -> Vec<MediaItem> {
        self.inner.lock().await.playlist.clone()
    }

    /// Engine-side playlist
    pub async fn engine_entries(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.engine.run(|engine| engine.entries()).await?)
    }

    pub async fn idle_loaded(&self) -> bool {
        self.inner.lock().await.idle_loaded
    }
}

/// File name of an engine location, or the location itself
fn display_name(location: &str) -> String {
    Path::new(location)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| location.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SettingsDefaults;
    use crate::playback::simulated::SimulatedEngine;
    use avppi_common::db::init_memory_database;
    use std::path::PathBuf;

    const IDLE: &str = "av://lavfi:color=c=black";

    fn item(name: &str) -> MediaItem {
        MediaItem {
            name: name.to_string(),
            path: PathBuf::from("/media").join(name),
            size_bytes: 1,
            modified_at: 0,
        }
    }

    async fn setup() -> (PlaybackController, SimulatedEngine) {
        let db = init_memory_database().await.unwrap();
        let store = SettingsStore::open(
            db,
            SettingsDefaults {
                language: "fr".to_string(),
                remote_path: "AVPPi-medias".to_string(),
                remote_name: "drive".to_string(),
            },
        )
        .await
        .unwrap();
        let engine = SimulatedEngine::manual();
        let controller = PlaybackController::new(Box::new(engine.clone()), IDLE, store);
        (controller, engine)
    }

    async fn assert_consistent(controller: &PlaybackController) {
        let app: Vec<String> = controller.playlist().await.iter().map(|i| i.location()).collect();
        let engine = controller.engine_entries().await.unwrap();
        assert_eq!(app, engine);
    }

    #[tokio::test]
    async fn test_empty_playlist_loads_idle_clip() {
        let (controller, engine) = setup().await;
        controller.load_playlist(vec![]).await.unwrap();
        assert!(controller.idle_loaded().await);
        assert_eq!(engine.playlist(), vec![IDLE.to_string()]);
        assert_eq!(engine.playback_state(), PlaybackState::Playing);
        assert_eq!(controller.status().await.unwrap().current_track, "");
    }

    #[tokio::test]
    async fn test_insert_after_current() {
        let (controller, engine) = setup().await;
        tokio::time::pause();
        controller
            .load_playlist(vec![item("a.mp4"), item("b.mp4"), item("c.mp4")])
            .await
            .unwrap();
        controller.next().await.unwrap();
        assert_eq!(engine.current_entry().as_deref(), Some("/media/b.mp4"));

        let at = controller.insert_after_current(item("new.mp4")).await.unwrap();
        assert_eq!(at, 2);
        assert_consistent(&controller).await;
        let names: Vec<_> = controller.playlist().await.into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4", "new.mp4", "c.mp4"]);
    }

    #[tokio::test]
    async fn test_insert_replaces_idle_clip() {
        let (controller, engine) = setup().await;
        controller.load_playlist(vec![]).await.unwrap();
        controller.insert_after_current(item("a.mp4")).await.unwrap();
        assert!(!controller.idle_loaded().await);
        assert_eq!(engine.playlist(), vec!["/media/a.mp4".to_string()]);
        assert_consistent(&controller).await;
    }

    #[tokio::test]
    async fn test_remove_current_resumes_next() {
        let (controller, engine) = setup().await;
        controller
            .load_playlist(vec![item("a.mp4"), item("b.mp4"), item("c.mp4")])
            .await
            .unwrap();
        controller.next().await.unwrap();

        let removed = controller.remove_current_media().await.unwrap();
        assert_eq!(removed.as_deref(), Some("b.mp4"));
        assert_consistent(&controller).await;
        assert_eq!(engine.current_entry().as_deref(), Some("/media/c.mp4"));
    }

    #[tokio::test]
    async fn test_remove_last_wraps_and_empty_goes_idle() {
        let (controller, engine) = setup().await;
        controller.load_playlist(vec![item("a.mp4"), item("b.mp4")]).await.unwrap();
        controller.next().await.unwrap();

        assert_eq!(controller.remove_current_media().await.unwrap().as_deref(), Some("b.mp4"));
        assert_eq!(engine.current_entry().as_deref(), Some("/media/a.mp4"));

        assert_eq!(controller.remove_current_media().await.unwrap().as_deref(), Some("a.mp4"));
        assert!(controller.idle_loaded().await);
        assert_eq!(controller.remove_current_media().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recover_restarts_current() {
        let (controller, engine) = setup().await;
        tokio::time::pause();
        controller.load_playlist(vec![item("a.mp4"), item("b.mp4")]).await.unwrap();
        engine.clear_commands();

        controller.recover(false).await.unwrap();
        assert_eq!(engine.commands(), vec!["stop", "play"]);
        assert_eq!(engine.current_entry().as_deref(), Some("/media/a.mp4"));

        controller.recover(true).await.unwrap();
        assert_eq!(engine.current_entry().as_deref(), Some("/media/b.mp4"));
    }

    #[tokio::test]
    async fn test_volume_persisted() {
        let (controller, _engine) = setup().await;
        controller.set_volume(42).await.unwrap();
        assert_eq!(controller.volume().await.unwrap(), 42);
        assert_eq!(controller.settings.volume().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_status_reports_file_name() {
        let (controller, _engine) = setup().await;
        controller.load_playlist(vec![item("clip one.mp4")]).await.unwrap();
        let status = controller.status().await.unwrap();
        assert_eq!(status.current_track, "clip one.mp4");
        assert_eq!(status.state, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn test_slow_engine_does_not_stall_runtime() {
        let (controller, engine) = setup().await;
        controller.load_playlist(vec![item("a.mp4")]).await.unwrap();
        engine.set_snapshot_delay(Duration::from_millis(300));

        let controller = Arc::new(controller);
        let slow = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.snapshot().await }
        });

        // Timers on this single-threaded runtime keep firing while the engine blocks
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!slow.is_finished());
        assert_eq!(slow.await.unwrap().unwrap().media, "/media/a.mp4");
    }
}
