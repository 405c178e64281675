//! Playlist mirror consistency between the controller and the engine

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use avppi::media::MediaItem;
use avppi::playback::{PlaybackController, SimulatedEngine};
use common::{memory_store, IDLE};

fn item(name: &str) -> MediaItem {
    MediaItem {
        name: name.to_string(),
        path: PathBuf::from("/srv/media").join(name),
        size_bytes: 1024,
        modified_at: 1_700_000_000,
    }
}

async fn controller_with(count: usize) -> (SimulatedEngine, Arc<PlaybackController>) {
    let engine = SimulatedEngine::manual();
    let controller = Arc::new(PlaybackController::new(
        Box::new(engine.clone()),
        IDLE,
        memory_store().await,
    ));
    let items = (0..count).map(|i| item(&format!("clip{}.mp4", i))).collect();
    controller.load_playlist(items).await.unwrap();
    (engine, controller)
}

/// Application and engine playlists hold the same paths in the same order
async fn assert_consistent(controller: &PlaybackController) {
    let app: Vec<String> = controller.playlist().await.iter().map(|m| m.location()).collect();
    let engine = controller.engine_entries().await.unwrap();
    if app.is_empty() {
        assert!(controller.idle_loaded().await);
        assert_eq!(engine, vec![IDLE.to_string()]);
    } else {
        assert_eq!(app, engine);
    }
}

#[tokio::test]
async fn test_insert_then_remove_stays_consistent() {
    for count in 1..=6 {
        for start in 0..count {
            let (engine, controller) = controller_with(count).await;
            for _ in 0..start {
                controller.next().await.unwrap();
            }
            assert_consistent(&controller).await;

            let position = controller.insert_after_current(item("extra.mp4")).await.unwrap();
            assert_eq!(position, start + 1);
            assert_consistent(&controller).await;

            // Removing the current item resumes at what was inserted after it
            let removed = controller.remove_current_media().await.unwrap();
            assert_eq!(removed, Some(format!("clip{}.mp4", start)));
            assert_consistent(&controller).await;
            assert_eq!(
                engine.current_entry(),
                Some("/srv/media/extra.mp4".to_string()),
                "count {} start {}",
                count,
                start
            );
        }
    }
}

#[tokio::test]
async fn test_removing_everything_falls_back_to_idle_clip() {
    let (engine, controller) = controller_with(3).await;
    for _ in 0..3 {
        assert!(controller.remove_current_media().await.unwrap().is_some());
        assert_consistent(&controller).await;
    }
    assert!(controller.idle_loaded().await);
    assert_eq!(engine.current_entry(), Some(IDLE.to_string()));

    // Nothing identifiable to remove while idling
    assert_eq!(controller.remove_current_media().await.unwrap(), None);
}

#[tokio::test]
async fn test_insert_replaces_idle_clip() {
    let (engine, controller) = controller_with(0).await;
    assert!(controller.idle_loaded().await);

    assert_eq!(controller.insert_after_current(item("new.mp4")).await.unwrap(), 0);
    assert!(!controller.idle_loaded().await);
    assert_consistent(&controller).await;
    assert_eq!(engine.playlist(), vec!["/srv/media/new.mp4".to_string()]);
}

#[tokio::test]
async fn test_duplicate_entries_removed_together() {
    let (_engine, controller) = controller_with(2).await;
    controller.insert_after_current(item("clip0.mp4")).await.unwrap();
    assert_eq!(controller.playlist().await.len(), 3);

    assert_eq!(
        controller.remove_current_media().await.unwrap(),
        Some("clip0.mp4".to_string())
    );
    let names: Vec<String> = controller.playlist().await.into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["clip1.mp4".to_string()]);
    assert_consistent(&controller).await;
}
