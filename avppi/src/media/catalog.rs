//! Media directory catalog
//!
//! Lists playable video files at the top level of the media directory.
//! Subdirectories are not descended into; the remote sync mirrors a flat
//! folder.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions (lowercase, without dot) the player accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "avi", "webm"];

/// Video file discovered in the media directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaItem {
    /// File name, used by operators to address the item
    pub name: String,
    /// Absolute path, the item's identity in the engine playlist
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Modification time, seconds since the Unix epoch
    pub modified_at: i64,
}

impl MediaItem {
    /// Engine location for this item
    pub fn location(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// True when the path carries a supported video extension
pub fn is_supported_video(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Scan `directory` for supported videos
///
/// Sorted case-insensitively by name and truncated to `limit`. A missing
/// directory yields an empty list.
pub fn scan_media(directory: &Path, limit: usize) -> Vec<MediaItem> {
    if !directory.is_dir() {
        debug!("Media directory {} not present", directory.display());
        return Vec::new();
    }

    let mut items = Vec::new();
    for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error accessing media entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported_video(entry.path()) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Cannot stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        items.push(MediaItem {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path().to_path_buf(),
            size_bytes: metadata.len(),
            modified_at,
        });
    }

    items.sort_by_key(|item| item.name.to_lowercase());
    if items.len() > limit {
        warn!(
            found = items.len(),
            limit, "Media directory holds more items than the playlist limit, truncating"
        );
        items.truncate(limit);
    }
    items
}
