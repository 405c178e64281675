//! Media files on disk

pub mod catalog;

pub use catalog::{is_supported_video, scan_media, MediaItem, SUPPORTED_EXTENSIONS};
