//! Maintenance operations and their mutual exclusion

pub mod coordinator;
pub mod rclone;
pub mod sanitizer;

pub use coordinator::{JobGuard, JobKind, OperationCoordinator};
pub use rclone::{CommandResult, LogRing, RcloneManager, RemoteSync};
pub use sanitizer::{MediaSanitizer, StreamInfo, Transcoder};
