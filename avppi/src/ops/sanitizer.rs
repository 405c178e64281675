//! Media sanitizer
//!
//! Probes every video under the media directory with `ffprobe` and
//! transcodes anything the player may choke on (non-H.264, exotic profiles,
//! non-4:2:0 chroma, interlacing) into progressive H.264/AAC with `ffmpeg`.
//! The output goes to a temporary file next to the original, which then
//! replaces it in a single rename.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

const SAFE_CODECS: &[&str] = &["h264"];
const SAFE_PROFILES: &[&str] = &["High", "Main", "Baseline"];
const SAFE_PIXEL_FORMATS: &[&str] = &["yuv420p"];
const SANITIZE_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "mkv", "avi"];

/// Offline media normalization job
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize the media directory; returns the names of rewritten files
    async fn sanitize(&self) -> Result<Vec<String>>;
}

/// First video stream as reported by ffprobe
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub codec: String,
    pub profile: String,
    pub pix_fmt: String,
    pub field_order: String,
}

impl StreamInfo {
    /// Parse `ffprobe -of json` output; `None` when no stream is present
    pub fn from_probe_json(raw: &str) -> Option<Self> {
        let data: Value = serde_json::from_str(raw).ok()?;
        let stream = data.get("streams")?.as_array()?.first()?;
        let field = |name: &str| {
            stream
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Some(Self {
            codec: field("codec_name").to_lowercase(),
            profile: field("profile"),
            pix_fmt: field("pix_fmt").to_lowercase(),
            field_order: field("field_order").to_lowercase(),
        })
    }

    /// True when the stream is outside the safe set
    ///
    /// Empty profile, pixel format or field order are not held against it.
    pub fn needs_transcode(&self) -> bool {
        if !SAFE_CODECS.contains(&self.codec.as_str()) {
            return true;
        }
        if !self.profile.is_empty() && !SAFE_PROFILES.contains(&self.profile.as_str()) {
            return true;
        }
        if !self.pix_fmt.is_empty() && !SAFE_PIXEL_FORMATS.contains(&self.pix_fmt.as_str()) {
            return true;
        }
        !self.field_order.is_empty() && self.field_order != "progressive"
    }
}

/// ffprobe/ffmpeg-backed [`Transcoder`]
#[derive(Debug, Clone)]
pub struct MediaSanitizer {
    media_directory: PathBuf,
    ffprobe: PathBuf,
    ffmpeg: PathBuf,
}

impl MediaSanitizer {
    pub fn new(media_directory: PathBuf) -> Self {
        Self::with_tools(media_directory, PathBuf::from("ffprobe"), PathBuf::from("ffmpeg"))
    }

    pub fn with_tools(media_directory: PathBuf, ffprobe: PathBuf, ffmpeg: PathBuf) -> Self {
        Self {
            media_directory,
            ffprobe,
            ffmpeg,
        }
    }

    /// Candidate files, recursively
    pub fn candidates(&self) -> Vec<PathBuf> {
        if !self.media_directory.is_dir() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.media_directory)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error accessing entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_sanitize_candidate(path))
            .collect();
        files.sort();
        files
    }

    /// Probe one file; a failing probe counts as "needs transcode"
    async fn needs_transcode(&self, path: &Path) -> bool {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=codec_name,profile,pix_fmt,field_order"])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(
                    file = %path.display(),
                    "ffprobe failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return true;
            }
            Err(e) => {
                warn!(file = %path.display(), "Cannot run ffprobe: {}", e);
                return true;
            }
        };

        match StreamInfo::from_probe_json(&String::from_utf8_lossy(&output.stdout)) {
            Some(info) => {
                debug!(file = %path.display(), ?info, "Probed video stream");
                info.needs_transcode()
            }
            None => true,
        }
    }

    async fn transcode(&self, path: &Path) -> Result<()> {
        let temp = temp_output_path(path);
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(path)
            .args(["-c:v", "libx264", "-preset", "medium", "-crf", "20"])
            .args(["-pix_fmt", "yuv420p", "-vf", "yadif=0:-1:0"])
            .args(["-c:a", "aac", "-b:a", "192k"])
            .args(["-movflags", "+faststart"])
            .arg(&temp)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let result = match output {
            Ok(output) if output.status.success() => tokio::fs::rename(&temp, path).await.map_err(Error::from),
            Ok(output) => Err(Error::Job(format!(
                "ffmpeg failed for {}: {}",
                file_name(path),
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Err(e) => Err(Error::Job(format!("cannot run ffmpeg: {}", e))),
        };

        if result.is_err() {
            let _ = tokio::fs::remove_file(&temp).await;
        }
        result
    }
}

#[async_trait]
impl Transcoder for MediaSanitizer {
    async fn sanitize(&self) -> Result<Vec<String>> {
        let mut processed = Vec::new();
        for path in self.candidates() {
            if !self.needs_transcode(&path).await {
                continue;
            }
            info!(file = %path.display(), "Sanitizing media");
            self.transcode(&path).await?;
            processed.push(file_name(&path));
        }
        info!(count = processed.len(), "Media sanitization finished");
        Ok(processed)
    }
}

fn is_sanitize_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SANITIZE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Hidden `.mp4` sibling used as ffmpeg output
fn temp_output_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    path.with_file_name(format!(".{}.sanitizing.mp4", stem))
}
