use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MediaType {
    Mp4,
    QuickTime,
}

impl MediaType {
    /// `.mov` files are QuickTime; everything else is sent as MP4.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("mov") => MediaType::QuickTime,
            _ => MediaType::Mp4,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Mp4 => "video/mp4",
            MediaType::QuickTime => "video/quicktime",
        }
    }
}

/// What the capture surface hands back when a recording finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedVideo {
    pub path: PathBuf,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactStatus {
    Recorded,
    Titled,
    Uploaded,
    UploadFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedVideo {
    pub path: PathBuf,
    pub media_type: MediaType,
    pub recorded_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub title: Option<String>,
    pub status: ArtifactStatus,
}

impl CapturedVideo {
    pub fn from_recorded(video: RecordedVideo, recorded_at: DateTime<Utc>) -> Self {
        Self {
            media_type: MediaType::from_path(&video.path),
            path: video.path,
            recorded_at,
            duration_ms: video.duration_ms,
            title: None,
            status: ArtifactStatus::Recorded,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("recording.mp4")
            .to_string()
    }
}

/// Entry of `GET /video/get_videos`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoSummary {
    pub id: i64,
    pub object_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl VideoSummary {
    pub fn display_title(&self) -> &str {
        match self.description.as_deref() {
            Some(description) if !description.is_empty() => description,
            _ => &self.object_name,
        }
    }
}

/// Body of a successful `POST /video/upload`. The backend may add fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UploadReceipt {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub object_name: Option<String>,
}
