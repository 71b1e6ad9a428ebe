//! Device seams the host shell implements: the camera surface and the
//! reference video player.

mod frames;

pub use frames::FrameCounter;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{DeviceError, PlaybackError};
use crate::models::RecordedVideo;

/// Resolves once with the recording's finished or error callback.
pub type RecordingOutcome = oneshot::Receiver<Result<RecordedVideo, DeviceError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
}

#[async_trait]
pub trait CaptureSurface: Send + Sync {
    /// Starts recording. The returned receiver fires when the device finishes
    /// the file (after `stop_recording`) or aborts with an error.
    async fn start_recording(&self) -> Result<RecordingOutcome, DeviceError>;

    async fn stop_recording(&self) -> Result<(), DeviceError>;

    async fn take_snapshot(&self) -> Result<Snapshot, DeviceError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub is_loaded: bool,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub is_playing: bool,
}

impl PlaybackStatus {
    /// Playback has come to rest within `tolerance_ms` of the end.
    pub fn finished_within(&self, tolerance_ms: u64) -> bool {
        match (self.is_loaded, self.duration_ms) {
            (true, Some(duration)) if duration > 0 => {
                self.position_ms.saturating_add(tolerance_ms) >= duration && !self.is_playing
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait ReferencePlayer: Send + Sync {
    /// Loads `source` and starts playback from the beginning; resolves with the
    /// loaded status.
    async fn load(&self, source: &Path) -> Result<PlaybackStatus, PlaybackError>;

    fn status(&self) -> PlaybackStatus;

    async fn unload(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(position_ms: u64, is_playing: bool) -> PlaybackStatus {
        PlaybackStatus {
            is_loaded: true,
            position_ms,
            duration_ms: Some(30_000),
            is_playing,
        }
    }

    #[test]
    fn finished_requires_rest_near_the_end() {
        assert!(status(30_000, false).finished_within(50));
        assert!(status(29_950, false).finished_within(50));
        assert!(!status(29_949, false).finished_within(50));
        assert!(!status(29_990, true).finished_within(50));
    }

    #[test]
    fn unknown_duration_never_finishes() {
        let unloaded = PlaybackStatus::default();
        assert!(!unloaded.finished_within(50));
        let streaming = PlaybackStatus {
            duration_ms: None,
            ..status(10_000, false)
        };
        assert!(!streaming.finished_within(50));
    }
}
