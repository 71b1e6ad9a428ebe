//! Backend collaborators: scoring of live snapshots and video storage.

mod client;

pub use client::{ApiClient, HealthStatus};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ApiError, FetchError, ScoringError, UploadError};
use crate::models::{Credential, MediaType, UploadReceipt, VideoSummary};

/// One JPEG snapshot bound for `POST /video/feedback`.
#[derive(Debug, Clone)]
pub struct SampleUpload {
    pub image: Vec<u8>,
    pub file_name: String,
    pub object_name: String,
    pub frame: u64,
}

/// Scoring response. Only strictly positive scores drive the feedback signal.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
pub struct FeedbackScore {
    #[serde(default)]
    pub mean_thresh: Option<f64>,
}

impl FeedbackScore {
    pub fn applicable(&self) -> Option<f64> {
        self.mean_thresh.filter(|value| *value > 0.0)
    }
}

#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub path: PathBuf,
    pub file_name: String,
    pub media_type: MediaType,
    pub patient_id: String,
    pub title: String,
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn submit_sample(
        &self,
        sample: SampleUpload,
        credential: &Credential,
    ) -> Result<FeedbackScore, ScoringError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(
        &self,
        upload: VideoUpload,
        credential: &Credential,
    ) -> Result<UploadReceipt, UploadError>;

    /// Streams `object_name` into `dest`, replacing any previous file there.
    async fn download(
        &self,
        object_name: &str,
        dest: &Path,
        credential: &Credential,
    ) -> Result<PathBuf, FetchError>;

    async fn list_videos(&self, credential: &Credential) -> Result<Vec<VideoSummary>, ApiError>;
}
