use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{multipart, Response};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::error::{ApiError, FetchError, ScoringError, UploadError};
use crate::models::{Credential, UploadReceipt, VideoSummary};

use super::{ArtifactStore, FeedbackScore, SampleUpload, ScoringService, VideoUpload};

const GENERIC_UPLOAD_FAILURE: &str = "Upload failed";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

/// reqwest client for the RehabPal backend.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Request(format!("client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Object names are nested paths; each segment is percent-encoded so a
    /// `?` or `#` in a name stays part of the path.
    fn download_url(&self, object_name: &str) -> Result<reqwest::Url, FetchError> {
        let mut url = reqwest::Url::parse(&self.url("/video/download"))
            .map_err(|e| FetchError::Request(format!("url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Request(format!("url: {} has no path", self.base_url)))?
            .pop_if_empty()
            .extend(object_name.split('/'));
        Ok(url)
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| ApiError::Request(format!("request: {}", e)))?;
        let response = ensure_success(response).await?;
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let detail = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.detail)
        .unwrap_or_else(|| "unknown error".to_string());
    Err(ApiError::Status { status, detail })
}

#[async_trait]
impl ScoringService for ApiClient {
    async fn submit_sample(
        &self,
        sample: SampleUpload,
        credential: &Credential,
    ) -> Result<FeedbackScore, ScoringError> {
        let file_part = multipart::Part::bytes(sample.image)
            .file_name(sample.file_name)
            .mime_str("image/jpeg")
            .map_err(|e| ScoringError::Request(format!("mime: {}", e)))?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("object_name", sample.object_name)
            .text("frame", sample.frame.to_string());

        let response = self
            .client
            .post(self.url("/video/feedback"))
            .bearer_auth(credential.as_str())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScoringError::Request(format!("request: {}", e)))?;

        if !response.status().is_success() {
            return Err(ScoringError::Status(response.status().as_u16()));
        }

        let score = response
            .json::<FeedbackScore>()
            .await
            .map_err(|e| ScoringError::InvalidResponse(e.to_string()))?;
        debug!("Scoring response for frame {}: {:?}", sample.frame, score.mean_thresh);
        Ok(score)
    }
}

#[async_trait]
impl ArtifactStore for ApiClient {
    async fn upload(
        &self,
        upload: VideoUpload,
        credential: &Credential,
    ) -> Result<UploadReceipt, UploadError> {
        let bytes = tokio::fs::read(&upload.path)
            .await
            .map_err(|e| UploadError::Artifact(format!("{}: {}", upload.path.display(), e)))?;
        let size = bytes.len();

        let file_part = multipart::Part::bytes(bytes)
            .file_name(upload.file_name)
            .mime_str(upload.media_type.mime())
            .map_err(|e| UploadError::Transport(format!("mime: {}", e)))?;

        let form = multipart::Form::new()
            .part("file", file_part)
            .text("patient_id", upload.patient_id)
            .text("title", upload.title);

        let response = self
            .client
            .post(self.url("/video/upload"))
            .bearer_auth(credential.as_str())
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(format!("request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| GENERIC_UPLOAD_FAILURE.to_string());
            warn!("Upload rejected with status {}: {}", status, message);
            return Err(UploadError::Rejected { status, message });
        }

        info!("Uploaded recording ({} bytes)", size);
        // Older backends answer with an empty or free-form body.
        let body = response
            .bytes()
            .await
            .map_err(|e| UploadError::Transport(format!("body: {}", e)))?;
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    async fn download(
        &self,
        object_name: &str,
        dest: &Path,
        credential: &Credential,
    ) -> Result<PathBuf, FetchError> {
        let url = self.download_url(object_name)?;
        let mut response = self
            .client
            .get(url)
            .bearer_auth(credential.as_str())
            .send()
            .await
            .map_err(|e| FetchError::Request(format!("request: {}", e)))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let storage_err = |source: std::io::Error| FetchError::Storage {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        let mut file = tokio::fs::File::create(dest).await.map_err(storage_err)?;

        let copied: Result<usize, FetchError> = async {
            let mut written = 0usize;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| FetchError::Request(format!("body: {}", e)))?
            {
                file.write_all(&chunk).await.map_err(storage_err)?;
                written += chunk.len();
            }
            file.flush().await.map_err(storage_err)?;
            Ok(written)
        }
        .await;
        let written = match copied {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                // Never leave a truncated reference behind.
                if let Err(remove_err) = tokio::fs::remove_file(dest).await {
                    warn!("Failed to remove partial download {}: {}", dest.display(), remove_err);
                }
                return Err(err);
            }
        };

        info!("Finished downloading {} ({} bytes) to {}", object_name, written, dest.display());
        Ok(dest.to_path_buf())
    }

    async fn list_videos(&self, credential: &Credential) -> Result<Vec<VideoSummary>, ApiError> {
        let response = self
            .client
            .get(self.url("/video/get_videos"))
            .bearer_auth(credential.as_str())
            .send()
            .await
            .map_err(|e| ApiError::Request(format!("request: {}", e)))?;
        let response = ensure_success(response).await?;
        response
            .json::<Vec<VideoSummary>>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}
