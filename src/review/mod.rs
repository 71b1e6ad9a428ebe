//! Post-recording actions on a stopped capture screen.

use log::{error, info, warn};

use crate::api::VideoUpload;
use crate::error::UploadError;
use crate::identity::{ResolvedRole, RoleState};
use crate::models::{ArtifactStatus, SessionRole, UploadReceipt};
use crate::session::{CaptureController, CaptureEvent, CaptureSnapshot};

impl CaptureController {
    /// Returns the screen to a fresh `Idle`, deleting the recorded file if
    /// there is one. Also cancels a start still counting down. A no-op while
    /// recording.
    pub async fn discard(&self) -> CaptureSnapshot {
        let inner = &self.inner;
        let discarded = {
            let mut state = inner.state.lock().await;
            let artifact = state.capture.artifact().map(|video| video.path.clone());
            if state.reset_to_idle() {
                Some(artifact)
            } else {
                None
            }
        };

        match discarded {
            None => info!("Discard ignored while recording"),
            Some(artifact) => {
                if let Some(path) = artifact {
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => info!("Discarded recording {}", path.display()),
                        Err(err) => warn!("Failed to delete {}: {err}", path.display()),
                    }
                }
                inner.emit_state().await;
            }
        }
        inner.snapshot().await
    }

    /// Uploads the stopped recording for the screen's patient under `title`.
    /// Doctor branch only.
    pub async fn submit(&self, title: &str) -> Result<UploadReceipt, UploadError> {
        let inner = &self.inner;

        let credential = match inner.role_state() {
            RoleState::Resolved(ResolvedRole {
                role: SessionRole::Doctor,
                credential,
            }) => credential,
            _ => return Err(UploadError::NotPermitted),
        };
        let patient_id = inner
            .params
            .patient_id
            .clone()
            .ok_or(UploadError::MissingPatient)?;

        let upload = {
            let mut state = inner.state.lock().await;
            let artifact = state.artifact_mut().ok_or(UploadError::NoArtifact)?;
            artifact.title = Some(title.to_string());
            artifact.status = ArtifactStatus::Titled;
            VideoUpload {
                path: artifact.path.clone(),
                file_name: artifact.file_name(),
                media_type: artifact.media_type,
                patient_id,
                title: title.to_string(),
            }
        };
        let path = upload.path.clone();

        info!(
            "Uploading {} ({}) for patient {}",
            upload.file_name,
            upload.media_type.mime(),
            upload.patient_id
        );
        let result = inner.store.upload(upload, &credential).await;

        let status = match &result {
            Ok(_) => ArtifactStatus::Uploaded,
            Err(_) => ArtifactStatus::UploadFailed,
        };
        {
            let mut state = inner.state.lock().await;
            // The screen may have been discarded while the upload ran.
            if let Some(artifact) = state.artifact_mut().filter(|video| video.path == path) {
                artifact.status = status;
            }
        }

        let event = match &result {
            Ok(receipt) => {
                info!("Upload finished: {:?}", receipt.object_name);
                CaptureEvent::UploadSucceeded
            }
            Err(err) => {
                error!("Upload failed: {err}");
                CaptureEvent::UploadFailed {
                    message: err.user_message(),
                }
            }
        };
        let _ = inner.events.send(event);
        inner.emit_state().await;

        result
    }
}
