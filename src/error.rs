use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the native capture surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("capture device unavailable")]
    Unavailable,
    #[error("recording failed: {0}")]
    Recording(String),
    #[error("snapshot failed: {0}")]
    Snapshot(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("reference video could not be loaded: {0}")]
    Load(String),
}

/// Reference download failures. The patient branch cannot proceed after one.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no reference exercise selected")]
    NoReference,
    #[error("reference download request failed: {0}")]
    Request(String),
    #[error("reference download rejected with status {0}")]
    Status(u16),
    #[error("failed to write reference to {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-sample failures. Never fatal; the sample is skipped.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("snapshot unavailable: {0}")]
    Snapshot(#[from] DeviceError),
    #[error("snapshot could not be read: {0}")]
    Read(#[from] std::io::Error),
    #[error("snapshot could not be encoded: {0}")]
    Encode(String),
    #[error("scoring request failed: {0}")]
    Request(String),
    #[error("scoring rejected with status {0}")]
    Status(u16),
    #[error("invalid scoring response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("upload request failed: {0}")]
    Transport(String),
    #[error("recorded video could not be read: {0}")]
    Artifact(String),
    #[error("no recorded video to upload")]
    NoArtifact,
    #[error("no patient selected for upload")]
    MissingPatient,
    #[error("only the doctor role can submit recordings")]
    NotPermitted,
}

impl UploadError {
    /// Text shown to the user: the collaborator's message when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Rejected { message, .. } => message.clone(),
            UploadError::Transport(_) => "Failed to upload video".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api request failed: {0}")]
    Request(String),
    #[error("api returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("invalid api response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no signed-in user")]
    NoUser,
    #[error("token request failed: {0}")]
    Token(String),
}

/// Structural failures that halt the capture loop at their stage.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera and microphone permissions are required (camera: {camera}, microphone: {microphone})")]
    PermissionDenied { camera: bool, microphone: bool },
    #[error("session role is not resolved")]
    RoleUnresolved,
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}
