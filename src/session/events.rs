use std::path::PathBuf;

use serde::Serialize;

use crate::feedback::Color;
use crate::models::{ReferenceArtifact, SessionRole};

use super::CaptureState;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub role: SessionRole,
    pub state: CaptureState,
    pub feedback: f64,
    pub color: Color,
    pub frame: u64,
    pub reference: ReferenceArtifact,
    pub last_error: Option<String>,
}

/// Notifications for the host UI.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CaptureEvent {
    StateChanged(CaptureSnapshot),
    RecordingImminent { delay_ms: u64 },
    FeedbackChanged { value: f64, color: Color },
    ReferenceReady { local_path: PathBuf },
    ReferenceFailed { message: String },
    DeviceFailed { message: String },
    UploadSucceeded,
    UploadFailed { message: String },
}
