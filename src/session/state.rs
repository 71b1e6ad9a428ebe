use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{CapturedVideo, RecordedVideo};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    User,
    ReferenceEnded,
    DeviceFinished,
    Unmounted,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub id: Uuid,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub produced_artifact_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum CaptureState {
    Idle,
    AwaitingStart,
    AwaitingReferencePlayback,
    Recording {
        session: RecordingSession,
    },
    Stopped {
        session: RecordingSession,
        reason: StopReason,
        artifact: Option<CapturedVideo>,
    },
}

impl Default for CaptureState {
    fn default() -> Self {
        CaptureState::Idle
    }
}

impl CaptureState {
    pub fn is_recording(&self) -> bool {
        matches!(self, CaptureState::Recording { .. })
    }

    pub fn artifact(&self) -> Option<&CapturedVideo> {
        match self {
            CaptureState::Stopped { artifact, .. } => artifact.as_ref(),
            _ => None,
        }
    }
}

/// Timers owned by one recording; released on every exit from `Recording`.
pub(crate) struct SessionTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SessionTasks {
    pub(crate) fn new(token: CancellationToken, handles: Vec<JoinHandle<()>>) -> Self {
        Self { token, handles }
    }

    /// Cancels the timers. The tasks exit at their next tick; they may be the
    /// caller, so they are not aborted here.
    pub(crate) fn release(self) {
        self.token.cancel();
    }

    pub(crate) fn abort(self) {
        self.token.cancel();
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Everything one screen instance knows about its capture loop. Mutated only
/// under the controller's lock, one transition at a time.
#[derive(Default)]
pub(crate) struct ScreenState {
    pub(crate) capture: CaptureState,
    pub(crate) feedback: f64,
    pub(crate) last_error: Option<String>,
    pending_start: Option<CancellationToken>,
    session_tasks: Option<SessionTasks>,
}

impl ScreenState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_recording(&self, recording_id: Uuid) -> bool {
        matches!(&self.capture, CaptureState::Recording { session } if session.id == recording_id)
    }

    pub(crate) fn begin_countdown(&mut self, start_token: CancellationToken) -> bool {
        if self.capture != CaptureState::Idle {
            return false;
        }
        self.capture = CaptureState::AwaitingStart;
        self.last_error = None;
        self.pending_start = Some(start_token);
        true
    }

    pub(crate) fn await_reference_playback(&mut self) -> bool {
        if self.capture != CaptureState::AwaitingStart {
            return false;
        }
        self.capture = CaptureState::AwaitingReferencePlayback;
        true
    }

    pub(crate) fn begin_recording(&mut self, recording_id: Uuid, now: DateTime<Utc>) -> bool {
        if !matches!(
            self.capture,
            CaptureState::AwaitingStart | CaptureState::AwaitingReferencePlayback
        ) {
            return false;
        }
        self.capture = CaptureState::Recording {
            session: RecordingSession {
                id: recording_id,
                active: true,
                started_at: now,
                produced_artifact_path: None,
            },
        };
        self.feedback = 0.0;
        self.pending_start = None;
        true
    }

    pub(crate) fn attach_tasks(&mut self, tasks: SessionTasks) {
        if let Some(previous) = self.session_tasks.replace(tasks) {
            previous.release();
        }
    }

    /// `Recording → Stopped`. Returns the finished session, or `None` when
    /// nothing was recording.
    pub(crate) fn stop(&mut self, reason: StopReason) -> Option<RecordingSession> {
        let CaptureState::Recording { session } = &self.capture else {
            return None;
        };
        let mut session = session.clone();
        session.active = false;

        self.capture = CaptureState::Stopped {
            session: session.clone(),
            reason,
            artifact: None,
        };
        self.feedback = 0.0;
        self.release_tasks();
        Some(session)
    }

    pub(crate) fn attach_artifact(
        &mut self,
        recording_id: Uuid,
        video: RecordedVideo,
        recorded_at: DateTime<Utc>,
    ) -> bool {
        match &mut self.capture {
            CaptureState::Stopped {
                session, artifact, ..
            } if session.id == recording_id && artifact.is_none() => {
                session.produced_artifact_path = Some(video.path.clone());
                *artifact = Some(CapturedVideo::from_recorded(video, recorded_at));
                true
            }
            _ => false,
        }
    }

    /// A device error ends the recording without an artifact.
    pub(crate) fn fail_recording(&mut self, recording_id: Uuid, message: String) -> bool {
        let owns_recording = match &self.capture {
            CaptureState::Recording { session } => session.id == recording_id,
            CaptureState::Stopped {
                session, artifact, ..
            } => session.id == recording_id && artifact.is_none(),
            _ => false,
        };
        if !owns_recording {
            return false;
        }
        self.capture = CaptureState::Idle;
        self.feedback = 0.0;
        self.last_error = Some(message);
        self.release_tasks();
        true
    }

    /// A pending start that cannot complete returns the screen to `Idle`.
    pub(crate) fn abort_start(&mut self, message: String) -> bool {
        if !matches!(
            self.capture,
            CaptureState::AwaitingStart | CaptureState::AwaitingReferencePlayback
        ) {
            return false;
        }
        self.capture = CaptureState::Idle;
        self.last_error = Some(message);
        self.cancel_pending_start();
        true
    }

    pub(crate) fn apply_score(&mut self, recording_id: Uuid, score: f64) -> bool {
        if !self.is_recording(recording_id) {
            return false;
        }
        self.feedback = score;
        true
    }

    pub(crate) fn artifact_mut(&mut self) -> Option<&mut CapturedVideo> {
        match &mut self.capture {
            CaptureState::Stopped { artifact, .. } => artifact.as_mut(),
            _ => None,
        }
    }

    /// Back to a fresh `Idle` from anywhere except an active recording.
    pub(crate) fn reset_to_idle(&mut self) -> bool {
        if self.capture.is_recording() {
            return false;
        }
        self.capture = CaptureState::Idle;
        self.feedback = 0.0;
        self.last_error = None;
        self.cancel_pending_start();
        true
    }

    pub(crate) fn take_session_tasks(&mut self) -> Option<SessionTasks> {
        self.session_tasks.take()
    }

    fn release_tasks(&mut self) {
        if let Some(tasks) = self.session_tasks.take() {
            tasks.release();
        }
    }

    fn cancel_pending_start(&mut self) {
        if let Some(token) = self.pending_start.take() {
            token.cancel();
        }
    }
}
