use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    api::{ApiClient, ArtifactStore, ScoringService},
    capture::{CaptureSurface, FrameCounter, RecordingOutcome, ReferencePlayer},
    config::RehabSettings,
    error::{ApiError, CaptureError, DeviceError, FetchError},
    feedback::{sampling_loop, Color, SamplerContext, ScoreSink, ThresholdTable},
    identity::{IdentityProvider, ResolvedRole, RoleResolver, RoleState},
    models::{Credential, RecordedVideo, ReferenceArtifact, SessionRole, VideoSummary},
    permissions::PermissionGate,
    reference::{wait_until_settled, ReferenceFetcher},
};

use super::{
    monitor::wait_for_reference_end,
    state::{ScreenState, SessionTasks, StopReason},
    CaptureEvent, CaptureSnapshot, CaptureState,
};

const EVENT_CAPACITY: usize = 64;

/// Collaborators a capture screen talks to.
#[derive(Clone)]
pub struct CaptureServices {
    pub capture: Arc<dyn CaptureSurface>,
    pub player: Arc<dyn ReferencePlayer>,
    pub scoring: Arc<dyn ScoringService>,
    pub store: Arc<dyn ArtifactStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl CaptureServices {
    /// Wires both backend collaborators to one API client.
    pub fn with_api(
        api: ApiClient,
        capture: Arc<dyn CaptureSurface>,
        player: Arc<dyn ReferencePlayer>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let api = Arc::new(api);
        Self {
            capture,
            player,
            scoring: api.clone(),
            store: api,
            identity,
        }
    }
}

/// Navigation parameters of the capture screen.
#[derive(Debug, Clone, Default)]
pub struct ScreenParams {
    /// Reference exercise to replicate (patient branch).
    pub video_object_name: Option<String>,
    /// Patient the doctor's recording is for.
    pub patient_id: Option<String>,
}

/// Role-specific start behaviour, fixed once the role is resolved.
#[derive(Debug, Clone)]
enum Branch {
    Doctor,
    Patient { credential: Credential },
}

struct PatientPlan {
    object_name: String,
    credential: Credential,
}

/// Drives one capture screen: countdown, recording, reference sync, sampling.
#[derive(Clone)]
pub struct CaptureController {
    pub(crate) inner: Arc<ControllerInner>,
}

pub(crate) struct ControllerInner {
    pub(crate) state: Mutex<ScreenState>,
    /// `None` until resolution finishes; immutable afterwards.
    pub(crate) role: watch::Sender<Option<RoleState>>,
    pub(crate) settings: RehabSettings,
    pub(crate) thresholds: ThresholdTable,
    pub(crate) params: ScreenParams,
    pub(crate) capture: Arc<dyn CaptureSurface>,
    pub(crate) player: Arc<dyn ReferencePlayer>,
    pub(crate) scoring: Arc<dyn ScoringService>,
    pub(crate) store: Arc<dyn ArtifactStore>,
    pub(crate) fetcher: ReferenceFetcher,
    pub(crate) frames: Arc<FrameCounter>,
    pub(crate) events: broadcast::Sender<CaptureEvent>,
    pub(crate) screen_token: CancellationToken,
}

impl CaptureController {
    /// Mounts the capture screen. Refuses with `PermissionDenied` unless both
    /// capture permissions are held; otherwise starts role resolution (and, for
    /// patients, the reference download) in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(
        gate: &PermissionGate,
        services: CaptureServices,
        settings: RehabSettings,
        params: ScreenParams,
    ) -> Result<Self, CaptureError> {
        gate.ensure_granted()?;

        let identity = services.identity.clone();
        let controller = Self::new(services, settings, params);
        let inner = controller.inner.clone();
        tokio::spawn(async move { inner.resolve_session(identity).await });

        info!("Capture screen mounted");
        Ok(controller)
    }

    fn new(services: CaptureServices, settings: RehabSettings, params: ScreenParams) -> Self {
        let (role, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let fetcher = ReferenceFetcher::new(services.store.clone(), settings.cache_dir());

        Self {
            inner: Arc::new(ControllerInner {
                state: Mutex::new(ScreenState::new()),
                role,
                thresholds: settings.threshold_table(),
                settings,
                params,
                capture: services.capture,
                player: services.player,
                scoring: services.scoring,
                store: services.store,
                fetcher,
                frames: Arc::new(FrameCounter::new()),
                events,
                screen_token: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.inner.events.subscribe()
    }

    pub fn role(&self) -> RoleState {
        self.inner.role_state()
    }

    /// Waits for the one-time role resolution started by `mount`.
    pub async fn wait_for_role(&self) -> RoleState {
        let mut rx = self.inner.role.subscribe();
        let role = match rx.wait_for(Option::is_some).await {
            Ok(role) => role.clone().unwrap_or(RoleState::Unresolved),
            Err(_) => RoleState::Unresolved,
        };
        role
    }

    pub fn reference(&self) -> ReferenceArtifact {
        self.inner.fetcher.state()
    }

    /// Reference exercises the signed-in user can replicate.
    pub async fn available_references(&self) -> Result<Vec<VideoSummary>, ApiError> {
        match self.inner.role_state() {
            RoleState::Resolved(ResolvedRole { credential, .. }) => {
                self.inner.fetcher.list_available(&credential).await
            }
            RoleState::Unresolved => Err(ApiError::Request(
                CaptureError::RoleUnresolved.to_string(),
            )),
        }
    }

    pub async fn snapshot(&self) -> CaptureSnapshot {
        self.inner.snapshot().await
    }

    pub async fn state(&self) -> CaptureState {
        self.inner.state.lock().await.capture.clone()
    }

    pub async fn feedback_value(&self) -> f64 {
        self.inner.state.lock().await.feedback
    }

    pub async fn feedback_color(&self) -> Color {
        let value = self.feedback_value().await;
        self.inner.thresholds.color_for(value).clone()
    }

    /// Frame callback from the live camera feed.
    pub fn record_frame(&self) -> u64 {
        self.inner.frames.record()
    }

    /// The capture control action: `Idle → AwaitingStart`. A no-op before the
    /// role is resolved and whenever the screen is not idle.
    pub async fn begin_capture(&self) -> CaptureSnapshot {
        let inner = &self.inner;

        let branch = match inner.role_state() {
            RoleState::Resolved(ResolvedRole {
                role: SessionRole::Doctor,
                ..
            }) => Branch::Doctor,
            RoleState::Resolved(ResolvedRole {
                role: SessionRole::Patient,
                credential,
            }) => Branch::Patient { credential },
            _ => {
                info!("Role not loaded yet; ignoring record request");
                return inner.snapshot().await;
            }
        };

        let start_token = inner.screen_token.child_token();
        {
            let mut state = inner.state.lock().await;
            if !state.begin_countdown(start_token.clone()) {
                debug!("Record request ignored in state {:?}", state.capture);
                drop(state);
                return inner.snapshot().await;
            }
        }

        info!(
            "Recording will start in {}ms ({:?} branch)",
            inner.settings.countdown_ms, branch
        );
        let _ = inner.events.send(CaptureEvent::RecordingImminent {
            delay_ms: inner.settings.countdown_ms,
        });
        inner.emit_state().await;

        let task_inner = inner.clone();
        tokio::spawn(async move {
            match branch {
                Branch::Doctor => task_inner.run_doctor_start(start_token).await,
                Branch::Patient { credential } => {
                    task_inner.run_patient_start(credential, start_token).await
                }
            }
        });

        inner.snapshot().await
    }

    /// Explicit stop: `Recording → Stopped`. A no-op when not recording.
    pub async fn stop(&self) -> CaptureSnapshot {
        self.inner.stop_recording(None, StopReason::User).await;
        self.inner.snapshot().await
    }

    /// Tears the screen down: cancels every pending timer and releases the
    /// capture device if it is still recording.
    pub async fn unmount(&self) {
        self.inner.screen_token.cancel();
        self.inner.stop_recording(None, StopReason::Unmounted).await;

        let tasks = self.inner.state.lock().await.take_session_tasks();
        if let Some(tasks) = tasks {
            tasks.abort();
        }
        info!("Capture screen unmounted");
    }
}

impl ControllerInner {
    pub(crate) fn role_state(&self) -> RoleState {
        self.role.borrow().clone().unwrap_or(RoleState::Unresolved)
    }

    pub(crate) async fn snapshot(&self) -> CaptureSnapshot {
        let state = self.state.lock().await;
        CaptureSnapshot {
            role: self.role_state().role(),
            state: state.capture.clone(),
            feedback: state.feedback,
            color: self.thresholds.color_for(state.feedback).clone(),
            frame: self.frames.current(),
            reference: self.fetcher.state(),
            last_error: state.last_error.clone(),
        }
    }

    pub(crate) async fn emit_state(&self) {
        let snapshot = self.snapshot().await;
        let _ = self.events.send(CaptureEvent::StateChanged(snapshot));
    }

    fn emit_feedback(&self, value: f64) {
        let _ = self.events.send(CaptureEvent::FeedbackChanged {
            value,
            color: self.thresholds.color_for(value).clone(),
        });
    }

    async fn resolve_session(self: Arc<Self>, identity: Arc<dyn IdentityProvider>) {
        let resolver = RoleResolver::new(identity);
        let resolved = tokio::select! {
            _ = self.screen_token.cancelled() => return,
            resolved = resolver.resolve_role() => resolved,
        };
        self.role.send_replace(Some(resolved.clone()));
        self.emit_state().await;

        let RoleState::Resolved(ResolvedRole {
            role: SessionRole::Patient,
            credential,
        }) = resolved
        else {
            return;
        };

        let Some(object_name) = self.params.video_object_name.clone() else {
            let err = FetchError::NoReference;
            warn!("Patient screen mounted without a reference exercise");
            self.fetcher.mark_failed(&err);
            let _ = self.events.send(CaptureEvent::ReferenceFailed {
                message: err.to_string(),
            });
            return;
        };

        let fetched = tokio::select! {
            _ = self.screen_token.cancelled() => return,
            fetched = self.fetcher.fetch(&object_name, &credential) => fetched,
        };
        let event = match fetched {
            Ok(local_path) => CaptureEvent::ReferenceReady { local_path },
            Err(err) => CaptureEvent::ReferenceFailed {
                message: err.to_string(),
            },
        };
        let _ = self.events.send(event);
        self.emit_state().await;
    }

    async fn run_doctor_start(self: Arc<Self>, start_token: CancellationToken) {
        tokio::select! {
            _ = start_token.cancelled() => return,
            _ = time::sleep(self.settings.countdown()) => {}
        }
        self.start_device_recording(None, &start_token).await;
    }

    /// Pre-roll, then the reference must be available and loaded before the
    /// patient recording may start.
    async fn run_patient_start(self: Arc<Self>, credential: Credential, start_token: CancellationToken) {
        tokio::select! {
            _ = start_token.cancelled() => return,
            _ = time::sleep(self.settings.countdown()) => {}
        }

        let Some(object_name) = self.params.video_object_name.clone() else {
            self.hold_pending_start(FetchError::NoReference.to_string()).await;
            return;
        };

        let settled = tokio::select! {
            _ = start_token.cancelled() => return,
            settled = wait_until_settled(self.fetcher.subscribe()) => settled,
        };
        let local_path = match settled {
            Ok(path) => path,
            Err(message) => {
                self.hold_pending_start(message).await;
                return;
            }
        };

        {
            let mut state = self.state.lock().await;
            if start_token.is_cancelled() || !state.await_reference_playback() {
                return;
            }
        }
        self.emit_state().await;

        let loaded = tokio::select! {
            _ = start_token.cancelled() => {
                self.player.unload().await;
                return;
            }
            loaded = self.player.load(&local_path) => loaded,
        };
        match loaded {
            Ok(status) => debug!(
                "Reference loaded ({:?}ms); starting patient recording",
                status.duration_ms
            ),
            Err(err) => {
                error!("Reference playback failed: {err}");
                self.abort_pending_start(CaptureError::from(err).to_string()).await;
                return;
            }
        }

        let plan = PatientPlan {
            object_name,
            credential,
        };
        self.start_device_recording(Some(plan), &start_token).await;
    }

    /// The reference never became available. The start stays pending; no retry.
    async fn hold_pending_start(&self, message: String) {
        error!("Patient recording cannot start: {message}");
        self.state.lock().await.last_error = Some(message.clone());
        let _ = self.events.send(CaptureEvent::ReferenceFailed { message });
        self.emit_state().await;
    }

    async fn abort_pending_start(&self, message: String) {
        let aborted = self.state.lock().await.abort_start(message);
        if aborted {
            if self.role_state().role() == SessionRole::Patient {
                self.player.unload().await;
            }
            self.emit_state().await;
        }
    }

    async fn start_device_recording(
        self: &Arc<Self>,
        plan: Option<PatientPlan>,
        start_token: &CancellationToken,
    ) {
        if start_token.is_cancelled() {
            return;
        }

        let outcome = match self.capture.start_recording().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Recording failed to start: {err}");
                let _ = self.events.send(CaptureEvent::DeviceFailed {
                    message: err.to_string(),
                });
                self.abort_pending_start(err.to_string()).await;
                return;
            }
        };

        let recording_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().await;
            if start_token.is_cancelled() || !state.begin_recording(recording_id, Utc::now()) {
                drop(state);
                warn!("Recording start superseded; releasing capture device");
                if let Err(err) = self.capture.stop_recording().await {
                    warn!("Failed to release capture device: {err}");
                }
                return;
            }

            let session_token = self.screen_token.child_token();
            let mut handles = Vec::new();
            if let Some(plan) = plan {
                // Time zero for the attempt: frames count from the reference's start.
                self.frames.reset();
                handles.push(self.spawn_sampler(recording_id, plan, session_token.clone()));
                handles.push(self.spawn_playback_monitor(recording_id, session_token.clone()));
            }
            state.attach_tasks(SessionTasks::new(session_token, handles));
        }

        info!("Recording {recording_id} started");
        self.spawn_outcome_watcher(recording_id, outcome);
        self.emit_feedback(0.0);
        self.emit_state().await;
    }

    fn spawn_sampler(
        self: &Arc<Self>,
        recording_id: Uuid,
        plan: PatientPlan,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let sink: Arc<dyn ScoreSink> = self.clone();
        let ctx = SamplerContext {
            recording_id,
            object_name: plan.object_name,
            credential: plan.credential,
            interval: self.settings.sample_interval(),
            capture: self.capture.clone(),
            scoring: self.scoring.clone(),
            frames: self.frames.clone(),
            sink,
        };
        tokio::spawn(sampling_loop(ctx, token))
    }

    fn spawn_playback_monitor(
        self: &Arc<Self>,
        recording_id: Uuid,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            let ended = wait_for_reference_end(
                inner.player.clone(),
                inner.settings.playback_poll(),
                inner.settings.end_tolerance_ms,
                token,
            )
            .await;
            if ended {
                inner
                    .stop_recording(Some(recording_id), StopReason::ReferenceEnded)
                    .await;
            }
        })
    }

    fn spawn_outcome_watcher(self: &Arc<Self>, recording_id: Uuid, outcome: RecordingOutcome) {
        let inner = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = inner.screen_token.cancelled() => return,
                result = outcome => result.unwrap_or_else(|_| {
                    Err(DeviceError::Recording("recording ended without a result".into()))
                }),
            };
            inner.finish_recording(recording_id, result).await;
        });
    }

    /// `Recording → Stopped`. With `expected`, only stops that recording, so a
    /// timer firing after an earlier stop is a no-op.
    pub(crate) async fn stop_recording(&self, expected: Option<Uuid>, reason: StopReason) -> bool {
        let stopped = {
            let mut state = self.state.lock().await;
            match expected {
                Some(id) if !state.is_recording(id) => None,
                _ => state.stop(reason),
            }
        };
        let Some(session) = stopped else {
            debug!("Stop ignored: not recording");
            return false;
        };

        info!("Recording {} stopped ({:?})", session.id, reason);
        self.emit_feedback(0.0);
        self.emit_state().await;

        if let Err(err) = self.capture.stop_recording().await {
            error!("Failed to stop recording {}: {err}", session.id);
            self.finish_recording(session.id, Err(err)).await;
        }
        if self.role_state().role() == SessionRole::Patient {
            self.player.unload().await;
        }
        true
    }

    async fn finish_recording(
        &self,
        recording_id: Uuid,
        result: Result<RecordedVideo, DeviceError>,
    ) {
        match result {
            Ok(video) => {
                let path: PathBuf = video.path.clone();
                let stopped_here = {
                    let mut state = self.state.lock().await;
                    // The device can finish on its own while still recording.
                    let stopped_here = state.is_recording(recording_id)
                        && state.stop(StopReason::DeviceFinished).is_some();
                    if !state.attach_artifact(recording_id, video, Utc::now()) {
                        warn!("Ignoring stale recording result for {recording_id}");
                        return;
                    }
                    stopped_here
                };
                if stopped_here {
                    self.emit_feedback(0.0);
                    if self.role_state().role() == SessionRole::Patient {
                        self.player.unload().await;
                    }
                }
                info!("Recording {recording_id} saved to {}", path.display());
                self.emit_state().await;
            }
            Err(err) => {
                let failed = self
                    .state
                    .lock()
                    .await
                    .fail_recording(recording_id, err.to_string());
                if !failed {
                    warn!("Ignoring stale recording error for {recording_id}: {err}");
                    return;
                }
                error!("Recording {recording_id} failed: {err}");
                if self.role_state().role() == SessionRole::Patient {
                    self.player.unload().await;
                }
                let _ = self.events.send(CaptureEvent::DeviceFailed {
                    message: err.to_string(),
                });
                self.emit_feedback(0.0);
                self.emit_state().await;
            }
        }
    }
}

#[async_trait]
impl ScoreSink for ControllerInner {
    async fn apply_score(&self, recording_id: Uuid, score: f64) -> bool {
        let applied = self.state.lock().await.apply_score(recording_id, score);
        if applied {
            self.emit_feedback(score);
        }
        applied
    }
}
