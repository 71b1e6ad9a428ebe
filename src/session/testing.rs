//! In-memory collaborators for driving the capture loop on virtual time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::api::{ArtifactStore, FeedbackScore, SampleUpload, ScoringService, VideoUpload};
use crate::capture::{CaptureSurface, PlaybackStatus, RecordingOutcome, ReferencePlayer, Snapshot};
use crate::config::RehabSettings;
use crate::error::{
    ApiError, CaptureError, DeviceError, FetchError, IdentityError, PlaybackError, ScoringError,
    UploadError,
};
use crate::identity::{IdentityProvider, IdentityUser, TokenClaims};
use crate::models::{Credential, RecordedVideo, UploadReceipt, VideoSummary};
use crate::permissions::{DevicePermissions, PermissionGate, PermissionKind};

use super::{CaptureController, ScreenParams};

/// Smallest byte sequence `image::guess_format` reports as JPEG.
pub(crate) const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

type PendingRecording = oneshot::Sender<Result<RecordedVideo, DeviceError>>;

pub(crate) struct FakeCapture {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub snapshots: AtomicUsize,
    pub fail_start: AtomicBool,
    pending: Mutex<Option<PendingRecording>>,
    snapshot_path: PathBuf,
    video_path: PathBuf,
}

impl FakeCapture {
    fn new(dir: &Path) -> Self {
        let snapshot_path = dir.join("snapshot.jpg");
        std::fs::write(&snapshot_path, JPEG_BYTES).unwrap();
        Self {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            snapshots: AtomicUsize::new(0),
            fail_start: AtomicBool::new(false),
            pending: Mutex::new(None),
            snapshot_path,
            video_path: dir.join("attempt.mov"),
        }
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    /// Simulates the device's error callback for the active recording.
    pub fn fail_recording(&self, message: &str) {
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(Err(DeviceError::Recording(message.to_string())));
        }
    }

    /// Simulates the device finishing the file without a stop request.
    pub fn finish_unprompted(&self) {
        if let Some(tx) = self.pending.lock().unwrap().take() {
            let _ = tx.send(Ok(RecordedVideo {
                path: self.video_path.clone(),
                duration_ms: None,
            }));
        }
    }
}

#[async_trait]
impl CaptureSurface for FakeCapture {
    async fn start_recording(&self) -> Result<RecordingOutcome, DeviceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::Unavailable);
        }
        let (tx, rx) = oneshot::channel();
        *self.pending.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop_recording(&self) -> Result<(), DeviceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish_unprompted();
        Ok(())
    }

    async fn take_snapshot(&self) -> Result<Snapshot, DeviceError> {
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(Snapshot {
            path: self.snapshot_path.clone(),
        })
    }
}

/// Plays for `duration_ms` of virtual time after `load`, then rests at the end.
pub(crate) struct FakePlayer {
    duration_ms: u64,
    fail_load: bool,
    loaded_at: Mutex<Option<Instant>>,
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
}

#[async_trait]
impl ReferencePlayer for FakePlayer {
    async fn load(&self, _source: &Path) -> Result<PlaybackStatus, PlaybackError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(PlaybackError::Load("unsupported codec".into()));
        }
        *self.loaded_at.lock().unwrap() = Some(Instant::now());
        Ok(self.status())
    }

    fn status(&self) -> PlaybackStatus {
        let Some(loaded_at) = *self.loaded_at.lock().unwrap() else {
            return PlaybackStatus::default();
        };
        let elapsed = loaded_at.elapsed().as_millis() as u64;
        PlaybackStatus {
            is_loaded: true,
            position_ms: elapsed.min(self.duration_ms),
            duration_ms: Some(self.duration_ms),
            is_playing: elapsed < self.duration_ms,
        }
    }

    async fn unload(&self) {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        *self.loaded_at.lock().unwrap() = None;
    }
}

/// Scripted backend reply for one sample.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reply {
    Score(f64),
    /// 200 with no `mean_thresh`.
    Absent,
    /// Non-2xx from the scorer.
    Fail,
}

pub(crate) struct FakeScoring {
    score: Option<f64>,
    delay: Duration,
    /// `(delay_ms, reply)` per sample in submission order; later samples fall
    /// back to `score` and `delay`.
    script: Vec<(u64, Reply)>,
    pub submissions: Mutex<Vec<(u64, Instant)>>,
}

impl FakeScoring {
    pub fn submitted(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn frames(&self) -> Vec<u64> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|(frame, _)| *frame)
            .collect()
    }
}

#[async_trait]
impl ScoringService for FakeScoring {
    async fn submit_sample(
        &self,
        sample: SampleUpload,
        credential: &Credential,
    ) -> Result<FeedbackScore, ScoringError> {
        assert_eq!(credential.as_str(), "test-token");
        assert_eq!(sample.image, JPEG_BYTES);
        let index = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push((sample.frame, Instant::now()));
            submissions.len() - 1
        };
        let (delay, reply) = match self.script.get(index) {
            Some((delay_ms, reply)) => (Duration::from_millis(*delay_ms), *reply),
            None => (
                self.delay,
                self.score.map(Reply::Score).unwrap_or(Reply::Absent),
            ),
        };
        tokio::time::sleep(delay).await;
        match reply {
            Reply::Score(value) => Ok(FeedbackScore {
                mean_thresh: Some(value),
            }),
            Reply::Absent => Ok(FeedbackScore { mean_thresh: None }),
            Reply::Fail => Err(ScoringError::Status(502)),
        }
    }
}

pub(crate) struct FakeStore {
    fail_download: bool,
    download_delay: Duration,
    pub uploads: Mutex<Vec<VideoUpload>>,
    upload_result: Mutex<Result<UploadReceipt, UploadError>>,
}

impl FakeStore {
    pub fn reject_uploads(&self, status: u16, message: &str) {
        *self.upload_result.lock().unwrap() = Err(UploadError::Rejected {
            status,
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl ArtifactStore for FakeStore {
    async fn upload(
        &self,
        upload: VideoUpload,
        _credential: &Credential,
    ) -> Result<UploadReceipt, UploadError> {
        self.uploads.lock().unwrap().push(upload);
        self.upload_result.lock().unwrap().clone()
    }

    async fn download(
        &self,
        _object_name: &str,
        dest: &Path,
        _credential: &Credential,
    ) -> Result<PathBuf, FetchError> {
        tokio::time::sleep(self.download_delay).await;
        if self.fail_download {
            return Err(FetchError::Status(503));
        }
        Ok(dest.to_path_buf())
    }

    async fn list_videos(&self, _credential: &Credential) -> Result<Vec<VideoSummary>, ApiError> {
        Ok(Vec::new())
    }
}

struct FakeUser {
    role: Option<String>,
    delay: Duration,
}

#[async_trait]
impl IdentityUser for FakeUser {
    async fn token_claims(&self, _force_refresh: bool) -> Result<TokenClaims, IdentityError> {
        tokio::time::sleep(self.delay).await;
        Ok(TokenClaims {
            role: self.role.clone(),
        })
    }

    async fn id_token(&self, _force_refresh: bool) -> Result<Credential, IdentityError> {
        Ok(Credential::new("test-token"))
    }
}

struct FakeIdentity(Arc<FakeUser>);

impl IdentityProvider for FakeIdentity {
    fn current_user(&self) -> Option<Arc<dyn IdentityUser>> {
        Some(self.0.clone())
    }
}

pub(crate) struct FakePermissions {
    pub granted: bool,
}

#[async_trait]
impl DevicePermissions for FakePermissions {
    fn is_granted(&self, _kind: PermissionKind) -> bool {
        self.granted
    }

    async fn request(&self, _kind: PermissionKind) -> bool {
        self.granted
    }
}

pub(crate) fn granted_gate() -> PermissionGate {
    PermissionGate::new(Arc::new(FakePermissions { granted: true }))
}

/// Knobs for one simulated screen. Defaults: patient with a 30s reference,
/// scores of 620 arriving 500ms after each sample.
pub(crate) struct HarnessConfig {
    pub role: Option<&'static str>,
    pub role_delay: Duration,
    pub object_name: Option<&'static str>,
    pub patient_id: Option<&'static str>,
    pub fail_download: bool,
    pub download_delay: Duration,
    pub reference_duration_ms: u64,
    pub fail_load: bool,
    pub score: Option<f64>,
    pub score_delay: Duration,
    pub score_script: Vec<(u64, Reply)>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            role: Some("patient"),
            role_delay: Duration::ZERO,
            object_name: Some("doctor-7/videos/shoulder-raise.mp4"),
            patient_id: None,
            fail_download: false,
            download_delay: Duration::ZERO,
            reference_duration_ms: 30_000,
            fail_load: false,
            score: Some(620.0),
            score_delay: Duration::from_millis(500),
            score_script: Vec::new(),
        }
    }
}

impl HarnessConfig {
    pub fn doctor() -> Self {
        Self {
            role: Some("doctor"),
            object_name: None,
            patient_id: Some("patient-42"),
            ..Self::default()
        }
    }
}

pub(crate) struct Harness {
    pub controller: CaptureController,
    pub capture: Arc<FakeCapture>,
    pub player: Arc<FakePlayer>,
    pub scoring: Arc<FakeScoring>,
    pub store: Arc<FakeStore>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn mount(config: HarnessConfig) -> Self {
        Self::mount_with(config, &granted_gate()).unwrap()
    }

    pub fn mount_with(config: HarnessConfig, gate: &PermissionGate) -> Result<Self, CaptureError> {
        let dir = tempfile::tempdir().unwrap();
        let capture = Arc::new(FakeCapture::new(dir.path()));
        let player = Arc::new(FakePlayer {
            duration_ms: config.reference_duration_ms,
            fail_load: config.fail_load,
            loaded_at: Mutex::new(None),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        });
        let scoring = Arc::new(FakeScoring {
            score: config.score,
            delay: config.score_delay,
            script: config.score_script,
            submissions: Mutex::new(Vec::new()),
        });
        let store = Arc::new(FakeStore {
            fail_download: config.fail_download,
            download_delay: config.download_delay,
            uploads: Mutex::new(Vec::new()),
            upload_result: Mutex::new(Ok(UploadReceipt {
                id: Some(1),
                object_name: Some("uploads/attempt.mov".into()),
            })),
        });
        let identity = Arc::new(FakeIdentity(Arc::new(FakeUser {
            role: config.role.map(String::from),
            delay: config.role_delay,
        })));

        let settings = RehabSettings {
            cache_dir: Some(dir.path().join("cache")),
            ..RehabSettings::default()
        };
        let services = super::CaptureServices {
            capture: capture.clone(),
            player: player.clone(),
            scoring: scoring.clone(),
            store: store.clone(),
            identity,
        };
        let params = ScreenParams {
            video_object_name: config.object_name.map(String::from),
            patient_id: config.patient_id.map(String::from),
        };

        let controller = CaptureController::mount(gate, services, settings, params)?;

        Ok(Self {
            controller,
            capture,
            player,
            scoring,
            store,
            _dir: dir,
        })
    }

    /// Mounts and waits until the role is known.
    pub async fn ready(config: HarnessConfig) -> Self {
        let harness = Self::mount(config);
        harness.controller.wait_for_role().await;
        harness
    }
}

/// Advances virtual time to `ms` after `origin`.
pub(crate) async fn advance_to(origin: Instant, ms: u64) {
    tokio::time::sleep_until(origin + Duration::from_millis(ms)).await;
}
