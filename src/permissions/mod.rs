use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::CaptureError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    Camera,
    Microphone,
}

/// OS permission prompts, implemented by the host shell.
#[async_trait]
pub trait DevicePermissions: Send + Sync {
    fn is_granted(&self, kind: PermissionKind) -> bool;

    /// Shows the OS dialog for `kind` and resolves with the user's decision.
    async fn request(&self, kind: PermissionKind) -> bool;
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionState {
    pub camera_granted: bool,
    pub microphone_granted: bool,
}

impl PermissionState {
    pub fn all_granted(&self) -> bool {
        self.camera_granted && self.microphone_granted
    }

    fn missing(&self) -> Vec<PermissionKind> {
        let mut missing = Vec::new();
        if !self.camera_granted {
            missing.push(PermissionKind::Camera);
        }
        if !self.microphone_granted {
            missing.push(PermissionKind::Microphone);
        }
        missing
    }

    fn set(&mut self, kind: PermissionKind, granted: bool) {
        match kind {
            PermissionKind::Camera => self.camera_granted = granted,
            PermissionKind::Microphone => self.microphone_granted = granted,
        }
    }
}

/// Keeps the camera surface unmounted until both capture permissions are held.
///
/// The state is read once at construction and only refreshed by an explicit
/// [`PermissionGate::request_permissions`] or [`PermissionGate::refresh`].
pub struct PermissionGate {
    device: Arc<dyn DevicePermissions>,
    state: StdMutex<PermissionState>,
    request_lock: Mutex<()>,
    /// Bumped each time a prompt round finishes.
    decisions: AtomicU64,
}

impl PermissionGate {
    pub fn new(device: Arc<dyn DevicePermissions>) -> Self {
        let state = read_device(device.as_ref());
        Self {
            device,
            state: StdMutex::new(state),
            request_lock: Mutex::new(()),
            decisions: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> PermissionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn has_camera_permission(&self) -> bool {
        self.state().camera_granted
    }

    pub fn has_microphone_permission(&self) -> bool {
        self.state().microphone_granted
    }

    pub fn ensure_granted(&self) -> Result<(), CaptureError> {
        let state = self.state();
        if state.all_granted() {
            Ok(())
        } else {
            Err(CaptureError::PermissionDenied {
                camera: state.camera_granted,
                microphone: state.microphone_granted,
            })
        }
    }

    /// Prompts for whichever permissions are still missing. A call made while
    /// another prompt is on screen waits for that decision instead of opening
    /// a second dialog.
    pub async fn request_permissions(&self) -> PermissionState {
        let seen = self.decisions.load(Ordering::SeqCst);
        let _guard = self.request_lock.lock().await;
        if self.decisions.load(Ordering::SeqCst) != seen {
            return self.state();
        }

        let mut state = read_device(self.device.as_ref());
        for kind in state.missing() {
            info!("Requesting {kind:?} permission");
            let granted = self.device.request(kind).await;
            if !granted {
                warn!("{kind:?} permission denied");
            }
            state.set(kind, granted);
        }

        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        self.decisions.fetch_add(1, Ordering::SeqCst);
        state
    }

    pub fn refresh(&self) -> PermissionState {
        let state = read_device(self.device.as_ref());
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
        state
    }
}

fn read_device(device: &dyn DevicePermissions) -> PermissionState {
    PermissionState {
        camera_granted: device.is_granted(PermissionKind::Camera),
        microphone_granted: device.is_granted(PermissionKind::Microphone),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    #[derive(Default)]
    struct FakePermissions {
        camera: AtomicBool,
        microphone: AtomicBool,
        grant_on_request: bool,
        camera_prompts: AtomicUsize,
        microphone_prompts: AtomicUsize,
    }

    #[async_trait]
    impl DevicePermissions for FakePermissions {
        fn is_granted(&self, kind: PermissionKind) -> bool {
            match kind {
                PermissionKind::Camera => self.camera.load(Ordering::SeqCst),
                PermissionKind::Microphone => self.microphone.load(Ordering::SeqCst),
            }
        }

        async fn request(&self, kind: PermissionKind) -> bool {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let (flag, prompts) = match kind {
                PermissionKind::Camera => (&self.camera, &self.camera_prompts),
                PermissionKind::Microphone => (&self.microphone, &self.microphone_prompts),
            };
            prompts.fetch_add(1, Ordering::SeqCst);
            flag.store(self.grant_on_request, Ordering::SeqCst);
            self.grant_on_request
        }
    }

    #[test]
    fn gate_blocks_until_both_permissions_are_held() {
        let device = Arc::new(FakePermissions::default());
        device.camera.store(true, Ordering::SeqCst);
        let gate = PermissionGate::new(device);

        assert!(gate.has_camera_permission());
        assert!(!gate.has_microphone_permission());
        assert!(matches!(
            gate.ensure_granted(),
            Err(CaptureError::PermissionDenied {
                camera: true,
                microphone: false
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn requests_only_missing_permissions() {
        let device = Arc::new(FakePermissions {
            grant_on_request: true,
            ..Default::default()
        });
        device.camera.store(true, Ordering::SeqCst);
        let gate = PermissionGate::new(device.clone());

        let state = gate.request_permissions().await;

        assert!(state.all_granted());
        assert!(gate.ensure_granted().is_ok());
        assert_eq!(device.camera_prompts.load(Ordering::SeqCst), 0);
        assert_eq!(device.microphone_prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_prompt() {
        let device = Arc::new(FakePermissions {
            grant_on_request: true,
            ..Default::default()
        });
        let gate = PermissionGate::new(device.clone());

        let (first, second) = tokio::join!(gate.request_permissions(), gate.request_permissions());

        assert!(first.all_granted() && second.all_granted());
        assert_eq!(device.camera_prompts.load(Ordering::SeqCst), 1);
        assert_eq!(device.microphone_prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_requests_share_a_denial() {
        let device = Arc::new(FakePermissions::default());
        let gate = PermissionGate::new(device.clone());

        let (first, second) = tokio::join!(gate.request_permissions(), gate.request_permissions());

        assert_eq!(first, second);
        assert!(!first.camera_granted && !first.microphone_granted);
        assert_eq!(device.camera_prompts.load(Ordering::SeqCst), 1);
        assert_eq!(device.microphone_prompts.load(Ordering::SeqCst), 1);

        // A fresh request after the decision prompts again.
        gate.request_permissions().await;
        assert_eq!(device.camera_prompts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_keeps_gate_closed_until_rerequested() {
        let device = Arc::new(FakePermissions::default());
        let gate = PermissionGate::new(device.clone());

        let state = gate.request_permissions().await;
        assert!(!state.all_granted());
        assert!(gate.ensure_granted().is_err());

        // Granted later in system settings; nothing changes until re-checked.
        device.camera.store(true, Ordering::SeqCst);
        device.microphone.store(true, Ordering::SeqCst);
        assert!(gate.ensure_granted().is_err());
        assert!(gate.refresh().all_granted());
        assert!(gate.ensure_granted().is_ok());
    }
}
