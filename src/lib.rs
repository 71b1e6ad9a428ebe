pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod feedback;
pub mod identity;
pub mod models;
pub mod permissions;
pub mod reference;
pub mod review;
pub mod session;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

pub use api::{ApiClient, HealthStatus};
pub use capture::{CaptureSurface, ReferencePlayer};
pub use config::{RehabSettings, SettingsStore};
pub use error::{CaptureError, UploadError};
pub use identity::IdentityProvider;
pub use permissions::PermissionGate;
pub use session::{
    CaptureController, CaptureEvent, CaptureServices, CaptureSnapshot, CaptureState, ScreenParams,
};

/// Process-wide state a host shell keeps for the app's lifetime.
pub struct RehabPal {
    settings: SettingsStore,
    api: ApiClient,
}

impl RehabPal {
    /// Loads `settings.json` from `app_data_dir`, sets up logging and builds
    /// the backend client.
    pub fn init(app_data_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(app_data_dir)
            .with_context(|| format!("Failed to create {}", app_data_dir.display()))?;
        let settings = SettingsStore::new(app_data_dir.join("settings.json"))?;
        let effective = settings.settings();

        utils::logging::init(effective.debug);
        info!("RehabPal starting up...");

        let api = ApiClient::new(&effective.api_url, effective.request_timeout())?;
        info!("Backend at {}", effective.api_url);

        Ok(Self { settings, api })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Logs whether the backend is reachable; never fails startup.
    pub async fn check_backend(&self) -> Option<HealthStatus> {
        match self.api.health().await {
            Ok(status) => {
                info!("Backend healthy: {}", status.status);
                Some(status)
            }
            Err(err) => {
                warn!("Backend health check failed: {err}");
                None
            }
        }
    }

    /// Mounts a capture screen wired to this app's backend client.
    pub fn open_capture_screen(
        &self,
        gate: &PermissionGate,
        capture: Arc<dyn CaptureSurface>,
        player: Arc<dyn ReferencePlayer>,
        identity: Arc<dyn IdentityProvider>,
        params: ScreenParams,
    ) -> Result<CaptureController, CaptureError> {
        let services = CaptureServices::with_api(self.api.clone(), capture, player, identity);
        CaptureController::mount(gate, services, self.settings.settings(), params)
    }
}
