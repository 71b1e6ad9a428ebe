use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::watch;

use crate::api::ArtifactStore;
use crate::error::{ApiError, FetchError};
use crate::models::{Credential, ReferenceArtifact, VideoSummary};

const FALLBACK_FILE_NAME: &str = "reference.mp4";

/// Cache location for `object_name`: its final path segment inside `cache_dir`,
/// so fetching the same object twice overwrites rather than duplicates.
pub fn cache_path_for(cache_dir: &Path, object_name: &str) -> PathBuf {
    let file_name = object_name
        .rsplit('/')
        .find(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or(FALLBACK_FILE_NAME);
    cache_dir.join(file_name)
}

/// Downloads the clinician's reference video for the patient branch.
pub struct ReferenceFetcher {
    store: Arc<dyn ArtifactStore>,
    cache_dir: PathBuf,
    state: watch::Sender<ReferenceArtifact>,
}

impl ReferenceFetcher {
    pub fn new(store: Arc<dyn ArtifactStore>, cache_dir: PathBuf) -> Self {
        let (state, _) = watch::channel(ReferenceArtifact::Unfetched);
        Self {
            store,
            cache_dir,
            state,
        }
    }

    pub fn state(&self) -> ReferenceArtifact {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReferenceArtifact> {
        self.state.subscribe()
    }

    pub async fn fetch(
        &self,
        object_name: &str,
        credential: &Credential,
    ) -> Result<PathBuf, FetchError> {
        let dest = cache_path_for(&self.cache_dir, object_name);
        self.state.send_replace(ReferenceArtifact::Fetching);
        info!("Downloading reference {} to {}", object_name, dest.display());

        match self.store.download(object_name, &dest, credential).await {
            Ok(local_path) => {
                self.state
                    .send_replace(ReferenceArtifact::Available(local_path.clone()));
                Ok(local_path)
            }
            Err(err) => {
                error!("Reference download failed for {}: {}", object_name, err);
                self.state
                    .send_replace(ReferenceArtifact::FetchFailed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Reference exercises the backend offers, for picking an object name.
    pub async fn list_available(
        &self,
        credential: &Credential,
    ) -> Result<Vec<VideoSummary>, ApiError> {
        let videos = self.store.list_videos(credential).await?;
        info!("{} reference videos available", videos.len());
        Ok(videos)
    }

    /// Marks the reference unusable without attempting a download.
    pub fn mark_failed(&self, err: &FetchError) {
        self.state
            .send_replace(ReferenceArtifact::FetchFailed(err.to_string()));
    }
}

/// Waits until the reference is available or has failed for good.
pub async fn wait_until_settled(
    mut rx: watch::Receiver<ReferenceArtifact>,
) -> Result<PathBuf, String> {
    let settled = match rx.wait_for(ReferenceArtifact::is_settled).await {
        Ok(state) => state.clone(),
        Err(_) => return Err("reference fetcher dropped".to_string()),
    };
    match settled {
        ReferenceArtifact::Available(path) => Ok(path),
        ReferenceArtifact::FetchFailed(message) => Err(message),
        _ => Err("reference fetch did not settle".to_string()),
    }
}
