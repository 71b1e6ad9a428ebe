use std::path::PathBuf;

use serde::Serialize;

/// Lifecycle of the clinician's reference video on this device.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "camelCase")]
pub enum ReferenceArtifact {
    Unfetched,
    Fetching,
    Available(PathBuf),
    FetchFailed(String),
}

impl Default for ReferenceArtifact {
    fn default() -> Self {
        ReferenceArtifact::Unfetched
    }
}

impl ReferenceArtifact {
    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            ReferenceArtifact::Available(path) => Some(path),
            _ => None,
        }
    }

    /// True once the fetch has either produced a file or failed for good.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ReferenceArtifact::Available(_) | ReferenceArtifact::FetchFailed(_)
        )
    }
}
