pub mod reference;
pub mod role;
pub mod video;

pub use reference::ReferenceArtifact;
pub use role::{Credential, SessionRole};
pub use video::{ArtifactStatus, CapturedVideo, MediaType, RecordedVideo, UploadReceipt, VideoSummary};
