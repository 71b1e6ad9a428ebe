pub mod controller;
pub mod events;
pub mod monitor;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{CaptureController, CaptureServices, ScreenParams};
pub use events::{CaptureEvent, CaptureSnapshot};
pub use state::{CaptureState, RecordingSession, StopReason};
