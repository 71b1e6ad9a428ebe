use std::sync::atomic::{AtomicU64, Ordering};

/// Camera frames seen since the patient recording started. The host's frame
/// callback bumps it; samples are tagged with the current value.
#[derive(Debug, Default)]
pub struct FrameCounter(AtomicU64);

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}
