pub mod sampler;
pub mod thresholds;

pub use sampler::{sampling_loop, SamplerContext, ScoreSink};
pub use thresholds::{default_entries, Color, ThresholdEntry, ThresholdError, ThresholdTable};
