use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{SampleUpload, ScoringService};
use crate::capture::{CaptureSurface, FrameCounter};
use crate::error::ScoringError;
use crate::models::Credential;

// Set to false to silence per-sample logging
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Receives scores for a recording. Implementations drop scores for a
/// recording that is no longer active.
#[async_trait]
pub trait ScoreSink: Send + Sync {
    async fn apply_score(&self, recording_id: Uuid, score: f64) -> bool;
}

#[derive(Clone)]
pub struct SamplerContext {
    pub recording_id: Uuid,
    pub object_name: String,
    pub credential: Credential,
    pub interval: Duration,
    pub capture: Arc<dyn CaptureSurface>,
    pub scoring: Arc<dyn ScoringService>,
    pub frames: Arc<FrameCounter>,
    pub sink: Arc<dyn ScoreSink>,
}

/// Takes a snapshot every `interval` and scores it. Each sample runs as its
/// own task so a slow response never delays the next snapshot.
pub async fn sampling_loop(ctx: SamplerContext, cancel_token: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sample_no: u64 = 0;

    log_info!(
        "sampling started for recording {} every {}ms",
        ctx.recording_id,
        ctx.interval.as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampling stopped for recording {} after {} samples", ctx.recording_id, sample_no);
                break;
            }
            _ = ticker.tick() => {
                sample_no += 1;
                tokio::spawn(run_sample(ctx.clone(), cancel_token.clone(), sample_no));
            }
        }
    }
}

async fn run_sample(ctx: SamplerContext, cancel_token: CancellationToken, sample_no: u64) {
    let started = Instant::now();
    match score_sample(&ctx, &cancel_token).await {
        Ok(Some(score)) => {
            if cancel_token.is_cancelled() {
                log_debug!("discarding late score {score} for sample {sample_no}");
                return;
            }
            let applied = ctx.sink.apply_score(ctx.recording_id, score).await;
            log_debug!(
                "sample {} scored {} in {}ms (applied: {})",
                sample_no,
                score,
                started.elapsed().as_millis(),
                applied
            );
        }
        Ok(None) => log_debug!("sample {sample_no} produced no applicable score"),
        Err(err) => log_warn!("sample {} skipped: {}", sample_no, err),
    }
}

async fn score_sample(
    ctx: &SamplerContext,
    cancel_token: &CancellationToken,
) -> Result<Option<f64>, ScoringError> {
    let frame = ctx.frames.current();
    let snapshot = ctx.capture.take_snapshot().await?;
    let bytes = tokio::fs::read(&snapshot.path).await?;
    let image = ensure_jpeg(bytes).await?;

    // Stopped while the snapshot was being taken
    if cancel_token.is_cancelled() {
        return Ok(None);
    }

    let file_name = snapshot
        .path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot.jpg")
        .to_string();
    let upload = SampleUpload {
        image,
        file_name,
        object_name: ctx.object_name.clone(),
        frame,
    };

    let score = ctx.scoring.submit_sample(upload, &ctx.credential).await?;
    Ok(score.applicable())
}

/// The scorer only takes JPEG; other snapshot formats are re-encoded off the
/// async runtime.
async fn ensure_jpeg(bytes: Vec<u8>) -> Result<Vec<u8>, ScoringError> {
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Jpeg) => Ok(bytes),
        Ok(_) => tokio::task::spawn_blocking(move || reencode_jpeg(&bytes))
            .await
            .map_err(|e| ScoringError::Encode(format!("encoder worker join failed: {e}")))?,
        Err(err) => Err(ScoringError::Encode(err.to_string())),
    }
}

fn reencode_jpeg(bytes: &[u8]) -> Result<Vec<u8>, ScoringError> {
    let img = image::load_from_memory(bytes).map_err(|e| ScoringError::Encode(e.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut out, ImageFormat::Jpeg)
        .map_err(|e| ScoringError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jpeg_snapshots_pass_through_untouched() {
        let jpeg = crate::session::testing::JPEG_BYTES.to_vec();
        assert_eq!(ensure_jpeg(jpeg.clone()).await.unwrap(), jpeg);
    }

    #[tokio::test]
    async fn png_snapshots_are_reencoded() {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::new_rgba8(4, 4)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let encoded = ensure_jpeg(png.into_inner()).await.unwrap();

        assert_eq!(image::guess_format(&encoded).unwrap(), ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn unrecognised_bytes_are_rejected() {
        let result = ensure_jpeg(b"not an image".to_vec()).await;
        assert!(matches!(result, Err(ScoringError::Encode(_))));
    }
}
