use std::sync::Arc;

use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::capture::ReferencePlayer;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Polls the reference player until playback rests within `tolerance_ms` of
/// its end. Returns `false` if cancelled first.
pub async fn wait_for_reference_end(
    player: Arc<dyn ReferencePlayer>,
    poll: Duration,
    tolerance_ms: u64,
    cancel_token: CancellationToken,
) -> bool {
    let mut ticker = time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut polls: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_debug!("playback monitor cancelled after {polls} polls");
                return false;
            }
            _ = ticker.tick() => {
                polls += 1;
                let status = player.status();
                if status.finished_within(tolerance_ms) {
                    log_info!(
                        "reference playback ended at {}ms of {:?}ms",
                        status.position_ms,
                        status.duration_ms
                    );
                    return true;
                }
            }
        }
    }
}
