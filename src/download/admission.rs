//! Request admission flow.
//!
//! Every download request passes through the same gate sequence:
//! rate limiter first, then a download slot, then the external engine.
//! Each stage is terminal on denial, and the slot is held by an RAII
//! guard so it is released on every exit path, including errors and
//! cancellation of the request task.
//!
//! State machine per request:
//! `Received → RateLimited? → SlotCheck? → Downloading → {Succeeded | Failed} → SlotReleased`

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::core::error::{BotError, BotResult};
use crate::core::rate_limiter::{LimitDecision, RateLimiter};
use crate::core::resource_manager::ResourceManager;
use crate::core::utils::format_bytes;
use crate::download::progress::DownloadProgress;
use crate::download::ytdlp::{DownloadOptions, MediaDownloader};
use crate::telegram::notifier::Notifier;

/// How often the status-message updater polls the progress tracker.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum percentage step between two status-message edits.
const PROGRESS_STEP: f64 = 10.0;

/// One admitted (or rejected) download request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Requesting user, the key for rate limiting and slot accounting.
    pub user_id: i64,
    /// Validated and sanitized media URL.
    pub url: Url,
    pub options: DownloadOptions,
}

/// Runs one request through the admission gates and the download engine.
///
/// Denials notify the user with a stage-specific message and return the
/// corresponding typed error without touching later stages: a
/// rate-limited request never asks for a slot, a slot-denied request
/// never starts a download. Downstream download failures are propagated
/// unchanged; in every case the slot is released before this function
/// returns.
pub async fn run_admitted_download(
    limiter: &RateLimiter,
    resources: &ResourceManager,
    downloader: &dyn MediaDownloader,
    notifier: Arc<dyn Notifier>,
    request: &DownloadRequest,
) -> BotResult<()> {
    // Stage 1: rate limit. Terminal on denial, no slot is requested.
    if let LimitDecision::Denied { wait } = limiter.check_limit(request.user_id).await {
        notify_or_log(notifier.rate_limited(wait).await);
        return Err(BotError::RateLimited { wait });
    }

    // Stage 2: download slot. Terminal on denial, no download attempted.
    let slot = match resources.acquire_slot(request.user_id) {
        Ok(slot) => slot,
        Err(cause) => {
            notify_or_log(notifier.busy(&cause).await);
            return Err(cause.into());
        }
    };

    // Stage 3: download, with a concurrent status updater. The updater
    // runs on its own task so editing the status message never blocks
    // the download, and aborting it cannot affect the download.
    let progress = DownloadProgress::new();
    let updater = spawn_progress_updater(Arc::clone(&notifier), progress.clone());

    let result = downloader
        .download(&request.url, &request.options, progress.clone())
        .await;

    progress.finish();
    updater.abort();

    // Release the slot before reporting; the guard would also drop on
    // any early return or panic above.
    drop(slot);

    match result {
        Ok(media) => {
            notify_or_log(notifier.media_ready(&media).await);
            Ok(())
        }
        Err(err) => {
            log::error!("Download failed for user {}: {}", request.user_id, err);
            notify_or_log(notifier.failed(&describe_failure(&err)).await);
            Err(err)
        }
    }
}

/// Periodically forwards progress snapshots to the notifier.
///
/// Edits are throttled: at most one per poll tick, and only when the
/// percentage moved by at least [`PROGRESS_STEP`] since the last edit.
fn spawn_progress_updater(
    notifier: Arc<dyn Notifier>,
    progress: DownloadProgress,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        let mut last_percent = -PROGRESS_STEP;

        loop {
            interval.tick().await;
            let snapshot = progress.snapshot();
            if snapshot.finished {
                break;
            }
            if snapshot.percent >= last_percent + PROGRESS_STEP {
                last_percent = snapshot.percent;
                notify_or_log(notifier.progress(&snapshot).await);
            }
        }
    })
}

/// Builds the user-facing reason for a failed download.
fn describe_failure(err: &BotError) -> String {
    match err {
        BotError::FileTooLarge { size, limit } => format!(
            "file size ({}) exceeds the limit of {}",
            format_bytes(*size),
            format_bytes(*limit)
        ),
        BotError::Download(reason) => reason.clone(),
        other => other.to_string(),
    }
}

/// Notification failures must not mask the download outcome; log and move on.
fn notify_or_log(result: BotResult<()>) {
    if let Err(e) = result {
        log::warn!("Failed to notify user: {}", e);
    }
}
