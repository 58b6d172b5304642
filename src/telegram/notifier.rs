//! User notification seam.
//!
//! The admission flow talks to the messaging platform only through the
//! [`Notifier`] trait, so the core stays testable without a Telegram
//! connection. [`TelegramNotifier`] is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, MessageId};
use tokio::sync::Mutex;

use crate::core::error::{BotResult, ResourceExhausted};
use crate::core::utils::{format_bytes, format_eta, format_speed, wait_secs_for_display};
use crate::download::progress::{create_progress_bar, ProgressSnapshot};
use crate::download::ytdlp::DownloadedMedia;

/// Abstract notify operations the admission flow calls.
///
/// One instance corresponds to one request/chat; implementations may
/// keep per-request state such as the status message being edited.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The request was denied by the rate limiter.
    async fn rate_limited(&self, wait: Duration) -> BotResult<()>;

    /// The request was denied a download slot.
    async fn busy(&self, cause: &ResourceExhausted) -> BotResult<()>;

    /// A progress snapshot for the running download.
    async fn progress(&self, snapshot: &ProgressSnapshot) -> BotResult<()>;

    /// The download finished; deliver the file.
    async fn media_ready(&self, media: &DownloadedMedia) -> BotResult<()>;

    /// The download failed.
    async fn failed(&self, reason: &str) -> BotResult<()>;
}

/// Sends notifications to one Telegram chat, reusing a single status
/// message for progress edits.
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
    status_message: Mutex<Option<MessageId>>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id,
            status_message: Mutex::new(None),
        }
    }

    /// Edits the status message, creating it on first use.
    async fn upsert_status(&self, text: &str) -> BotResult<()> {
        let mut status = self.status_message.lock().await;
        match *status {
            Some(message_id) => {
                self.bot.edit_message_text(self.chat_id, message_id, text).await?;
            }
            None => {
                let sent = self.bot.send_message(self.chat_id, text).await?;
                *status = Some(sent.id);
            }
        }
        Ok(())
    }

    /// Deletes the status message if one was created. Best-effort.
    async fn clear_status(&self) {
        let mut status = self.status_message.lock().await;
        if let Some(message_id) = status.take() {
            if let Err(e) = self.bot.delete_message(self.chat_id, message_id).await {
                log::debug!("Failed to delete status message: {}", e);
            }
        }
    }

    fn is_audio(media: &DownloadedMedia) -> bool {
        matches!(
            media.path.extension().and_then(|e| e.to_str()),
            Some("mp3") | Some("m4a")
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn rate_limited(&self, wait: Duration) -> BotResult<()> {
        self.bot
            .send_message(
                self.chat_id,
                format!(
                    "⏳ Too many requests. Please wait {}s and try again.",
                    wait_secs_for_display(wait)
                ),
            )
            .await?;
        Ok(())
    }

    async fn busy(&self, cause: &ResourceExhausted) -> BotResult<()> {
        let text = match cause {
            ResourceExhausted::Global { active } => format!(
                "🚦 Server is busy ({} active downloads). Please try again later.",
                active
            ),
            ResourceExhausted::User { active } => format!(
                "⏳ You already have {} active downloads. Please wait for them to complete.",
                active
            ),
        };
        self.bot.send_message(self.chat_id, text).await?;
        Ok(())
    }

    async fn progress(&self, snapshot: &ProgressSnapshot) -> BotResult<()> {
        let text = format!(
            "⬇️ Downloading...\n\n{} {:.0}%\n🚀 Speed: {}\n⏳ ETA: {}",
            create_progress_bar(snapshot.percent),
            snapshot.percent,
            format_speed(snapshot.speed_bps),
            format_eta(snapshot.eta),
        );
        self.upsert_status(&text).await
    }

    async fn media_ready(&self, media: &DownloadedMedia) -> BotResult<()> {
        self.clear_status().await;

        let caption = format!("🎬 {}\n📁 {}", media.title, format_bytes(media.size));
        let file = InputFile::file(&media.path);
        if Self::is_audio(media) {
            self.bot.send_audio(self.chat_id, file).caption(caption).await?;
        } else {
            self.bot
                .send_video(self.chat_id, file)
                .caption(caption)
                .supports_streaming(true)
                .await?;
        }
        Ok(())
    }

    async fn failed(&self, reason: &str) -> BotResult<()> {
        self.clear_status().await;
        self.bot
            .send_message(self.chat_id, format!("❌ Download failed: {}", reason))
            .await?;
        Ok(())
    }
}
