//! Message and command handlers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MaybeInaccessibleMessage};
use teloxide::utils::command::BotCommands;
use url::Url;

use crate::core::config::BotConfig;
use crate::core::rate_limiter::RateLimiter;
use crate::core::resource_manager::ResourceManager;
use crate::core::utils::wait_secs_for_display;
use crate::core::validation::{extract_url, sanitize_url, validate_url};
use crate::download::admission::{run_admitted_download, DownloadRequest};
use crate::download::ytdlp::{DownloadOptions, MediaDownloader, Quality};
use crate::telegram::notifier::TelegramNotifier;

const USAGE_TEXT: &str = "📖 Send me a video link and I'll download it for you.\n\n\
✅ Supported platforms:\n\
📺 YouTube (videos & shorts)\n\
🎵 TikTok (tiktok.com, vm.tiktok.com)\n\
📸 Instagram (posts & reels)\n\n\
Commands:\n\
/status – your current limits and active downloads\n\
/cancel – free your download slots";

/// Callback data prefix for the quality menu.
const QUALITY_CALLBACK_PREFIX: &str = "dl";

/// Shared handler dependencies, built once in `main`.
pub struct HandlerDeps {
    pub config: BotConfig,
    pub rate_limiter: RateLimiter,
    pub resources: ResourceManager,
    pub downloader: Arc<dyn MediaDownloader>,
    pub pending: PendingDownloads,
}

/// Validated links waiting for the user to pick a quality.
///
/// Each entry is created when a link passes validation and consumed by
/// the matching button press. A user has at most one pending link; a
/// newer link replaces the older one, so abandoned menus do not pile up.
#[derive(Default)]
pub struct PendingDownloads {
    entries: Mutex<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
}

struct PendingEntry {
    user_id: i64,
    url: Url,
}

impl PendingDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries are plain data and the lock is never held across an await.
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, PendingEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a validated link and returns its menu id, replacing any
    /// earlier pending link of the same user.
    pub fn insert(&self, user_id: i64, url: Url) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries();
        entries.retain(|_, entry| entry.user_id != user_id);
        entries.insert(id, PendingEntry { user_id, url });
        id
    }

    /// Consumes the entry for `id` if it belongs to `user_id`.
    ///
    /// A press by anyone else leaves the entry in place, so only the
    /// requester can spend their pending link.
    pub fn take(&self, id: u64, user_id: i64) -> Option<Url> {
        let mut entries = self.entries();
        match entries.get(&id) {
            Some(entry) if entry.user_id == user_id => entries.remove(&id).map(|e| e.url),
            _ => None,
        }
    }

    /// Number of links currently awaiting a quality choice.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "how to use the bot")]
    Help,
    #[command(description = "current download and rate limit status")]
    Status,
    #[command(description = "free your download slots")]
    Cancel,
    #[command(description = "admin: reset the global rate limit")]
    ResetLimits,
}

/// Builds the dispatcher tree: callbacks, then commands, then plain messages.
pub fn schema() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_quality_callback))
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(handle_command))
                .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_message)),
        )
}

fn user_id_of(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(msg.chat.id.0, |u| u.id.0 as i64)
}

/// Inline keyboard offering the download qualities for one pending link.
fn quality_keyboard(pending_id: u64) -> InlineKeyboardMarkup {
    let button = |quality: Quality| {
        InlineKeyboardButton::callback(
            quality.label(),
            format!("{}:{}:{}", QUALITY_CALLBACK_PREFIX, pending_id, quality.code()),
        )
    };

    InlineKeyboardMarkup::new(vec![
        vec![button(Quality::Best), button(Quality::Medium480)],
        vec![button(Quality::Low360), button(Quality::AudioOnly)],
    ])
}

/// Parses `dl:<pending_id>:<quality_code>` callback data.
fn parse_quality_callback(data: &str) -> Option<(u64, Quality)> {
    let rest = data.strip_prefix(QUALITY_CALLBACK_PREFIX)?.strip_prefix(':')?;
    let (id, code) = rest.split_once(':')?;
    Some((id.parse().ok()?, Quality::from_code(code)?))
}

pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, deps: Arc<HandlerDeps>) -> ResponseResult<()> {
    let user_id = user_id_of(&msg);

    match cmd {
        Command::Start | Command::Help => {
            bot.send_message(msg.chat.id, USAGE_TEXT).await?;
        }
        Command::Status => {
            let resources = deps.resources.get_status();
            let user_active = deps.resources.get_user_active_downloads(user_id);
            let rate = deps.rate_limiter.get_user_status(user_id).await;

            let text = format!(
                "📊 Status\n\n\
                 Server: {}/{} active downloads ({} users)\n\
                 You: {}/{} active downloads\n\
                 Requests left: {:.0}/{}{}",
                resources.active_downloads,
                resources.max_downloads,
                resources.active_users,
                user_active,
                deps.config.max_downloads_per_user,
                rate.tokens.floor(),
                rate.capacity,
                if rate.wait.is_zero() {
                    String::new()
                } else {
                    format!("\nNext request in: {}s", wait_secs_for_display(rate.wait))
                }
            );
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Cancel => {
            let cancelled = deps.resources.cancel_user_downloads(user_id);
            let text = if cancelled > 0 {
                // Slot bookkeeping only; in-flight transfers still run out.
                format!(
                    "🗑 Freed {} download slot(s). Transfers already in flight will still finish.",
                    cancelled
                )
            } else {
                "You have no active downloads.".to_string()
            };
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::ResetLimits => {
            if deps.config.is_admin(user_id) {
                deps.rate_limiter.reset_global().await;
                deps.rate_limiter.reset_user(user_id).await;
                bot.send_message(msg.chat.id, "✅ Rate limits reset.").await?;
            } else {
                bot.send_message(msg.chat.id, "⛔ This command is admin-only.").await?;
            }
        }
    }

    Ok(())
}

/// Validates an incoming link and offers the quality menu.
///
/// The admission gates run when a quality button is pressed, not here,
/// so browsing the menu costs the user nothing.
pub async fn handle_message(bot: Bot, msg: Message, deps: Arc<HandlerDeps>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = user_id_of(&msg);
    log::info!("User {} sent message: {:.100}", user_id, text);

    let Some(raw_url) = extract_url(text) else {
        bot.send_message(msg.chat.id, USAGE_TEXT).await?;
        return Ok(());
    };

    let (url, platform) = match validate_url(raw_url) {
        Ok(validated) => validated,
        Err(e) => {
            log::info!("Invalid URL from user {}: {}", user_id, raw_url);
            bot.send_message(msg.chat.id, format!("❌ {}", e)).await?;
            return Ok(());
        }
    };
    let url = sanitize_url(&url);
    log::info!("Offering quality menu for {} URL: {}", platform.display_name(), url);

    let pending_id = deps.pending.insert(user_id, url);
    bot.send_message(
        msg.chat.id,
        format!("🎬 {} link detected. Choose a quality:", platform.display_name()),
    )
    .reply_markup(quality_keyboard(pending_id))
    .await?;

    Ok(())
}

/// Handles a quality-menu button press and starts the download.
pub async fn handle_quality_callback(bot: Bot, q: CallbackQuery, deps: Arc<HandlerDeps>) -> ResponseResult<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some((pending_id, quality)) = parse_quality_callback(data) else {
        return Ok(());
    };

    let _ = bot.answer_callback_query(q.id.clone()).await;

    let Some(MaybeInaccessibleMessage::Regular(menu_msg)) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = menu_msg.chat.id;
    let user_id = q.from.id.0 as i64;

    let Some(url) = deps.pending.take(pending_id, user_id) else {
        // Already consumed, replaced by a newer link, or someone else's menu.
        bot.send_message(chat_id, "This menu has expired. Send the link again.").await?;
        return Ok(());
    };

    if let Err(e) = bot.delete_message(chat_id, menu_msg.id).await {
        log::debug!("Failed to delete quality menu: {}", e);
    }
    log::info!("User {} picked quality '{}' for {}", user_id, quality.code(), url);

    let request = DownloadRequest {
        user_id,
        url,
        options: DownloadOptions {
            quality,
            timeout: deps.config.download_timeout,
            socket_timeout: deps.config.socket_timeout,
            max_retries: deps.config.max_retries,
            max_file_size: deps.config.max_file_size.min(crate::core::config::TELEGRAM_FILE_LIMIT),
        },
    };

    let notifier = Arc::new(TelegramNotifier::new(bot, chat_id));
    if let Err(e) = run_admitted_download(
        &deps.rate_limiter,
        &deps.resources,
        deps.downloader.as_ref(),
        notifier,
        &request,
    )
    .await
    {
        // Denials and failures were already reported to the user.
        log::info!("Request from user {} not completed: {}", user_id, e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    fn test_url(suffix: &str) -> Url {
        Url::parse(&format!("https://youtu.be/{}", suffix)).unwrap()
    }

    #[test]
    fn pending_entry_is_consumed_once() {
        let pending = PendingDownloads::new();
        let id = pending.insert(1, test_url("abc"));

        assert_eq!(pending.take(id, 1), Some(test_url("abc")));
        assert_eq!(pending.take(id, 1), None);
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_entry_ignores_other_users() {
        let pending = PendingDownloads::new();
        let id = pending.insert(1, test_url("abc"));

        // A press by another user leaves the entry for the requester.
        assert_eq!(pending.take(id, 2), None);
        assert_eq!(pending.take(id, 1), Some(test_url("abc")));
    }

    #[test]
    fn newer_link_replaces_older_pending_one() {
        let pending = PendingDownloads::new();
        let old_id = pending.insert(1, test_url("old"));
        let new_id = pending.insert(1, test_url("new"));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.take(old_id, 1), None);
        assert_eq!(pending.take(new_id, 1), Some(test_url("new")));
    }

    #[test]
    fn callback_data_parses_back() {
        assert_eq!(parse_quality_callback("dl:7:best"), Some((7, Quality::Best)));
        assert_eq!(parse_quality_callback("dl:42:audio"), Some((42, Quality::AudioOnly)));

        assert_eq!(parse_quality_callback("dl:7:720"), None);
        assert_eq!(parse_quality_callback("dl:x:best"), None);
        assert_eq!(parse_quality_callback("other:7:best"), None);
        assert_eq!(parse_quality_callback(""), None);
    }

    #[test]
    fn keyboard_buttons_cover_every_quality() {
        let keyboard = quality_keyboard(3);

        let mut qualities = Vec::new();
        for row in &keyboard.inline_keyboard {
            for button in row {
                let InlineKeyboardButtonKind::CallbackData(data) = &button.kind else {
                    panic!("expected callback button");
                };
                // Callback payloads must fit Telegram's 64-byte limit.
                assert!(data.len() <= 64);
                let (id, quality) = parse_quality_callback(data).expect("parsable callback data");
                assert_eq!(id, 3);
                qualities.push(quality);
            }
        }

        for expected in [Quality::Best, Quality::Medium480, Quality::Low360, Quality::AudioOnly] {
            assert!(qualities.contains(&expected), "{:?} missing from keyboard", expected);
        }
    }
}
