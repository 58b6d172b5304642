//! Telegram bot integration and handlers

pub mod handlers;
pub mod notifier;

// Re-exports for convenience
pub use handlers::{
    handle_command, handle_message, handle_quality_callback, schema, Command, HandlerDeps, PendingDownloads,
};
pub use notifier::{Notifier, TelegramNotifier};
