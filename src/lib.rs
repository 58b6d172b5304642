//! Vidra - Telegram bot for downloading videos with admission control
//!
//! This library provides the core functionality for the Vidra bot:
//! rate limiting, download slot management, the request admission flow,
//! the yt-dlp engine wrapper, and Telegram integration.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, rate limiter, resource manager, validation
//! - `download`: Admission flow, progress tracking, yt-dlp engine
//! - `telegram`: Bot handlers and user notifications

pub mod cli;
pub mod core;
pub mod download;
pub mod telegram;

// Re-export commonly used types for convenience
pub use crate::core::{BotConfig, BotError, BotResult, RateLimiter, ResourceManager};
pub use crate::download::{run_admitted_download, DownloadRequest, MediaDownloader, YtdlpDownloader};
pub use crate::telegram::{schema, HandlerDeps};
