use std::time::Duration;
use thiserror::Error;

/// Centralized error types for the application
///
/// All errors in the application are converted to this enum for consistent error handling.
/// Uses `thiserror` for automatic error conversion and display formatting.
#[derive(Error, Debug)]
pub enum BotError {
    /// Request was denied by the rate limiter; carries the wait-time estimate
    #[error("Rate limit exceeded, retry in {:.1}s", wait.as_secs_f64())]
    RateLimited { wait: Duration },

    /// A download slot could not be acquired (global or per-user cap reached)
    #[error(transparent)]
    ResourceExhausted(#[from] ResourceExhausted),

    /// Download/yt-dlp errors
    #[error("Download error: {0}")]
    Download(String),

    /// Downloaded file exceeds the configured or platform limit
    #[error("File size {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration detected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// Typed cause for a denied download slot.
///
/// The two variants produce distinct user-facing messages: a globally busy
/// server asks the user to come back later, while the per-user cap tells
/// them to wait for their own downloads to finish.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceExhausted {
    /// Server-wide concurrent download cap reached
    #[error("Server is busy ({active} active downloads)")]
    Global { active: usize },

    /// This user already holds the maximum allowed concurrent slots
    #[error("You already have {active} active downloads")]
    User { active: usize },
}

/// Type alias for Result with BotError
pub type BotResult<T> = Result<T, BotError>;
