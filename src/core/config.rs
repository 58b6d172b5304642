//! Bot configuration loaded from environment variables.
//!
//! All numeric limits are validated once at startup; invalid values in
//! the environment fall back to their defaults with a warning, but
//! limits that end up non-positive fail fast with a config error.

use std::env;
use std::time::Duration;

use crate::core::error::BotError;

/// Telegram bots cannot send files above 50MB.
pub const TELEGRAM_FILE_LIMIT: u64 = 50 * 1024 * 1024;

/// Bot configuration from environment variables.
///
/// Built once in `main` and passed to handlers by reference; there is no
/// hidden global instance, which keeps tests free to construct their own.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Telegram bot token (BOT_TOKEN, required)
    pub token: String,
    /// Maximum downloadable file size in bytes (MAX_FILE_SIZE, default 200MB)
    pub max_file_size: u64,
    /// Overall timeout for one download (DOWNLOAD_TIMEOUT seconds, default 300)
    pub download_timeout: Duration,
    /// yt-dlp socket timeout in seconds (SOCKET_TIMEOUT, default 30)
    pub socket_timeout: u64,
    /// yt-dlp retry count (MAX_RETRIES, default 3)
    pub max_retries: u32,
    /// Per-user bucket capacity (RATE_LIMIT_REQUESTS, default 5)
    pub rate_limit_requests: u32,
    /// Seconds for one per-user token to accrue (RATE_LIMIT_PERIOD, default 10)
    pub rate_limit_period: u64,
    /// Global bucket capacity (GLOBAL_RATE_LIMIT, default 100)
    pub global_rate_limit: u32,
    /// Global tokens per second (GLOBAL_REFILL_RATE, default 1.0)
    pub global_refill_rate: f64,
    /// Server-wide concurrent download cap (MAX_CONCURRENT_DOWNLOADS, default 10)
    pub max_concurrent_downloads: usize,
    /// Per-user concurrent download cap (MAX_DOWNLOADS_PER_USER, default 2)
    pub max_downloads_per_user: usize,
    /// Idle age after which per-user buckets are swept (BUCKET_MAX_AGE seconds, default 3600)
    pub bucket_max_age: Duration,
    /// Comma-separated admin user ids (ADMIN_IDS)
    pub admin_ids: Vec<i64>,
    /// Log level name (LOG_LEVEL, default "info")
    pub log_level: String,
    /// Log file path (LOG_FILE_PATH, default "vidra.log")
    pub log_file: String,
    /// yt-dlp binary (YTDL_BIN, default "yt-dlp")
    pub ytdl_bin: String,
}

impl BotConfig {
    /// Loads configuration from the environment.
    ///
    /// # Errors
    /// Returns `BotError::Config` when BOT_TOKEN is missing or a limit
    /// validates to a non-positive value.
    pub fn from_env() -> Result<Self, BotError> {
        let token = env::var("BOT_TOKEN")
            .map_err(|_| BotError::Config("BOT_TOKEN is required. Set it as an environment variable.".to_string()))?;

        let config = Self {
            token,
            max_file_size: env_u64("MAX_FILE_SIZE", 200 * 1024 * 1024),
            download_timeout: Duration::from_secs(env_u64("DOWNLOAD_TIMEOUT", 300)),
            socket_timeout: env_u64("SOCKET_TIMEOUT", 30),
            max_retries: env_u64("MAX_RETRIES", 3) as u32,
            rate_limit_requests: env_u64("RATE_LIMIT_REQUESTS", 5) as u32,
            rate_limit_period: env_u64("RATE_LIMIT_PERIOD", 10),
            global_rate_limit: env_u64("GLOBAL_RATE_LIMIT", 100) as u32,
            global_refill_rate: env_f64("GLOBAL_REFILL_RATE", 1.0),
            max_concurrent_downloads: env_u64("MAX_CONCURRENT_DOWNLOADS", 10) as usize,
            max_downloads_per_user: env_u64("MAX_DOWNLOADS_PER_USER", 2) as usize,
            bucket_max_age: Duration::from_secs(env_u64("BUCKET_MAX_AGE", 3600)),
            admin_ids: env_i64_list("ADMIN_IDS"),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_file: env::var("LOG_FILE_PATH").unwrap_or_else(|_| "vidra.log".to_string()),
            ytdl_bin: env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()),
        };

        config.validate()?;
        log::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Checks that every limit is positive. Called from `from_env`;
    /// exposed so tests can validate hand-built configs.
    pub fn validate(&self) -> Result<(), BotError> {
        if self.max_file_size == 0 {
            return Err(BotError::Config("MAX_FILE_SIZE must be positive".to_string()));
        }
        if self.download_timeout.is_zero() {
            return Err(BotError::Config("DOWNLOAD_TIMEOUT must be positive".to_string()));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_period == 0 {
            return Err(BotError::Config("rate limit settings must be positive".to_string()));
        }
        if self.global_rate_limit == 0 || self.global_refill_rate <= 0.0 {
            return Err(BotError::Config("global rate limit settings must be positive".to_string()));
        }
        if self.max_concurrent_downloads == 0 || self.max_downloads_per_user == 0 {
            return Err(BotError::Config("download caps must be positive".to_string()));
        }
        Ok(())
    }

    /// Per-user refill rate derived from requests/period.
    pub fn user_refill_rate(&self) -> f64 {
        1.0 / self.rate_limit_period as f64
    }

    /// Whether `user_id` is listed as an administrator.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Parses an integer env var, falling back to `default` on absence or
/// garbage (with a warning, matching the original behavior).
fn env_u64(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Err(_) => default,
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            log::warn!("Invalid {}='{}', using default {}: {}", key, raw, default, e);
            default
        }),
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match env::var(key) {
        Err(_) => default,
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            log::warn!("Invalid {}='{}', using default {}: {}", key, raw, default, e);
            default
        }),
    }
}

/// Parses a comma-separated list of ids, skipping malformed entries.
fn env_i64_list(key: &str) -> Vec<i64> {
    let raw = env::var(key).unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                log::warn!("Invalid integer in {}: '{}': {}", key, s, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BotConfig {
        BotConfig {
            token: "test-token".to_string(),
            max_file_size: 200 * 1024 * 1024,
            download_timeout: Duration::from_secs(300),
            socket_timeout: 30,
            max_retries: 3,
            rate_limit_requests: 5,
            rate_limit_period: 10,
            global_rate_limit: 100,
            global_refill_rate: 1.0,
            max_concurrent_downloads: 10,
            max_downloads_per_user: 2,
            bucket_max_age: Duration::from_secs(3600),
            admin_ids: vec![42],
            log_level: "info".to_string(),
            log_file: "vidra.log".to_string(),
            ytdl_bin: "yt-dlp".to_string(),
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut config = test_config();
        config.max_concurrent_downloads = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.rate_limit_requests = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.global_refill_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn user_refill_rate_follows_period() {
        let config = test_config();
        assert!((config.user_refill_rate() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn admin_check() {
        let config = test_config();
        assert!(config.is_admin(42));
        assert!(!config.is_admin(7));
    }
}
