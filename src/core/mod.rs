//! Core utilities, configuration, and admission-control primitives

pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod resource_manager;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::BotConfig;
pub use error::{BotError, BotResult, ResourceExhausted};
pub use logging::init_logger;
pub use rate_limiter::{LimitDecision, RateLimiter, TokenBucket};
pub use resource_manager::{DownloadSlot, ResourceManager, ResourceStatus};
