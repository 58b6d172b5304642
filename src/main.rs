use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use teloxide::prelude::*;

use vidra::cli::{Cli, Commands};
use vidra::core::{config::BotConfig, init_logger, RateLimiter, ResourceManager};
use vidra::download::YtdlpDownloader;
use vidra::telegram::{schema, HandlerDeps, PendingDownloads};

/// Interval between idle-bucket sweeps.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present
    let _ = dotenv();

    let config = BotConfig::from_env()?;
    init_logger(&config.log_file, &config.log_level)?;

    match cli.command {
        Some(Commands::CheckConfig) => {
            log::info!("Configuration OK");
            println!("Configuration OK");
            Ok(())
        }
        Some(Commands::Run) | None => run_bot(config).await,
    }
}

async fn run_bot(config: BotConfig) -> Result<()> {
    log::info!("Starting vidra");
    log::info!(
        "Rate limit: {} requests per {}s per user, global {}/{}s",
        config.rate_limit_requests,
        config.rate_limit_period,
        config.global_rate_limit,
        config.global_refill_rate
    );
    log::info!(
        "Concurrency: {} downloads global, {} per user",
        config.max_concurrent_downloads,
        config.max_downloads_per_user
    );

    let rate_limiter = RateLimiter::new(
        config.rate_limit_requests,
        config.user_refill_rate(),
        config.global_rate_limit,
        config.global_refill_rate,
    )?;
    let resources = ResourceManager::new(config.max_concurrent_downloads, config.max_downloads_per_user)?;
    let downloader = Arc::new(YtdlpDownloader::new(config.ytdl_bin.clone()));

    // Periodic sweep of idle per-user buckets; the limiter itself never
    // schedules this.
    let sweep_limiter = rate_limiter.clone();
    let bucket_max_age = config.bucket_max_age;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            sweep_limiter.cleanup_old_buckets(bucket_max_age).await;
        }
    });

    let bot = Bot::new(config.token.clone());
    let deps = Arc::new(HandlerDeps {
        config,
        rate_limiter,
        resources,
        downloader,
        pending: PendingDownloads::new(),
    });

    log::info!("Bot is running...");
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
