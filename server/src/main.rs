use anyhow::Error;
use async_std::task::sleep;
use chef_model::{
    bot::Bot,
    chef::Chef,
    images::{self, CleanupReport, ImageService},
    llm, logging,
    store::{self, Connection, SESSION_RETENTION_DAYS},
    telegram,
};
use clap::Parser;
use futures::future::{select_all, FutureExt};
use std::time::Duration;

mod health;

#[cfg(test)]
mod test_runner;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MAINTENANCE_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Run the AI chef Telegram bot.
#[derive(Debug, Parser)]
struct Options {
    /// The port where the health check server should be served.
    #[clap(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Telegram user ID of the administrator. 0 disables admin commands.
    #[clap(long, env = "ADMIN_ID", default_value = "0")]
    admin_id: i64,

    #[clap(flatten)]
    logging: logging::Options,

    #[clap(flatten)]
    telegram: telegram::Options,

    #[clap(flatten)]
    llm: llm::Options,

    #[clap(flatten)]
    images: images::Options,

    #[clap(flatten)]
    store: store::Options,
}

/// Periodically remove expired and excess images from the cache.
async fn clean_image_cache(images: &ImageService, interval: Duration) -> Result<(), Error> {
    let mut delay = interval;
    loop {
        sleep(delay).await;
        let report = images.cleanup_cache(false).await;
        if let Some(report) = &report {
            tracing::info!(
                removed = report.removed_files,
                freed_kb = report.freed_kb,
                errors = report.errors,
                "image cache cleanup"
            );
        }
        delay = next_cache_cleanup(report.as_ref(), interval);
    }
}

/// How long to wait after a cache cleanup. A cleanup that hit errors is retried sooner.
fn next_cache_cleanup(report: Option<&CleanupReport>, interval: Duration) -> Duration {
    match report {
        Some(report) if report.errors > 0 => MAINTENANCE_RETRY_DELAY.min(interval),
        _ => interval,
    }
}

/// Periodically clear stale conversations.
async fn maintain(store: Connection) -> Result<(), Error> {
    loop {
        match store::cleanup_old_data(&*store, SESSION_RETENTION_DAYS).await {
            Ok(()) => sleep(MAINTENANCE_INTERVAL).await,
            Err(err) => {
                tracing::error!("session cleanup failed: {err:#}");
                sleep(MAINTENANCE_RETRY_DELAY).await;
            }
        }
    }
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    let opt = Options::parse();
    opt.logging.init()?;
    tracing::info!(port = opt.port, admin_id = opt.admin_id, "starting chef-bot");

    let store = opt.store.connect()?;
    let images = opt.images.connect().await?;
    let bot = Bot::new(
        opt.telegram.connect()?,
        Chef::new(opt.llm.connect()?),
        store.clone(),
        images,
        opt.admin_id,
    );

    let cache_interval = Duration::from_secs(
        opt.images.cache_cleanup_interval_hours.max(1) as u64 * 60 * 60,
    );
    // Everything runs on this task, and the process stops when any part of it does.
    let (result, _, _) = select_all([
        bot.run().boxed_local(),
        clean_image_cache(bot.images(), cache_interval).boxed_local(),
        health::serve(opt.port, store.clone()).boxed_local(),
        maintain(store).boxed_local(),
    ])
    .await;

    tracing::info!("chef-bot stopped");
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_next_cache_cleanup() {
        let interval = Duration::from_secs(24 * 60 * 60);
        assert_eq!(next_cache_cleanup(None, interval), interval);

        let mut report = CleanupReport {
            removed_files: 3,
            freed_kb: 120.0,
            errors: 0,
        };
        assert_eq!(next_cache_cleanup(Some(&report), interval), interval);

        report.errors = 1;
        assert_eq!(
            next_cache_cleanup(Some(&report), interval),
            MAINTENANCE_RETRY_DELAY
        );
        assert_eq!(
            next_cache_cleanup(Some(&report), Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }
}
