//! Application entry point for outage-bot.
//!
//! Initializes all components, starts the Discord bot and the schedule watcher.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use dotenv::dotenv;
use log::debug;
use log::info;
use outage_bot::bot::Bot;
use outage_bot::bot::gateway::DiscordGateway;
use outage_bot::config::Config;
use outage_bot::config::ScraperBackend;
use outage_bot::logging::setup_logging;
use outage_bot::notifier::Notifier;
use outage_bot::notifier::browser_renderer::BrowserRenderer;
use outage_bot::repository::Repository;
use outage_bot::scrape::ScheduleSource;
use outage_bot::scrape::form_scraper::FormScraper;
use outage_bot::scrape::pool::BrowserPool;
use outage_bot::scrape::static_scraper::StaticScraper;
use outage_bot::service::Services;
use outage_bot::task::schedule_watcher::ScheduleWatcher;
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let init_start = Instant::now();
    let (config, _log_guard) = load_config()?;

    let db = setup_database(&config, init_start).await?;
    let services = Arc::new(Services::new(db.clone()));

    let pool = BrowserPool::new(config.scraper.clone());
    pool.start_reaper();
    let source = setup_source(&config, &pool)?;

    let mut bot = Bot::new(config.clone(), services);
    bot.start()?;
    info!(
        "Bot setup complete ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );

    let renderer = Arc::new(BrowserRenderer::new(pool.clone())?);
    let gateway = Arc::new(DiscordGateway::new(bot.http.clone()));
    let notifier = Arc::new(Notifier::new(gateway, renderer));

    let watcher = setup_watcher(&config, db.clone(), source, notifier)?;

    run(init_start).await?;

    if let Some(watcher) = watcher {
        watcher.stop()?;
    }
    pool.shutdown().await;
    db.close().await;
    info!("Shutdown complete.");
    Ok(())
}

fn load_config() -> Result<(Arc<Config>, WorkerGuard)> {
    debug!("Loading configuration...");
    let mut config = Config::new();
    config.load()?;
    let guard = setup_logging(&config)?;
    info!("Starting outage-bot...");
    Ok((Arc::new(config), guard))
}

async fn setup_database(config: &Config, init_start: Instant) -> Result<Arc<Repository>> {
    debug!("Setting up Repository...");
    let db = Repository::new(&config.db_url, &config.db_path)
        .await?
        .with_error_threshold(config.scheduler.error_threshold);

    info!("Running database migrations...");
    db.run_migrations().await?;
    info!(
        "Database setup complete ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );

    Ok(Arc::new(db))
}

fn setup_source(config: &Config, pool: &Arc<BrowserPool>) -> Result<Arc<dyn ScheduleSource>> {
    let source: Arc<dyn ScheduleSource> = match config.scraper.backend {
        ScraperBackend::Browser => Arc::new(FormScraper::new(pool.clone(), config.scraper.clone())),
        ScraperBackend::Static => Arc::new(StaticScraper::new(config.scraper.clone())?),
    };
    info!("Using schedule source {}.", source.name());
    Ok(source)
}

fn setup_watcher(
    config: &Config,
    db: Arc<Repository>,
    source: Arc<dyn ScheduleSource>,
    notifier: Arc<Notifier>,
) -> Result<Option<Arc<ScheduleWatcher>>> {
    if !config.features.schedule_watcher {
        info!("Schedule watcher is disabled.");
        return Ok(None);
    }
    let watcher = ScheduleWatcher::new(db, source, notifier, config.scheduler.clone());
    watcher.clone().start()?;
    Ok(Some(watcher))
}

async fn run(init_start: Instant) -> Result<()> {
    info!(
        "outage-bot is up in {:.2}s. Press Ctrl+C to stop.",
        init_start.elapsed().as_secs_f64()
    );

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down.");

    Ok(())
}
