use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use oddstream::config::{Config, LIFECYCLE_INTERVAL, SHUTDOWN_TIMEOUT};
use oddstream::delta::DeltaEngine;
use oddstream::error::Result;
use oddstream::lifecycle::{ClosingLineCapturer, StatusUpdater};
use oddstream::pages::PageManagerClient;
use oddstream::registry::SportRegistry;
use oddstream::scheduler::Scheduler;
use oddstream::sports::{basketball_nba, football_nfl};
use oddstream::vendor::{OddsVendor, TheOddsApi};
use oddstream::writer::{self, Writer};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Archive ---
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.archive_dsn)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("connected to archive");

    // --- Cache / streams ---
    let redis_client = redis::Client::open(cfg.cache_connection_url())?;
    let mut redis_conn = ConnectionManager::new(redis_client).await?;
    redis::cmd("PING").query_async::<()>(&mut redis_conn).await?;
    info!("connected to cache");

    // --- Collaborators ---
    let pages = Arc::new(PageManagerClient::new(
        cfg.page_manager_url.clone(),
        cfg.page_manager_books.clone(),
    )?);
    if pages.is_enabled() {
        info!(books = ?cfg.page_manager_books, "page manager enabled");
    } else {
        info!("page manager disabled (PAGE_MANAGER_URL not set)");
    }

    let vendor: Arc<dyn OddsVendor> = Arc::new(TheOddsApi::new(cfg.odds_api_key.clone())?);

    // --- Sport registry ---
    let registry = Arc::new(SportRegistry::new());
    registry.register(basketball_nba::module())?;
    registry.register(football_nfl::module())?;
    info!(sports = registry.len(), "registered sports");

    for module in registry.all() {
        info!(
            sport = module.sport_key,
            regions = ?module.regions,
            markets = ?module.featured_markets,
            interval = ?module.featured.poll_interval,
            props_discovery = ?module.props.enabled.then_some(module.props.discovery_interval),
            "{}",
            module.display_name,
        );
    }

    // --- Pipeline ---
    let delta = Arc::new(DeltaEngine::new(redis_conn.clone(), cfg.cache_ttl));
    let writer = Arc::new(Writer::new(pool.clone(), redis_conn.clone(), Arc::clone(&pages)));

    writer.load_seen_events().await?;
    if let Err(e) = writer.warm_upcoming_events().await {
        warn!("startup page warm-up failed: {e}");
    }

    // Re-seed the cache from archive-current quotes so the first polls after
    // a restart don't classify everything as new.
    match writer::load_current_quotes(&pool).await {
        Ok(current) => {
            let count = current.len();
            if let Err(e) = delta.rebuild_cache(&current).await {
                warn!("cache rebuild failed (deltas self-heal): {e}");
            } else {
                info!(count, "rebuilt cache from archive-current quotes");
            }
        }
        Err(e) => warn!("loading current quotes for cache rebuild failed: {e}"),
    }

    let scheduler = Scheduler::new(
        Arc::clone(&vendor),
        Arc::clone(&delta),
        Arc::clone(&writer),
        Arc::clone(&registry),
    );
    scheduler.start()?;
    info!(cache_ttl = ?cfg.cache_ttl, "polling started");

    // --- Lifecycle tracker ---
    let (lifecycle_tx, lifecycle_rx) = watch::channel(false);

    let status_updater = StatusUpdater::new(pool.clone(), Arc::clone(&pages), LIFECYCLE_INTERVAL);
    let status_handle = tokio::spawn(status_updater.run(lifecycle_rx.clone()));

    let capturer = ClosingLineCapturer::new(pool.clone(), redis_conn.clone(), LIFECYCLE_INTERVAL);
    let capture_handle = tokio::spawn(capturer.run(lifecycle_rx));

    // --- Wait for shutdown signal ---
    wait_for_signal().await?;
    info!("shutting down");

    let _ = lifecycle_tx.send(true);
    let shutdown = async {
        scheduler.stop().await;
        let _ = status_handle.await;
        let _ = capture_handle.await;
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        warn!("shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
    } else {
        info!("stopped cleanly");
    }

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
