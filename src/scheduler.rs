use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::POLL_SLO;
use crate::delta::DeltaEngine;
use crate::error::{AppError, Result};
use crate::registry::SportRegistry;
use crate::sports::SportModule;
use crate::types::{FetchOddsOptions, Quote};
use crate::vendor::OddsVendor;
use crate::writer::Writer;

/// Orchestrates per-sport polling. Each registered sport gets a featured-poll
/// worker and, when props are enabled, a discovery worker. Workers are
/// independent; within one sport, ticks are serialized by the worker loop and
/// missed ticks coalesce.
pub struct Scheduler {
    vendor: Arc<dyn OddsVendor>,
    delta: Arc<DeltaEngine>,
    writer: Arc<Writer>,
    registry: Arc<SportRegistry>,

    shutdown_tx: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        vendor: Arc<dyn OddsVendor>,
        delta: Arc<DeltaEngine>,
        writer: Arc<Writer>,
        registry: Arc<SportRegistry>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            vendor,
            delta,
            writer,
            registry,
            shutdown_tx,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn all workers. Fails if no sports are registered.
    pub fn start(&self) -> Result<()> {
        let sports = self.registry.all();
        if sports.is_empty() {
            return Err(AppError::Config("no sports registered".to_string()));
        }

        self.writer.start();

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for module in sports {
            handles.push(tokio::spawn(featured_worker(
                Arc::clone(&self.vendor),
                Arc::clone(&self.delta),
                Arc::clone(&self.writer),
                Arc::clone(&module),
                self.shutdown_tx.subscribe(),
            )));

            if module.props.enabled {
                handles.push(tokio::spawn(discovery_worker(
                    Arc::clone(&self.vendor),
                    Arc::clone(&module),
                    self.shutdown_tx.subscribe(),
                )));
            }

            info!(
                sport = module.sport_key,
                interval = ?module.featured.poll_interval,
                props = module.props.enabled,
                "started polling {}",
                module.display_name,
            );
        }

        Ok(())
    }

    /// Signal all workers, wait for them to finish their current tick, then
    /// stop the writer (which drains its buffer).
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        self.writer.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Featured-market poller: one immediate poll, then a fixed-cadence ticker.
/// A tick still running when the next would fire causes the next to be
/// skipped — ticks for one sport never overlap.
async fn featured_worker(
    vendor: Arc<dyn OddsVendor>,
    delta: Arc<DeltaEngine>,
    writer: Arc<Writer>,
    module: Arc<SportModule>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = fetch_and_process(&vendor, &delta, &writer, &module).await {
        error!(sport = module.sport_key, "initial featured poll failed: {e}");
    }

    let mut ticker = tokio::time::interval(module.featured.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // immediate tick already consumed by the poll above

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = fetch_and_process(&vendor, &delta, &writer, &module).await {
                    error!(sport = module.sport_key, "featured poll failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                info!(sport = module.sport_key, "featured poller stopping");
                return;
            }
        }
    }
}

/// Discovery sweep: list the sport's events and log how many fall inside the
/// props discovery window. The props poller consumes the discovered set.
async fn discovery_worker(
    vendor: Arc<dyn OddsVendor>,
    module: Arc<SportModule>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = discover_props(&vendor, &module).await {
        error!(sport = module.sport_key, "initial props discovery failed: {e}");
    }

    let mut ticker = tokio::time::interval(module.props.discovery_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = discover_props(&vendor, &module).await {
                    error!(sport = module.sport_key, "props discovery failed: {e}");
                }
            }
            _ = shutdown.changed() => {
                info!(sport = module.sport_key, "discovery worker stopping");
                return;
            }
        }
    }
}

async fn discover_props(vendor: &Arc<dyn OddsVendor>, module: &Arc<SportModule>) -> Result<()> {
    let events = vendor.fetch_events(module.sport_key).await?;

    let now = Utc::now();
    let window_end = now + chrono::Duration::hours(module.props.discovery_window_hours);
    let in_window = events
        .iter()
        .filter(|e| e.commence_time > now && e.commence_time < window_end)
        .count();

    info!(
        sport = module.sport_key,
        events = in_window,
        window_hours = module.props.discovery_window_hours,
        "props discovery sweep",
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// Poll pipeline
// ---------------------------------------------------------------------------

/// One poll tick: fetch → validate → detect → write → cache write-through.
/// Stream publishing happens inside the writer, strictly after the archive
/// commit; the cache update also waits for the commit so a failed write
/// leaves deltas re-detectable on the next tick.
async fn fetch_and_process(
    vendor: &Arc<dyn OddsVendor>,
    delta: &Arc<DeltaEngine>,
    writer: &Arc<Writer>,
    module: &Arc<SportModule>,
) -> Result<()> {
    let opts = FetchOddsOptions {
        sport_key: module.sport_key.to_string(),
        regions: module.regions_vec(),
        markets: module.featured_markets_vec(),
    };

    let fetch_started = Instant::now();
    let mut result = vendor.fetch_odds(&opts).await?;
    let fetch_elapsed = fetch_started.elapsed();

    if result.quotes.is_empty() {
        return Ok(());
    }

    for event in &mut result.events {
        event.home_team = (module.normalize_team)(&event.home_team);
        event.away_team = (module.normalize_team)(&event.away_team);
    }

    // Malformed quotes never enter the pipeline.
    result.quotes.retain(|quote| match module.validate_quote(quote) {
        Ok(()) => true,
        Err(e) => {
            warn!(sport = module.sport_key, "dropping invalid quote: {e}");
            false
        }
    });
    if result.quotes.is_empty() {
        return Ok(());
    }

    let processing_started = Instant::now();

    let changes = delta.detect_changes(&result.quotes).await?;
    let detect_elapsed = processing_started.elapsed();
    if changes.is_empty() {
        return Ok(());
    }

    for change in &changes {
        debug!(
            sport = module.sport_key,
            event = %change.quote.event_id,
            market = %change.quote.market_key,
            book = %change.quote.book_key,
            outcome = %change.quote.outcome_name,
            change = %change.change_type,
            old_price = ?change.old_price,
            new_price = change.quote.price,
            old_point = ?change.old_point,
            new_point = ?change.quote.point,
            "quote changed",
        );
    }

    let changed_quotes: Vec<Quote> = changes.into_iter().map(|c| c.quote).collect();
    let change_count = changed_quotes.len();

    writer
        .write_with_events(&result.events, changed_quotes.clone())
        .await?;
    let write_elapsed = processing_started.elapsed() - detect_elapsed;

    // Write-through after the commit; a miss here self-heals as a duplicate
    // detection on the next tick.
    if let Err(e) = delta.update_cache(&changed_quotes).await {
        warn!(sport = module.sport_key, "cache update failed: {e}");
    }

    let processing_elapsed = processing_started.elapsed();
    info!(
        sport = module.sport_key,
        events = result.events.len(),
        quotes = result.quotes.len(),
        changes = change_count,
        fetch_ms = fetch_elapsed.as_millis() as u64,
        detect_ms = detect_elapsed.as_millis() as u64,
        write_ms = write_elapsed.as_millis() as u64,
        total_ms = processing_elapsed.as_millis() as u64,
        "poll complete",
    );

    if processing_elapsed > POLL_SLO {
        warn!(
            sport = module.sport_key,
            total_ms = processing_elapsed.as_millis() as u64,
            "poll processing exceeded {}ms budget",
            POLL_SLO.as_millis(),
        );
    }

    Ok(())
}
