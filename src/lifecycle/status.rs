use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::pages::PageManagerClient;

/// Promotes event status on wall-clock boundaries:
/// upcoming → live once commence time passes (within a 5-minute window so
/// stale rows don't flap), live → completed three hours after commence.
/// Completed events trigger best-effort page closes.
pub struct StatusUpdater {
    pool: PgPool,
    pages: Arc<PageManagerClient>,
    interval: Duration,
}

#[derive(Debug, sqlx::FromRow)]
struct CompletedEvent {
    event_id: String,
    sport_key: String,
    home_team: String,
    away_team: String,
    commence_time: DateTime<Utc>,
}

impl StatusUpdater {
    pub fn new(pool: PgPool, pages: Arc<PageManagerClient>, interval: Duration) -> Self {
        Self { pool, pages, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("status updater started");

        if let Err(e) = self.run_once().await {
            error!("initial status update failed: {e}");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("status update failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    info!("status updater stopping");
                    return;
                }
            }
        }
    }

    /// One promotion pass. Status-guarded updates make this idempotent.
    pub async fn run_once(&self) -> Result<()> {
        let live = sqlx::query(
            r#"
            UPDATE events
            SET status = 'live'
            WHERE status = 'upcoming'
              AND commence_time <= NOW()
              AND commence_time > NOW() - INTERVAL '5 minutes'
            "#,
        )
        .execute(&self.pool)
        .await?;

        if live.rows_affected() > 0 {
            info!(count = live.rows_affected(), "events promoted to live");
        }

        // Snapshot before the UPDATE — afterwards the rows no longer match
        // the predicate and the page-close details would be gone.
        let to_complete = self.fetch_events_to_complete().await.unwrap_or_else(|e| {
            warn!("snapshot of completing events failed: {e}");
            Vec::new()
        });

        let completed = sqlx::query(
            r#"
            UPDATE events
            SET status = 'completed'
            WHERE status = 'live'
              AND commence_time < NOW() - INTERVAL '3 hours'
            "#,
        )
        .execute(&self.pool)
        .await?;

        if completed.rows_affected() > 0 {
            info!(count = completed.rows_affected(), "events promoted to completed");
            self.close_game_pages(to_complete);
        }

        Ok(())
    }

    async fn fetch_events_to_complete(&self) -> Result<Vec<CompletedEvent>> {
        let events = sqlx::query_as::<_, CompletedEvent>(
            r#"
            SELECT event_id, sport_key, home_team, away_team, commence_time
            FROM events
            WHERE status = 'live'
              AND commence_time < NOW() - INTERVAL '3 hours'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    /// Post-commit page closes, detached and best-effort.
    fn close_game_pages(&self, events: Vec<CompletedEvent>) {
        if !self.pages.is_enabled() || events.is_empty() {
            return;
        }

        let pages = Arc::clone(&self.pages);
        tokio::spawn(async move {
            for event in events {
                if let Err(e) = pages
                    .close_game_page_for_event(
                        &event.home_team,
                        &event.away_team,
                        &event.sport_key,
                        event.commence_time,
                    )
                    .await
                {
                    warn!(event_id = %event.event_id, "page close failed: {e}");
                } else {
                    info!(
                        away = %event.away_team,
                        home = %event.home_team,
                        "closed game pages"
                    );
                }
            }
        });
    }
}
