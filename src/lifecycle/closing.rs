use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;

const CAPTURE_STREAM: &str = "closing_lines.captured";

/// Snapshots an event's current quotes as closing lines when it goes live.
/// Selection is limited to events whose commence time is within five minutes
/// of now either way, so the snapshot lands at (or just after) tipoff rather
/// than deep into the game after a process restart.
pub struct ClosingLineCapturer {
    pool: PgPool,
    redis: ConnectionManager,
    interval: Duration,
}

impl ClosingLineCapturer {
    pub fn new(pool: PgPool, redis: ConnectionManager, interval: Duration) -> Self {
        Self { pool, redis, interval }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("closing line capturer started");

        if let Err(e) = self.run_once().await {
            error!("initial closing line capture failed: {e}");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("closing line capture failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    info!("closing line capturer stopping");
                    return;
                }
            }
        }
    }

    /// One capture pass over events that just went live.
    pub async fn run_once(&self) -> Result<()> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT e.event_id
            FROM events e
            WHERE e.status = 'live'
              AND e.event_id NOT IN (SELECT DISTINCT event_id FROM closing_lines)
              AND e.commence_time BETWEEN NOW() - INTERVAL '5 minutes'
                                      AND NOW() + INTERVAL '5 minutes'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (event_id,) in rows {
            match self.capture_event(&event_id).await {
                Ok(count) => {
                    info!(event_id = %event_id, lines = count, "captured closing lines");
                }
                Err(e) => {
                    error!(event_id = %event_id, "closing line capture failed: {e}");
                }
            }
        }

        Ok(())
    }

    /// Copy the event's current quotes into `closing_lines`. Absent points
    /// store as 0 so they fit the composite key; re-runs conflict and are
    /// ignored, making capture write-once per identity.
    async fn capture_event(&self, event_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO closing_lines (
                event_id, sport_key, market_key, book_key, outcome_name,
                closing_price, point, closed_at
            )
            SELECT event_id, sport_key, market_key, book_key, outcome_name,
                   price, COALESCE(point, 0), NOW()
            FROM odds_raw
            WHERE event_id = $1 AND is_latest = TRUE
            ON CONFLICT (event_id, market_key, book_key, outcome_name, point) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // The archive row is the record; the stream append is advisory.
        if let Err(e) = self.publish_capture(event_id).await {
            warn!(event_id = %event_id, "capture stream publish failed: {e}");
        }

        Ok(result.rows_affected())
    }

    async fn publish_capture(&self, event_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("XADD")
            .arg(CAPTURE_STREAM)
            .arg("*")
            .arg("event_id")
            .arg(event_id)
            .arg("captured_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
