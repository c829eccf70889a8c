use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use redis::aio::ConnectionManager;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{FLUSH_INTERVAL, WARM_RATE_LIMIT, WARM_WINDOW_HOURS, WRITE_BATCH_SIZE};
use crate::error::Result;
use crate::pages::PageManagerClient;
use crate::types::{Event, EventStatus, Quote};

/// Stream key per sport: `odds.raw.basketball_nba`.
const STREAM_KEY_PREFIX: &str = "odds.raw";

/// European-exclusive operators. The archive is seeded with US-region books
/// plus pinnacle; quotes from other EU books would break foreign keys.
const EU_ONLY_BOOKS: &[&str] = &[
    "pinnacle",
    "betfair_ex_eu",
    "matchbook",
    "marathonbet",
    "betsson",
    "coolbet",
    "nordicbet",
    "unibet_se",
    "unibet_fr",
    "unibet_it",
    "unibet_nl",
    "leovegas_se",
    "tipico_de",
    "winamax_fr",
    "winamax_de",
    "betclic_fr",
    "parionssport_fr",
    "suprabets",
    "onexbet",
];

/// The one European book worth keeping: the sharp reference price.
const ALLOWED_EU_BOOKS: &[&str] = &["pinnacle"];

/// Transactional archive writer. Owns the demote-then-insert sequence (single
/// writer across the deployment), the seen-events set that gates page
/// warming, and post-commit stream publishing.
pub struct Writer {
    pool: PgPool,
    redis: ConnectionManager,
    pages: Arc<PageManagerClient>,

    buffer: Mutex<Vec<Quote>>,
    seen_events: DashSet<String>,

    stop_tx: watch::Sender<bool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

/// One message per changed quote on `odds.raw.{sport_key}`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub book_key: String,
    pub outcome_name: String,
    pub price: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    pub vendor_last_update: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// `upcoming` or `live`; defaults to `upcoming` when the event is unknown.
    pub event_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
}

impl Writer {
    pub fn new(pool: PgPool, redis: ConnectionManager, pages: Arc<PageManagerClient>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            pool,
            redis,
            pages,
            buffer: Mutex::new(Vec::with_capacity(WRITE_BATCH_SIZE)),
            seen_events: DashSet::new(),
            stop_tx,
            flush_handle: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Background flush loop
    // -----------------------------------------------------------------------

    /// Start the periodic flush loop for the buffered write path.
    pub fn start(self: &Arc<Self>) {
        let writer = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // consume immediate first tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = writer.flush().await {
                            error!("periodic flush failed: {e}");
                        }
                    }
                    _ = stop_rx.changed() => {
                        // Final drain before exiting.
                        if let Err(e) = writer.flush().await {
                            error!("final flush failed: {e}");
                        }
                        return;
                    }
                }
            }
        });

        *self.flush_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the flush loop and wait for its final drain.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self
            .flush_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // -----------------------------------------------------------------------
    // Write paths
    // -----------------------------------------------------------------------

    /// Primary path: upsert events and books, demote-then-insert the quotes
    /// in one transaction, then publish to streams and warm pages for
    /// newly-seen events. Publishing and warming are best-effort.
    pub async fn write_with_events(&self, events: &[Event], quotes: Vec<Quote>) -> Result<()> {
        let quotes: Vec<Quote> = quotes
            .into_iter()
            .filter(|q| book_accepted(&q.book_key))
            .collect();

        if events.is_empty() && quotes.is_empty() {
            return Ok(());
        }

        // DashSet::insert returns true only for ids not already present, so
        // this both detects and claims the new events atomically.
        let new_events: Vec<Event> = events
            .iter()
            .filter(|e| self.seen_events.insert(e.event_id.clone()))
            .cloned()
            .collect();

        let result = self.write_transaction(events, &quotes).await;
        if let Err(err) = result {
            // The events never committed; let the next sighting re-claim them.
            for event in &new_events {
                self.seen_events.remove(&event.event_id);
            }
            return Err(err);
        }

        if !quotes.is_empty() {
            if let Err(e) = self.publish_stream(&quotes, events).await {
                warn!("stream publish failed (archive is authoritative): {e}");
            }
        }

        if !new_events.is_empty() {
            self.warm_game_pages(new_events);
        }

        Ok(())
    }

    /// Buffered path: accumulate quotes and flush at the batch threshold.
    /// Performs no event or book upserts — callers needing those use
    /// `write_with_events`.
    pub async fn write(&self, quotes: Vec<Quote>) -> Result<()> {
        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.extend(quotes);
            buffer.len() >= WRITE_BATCH_SIZE
        };

        if should_flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Drain the buffer: demote-then-insert in one transaction, then publish.
    pub async fn flush(&self) -> Result<()> {
        let quotes = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::replace(&mut *buffer, Vec::with_capacity(WRITE_BATCH_SIZE))
        };

        let mut tx = self.pool.begin().await?;
        demote_previous(&mut tx, &quotes).await?;
        insert_quotes(&mut tx, &quotes).await?;
        tx.commit().await?;

        if let Err(e) = self.publish_stream(&quotes, &[]).await {
            warn!("stream publish failed (archive is authoritative): {e}");
        }

        debug!(quotes = quotes.len(), "flushed buffered quotes");
        Ok(())
    }

    async fn write_transaction(&self, events: &[Event], quotes: &[Quote]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if !events.is_empty() {
            upsert_events(&mut tx, events).await?;
        }
        if !quotes.is_empty() {
            upsert_books(&mut tx, quotes).await?;
            demote_previous(&mut tx, quotes).await?;
            insert_quotes(&mut tx, quotes).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stream publishing
    // -----------------------------------------------------------------------

    /// One XADD per quote onto `odds.raw.{sport_key}`, pipelined per sport,
    /// in change-list order. Runs only after the archive commit.
    async fn publish_stream(&self, quotes: &[Quote], events: &[Event]) -> Result<()> {
        if quotes.is_empty() {
            return Ok(());
        }

        let status_by_event: HashMap<&str, EventStatus> = events
            .iter()
            .map(|e| (e.event_id.as_str(), e.status))
            .collect();

        let mut by_sport: HashMap<&str, Vec<&Quote>> = HashMap::new();
        for quote in quotes {
            by_sport.entry(quote.sport_key.as_str()).or_default().push(quote);
        }

        let mut conn = self.redis.clone();
        for (sport_key, sport_quotes) in by_sport {
            let stream_key = format!("{STREAM_KEY_PREFIX}.{sport_key}");

            let mut pipe = redis::pipe();
            for quote in sport_quotes {
                let message = stream_message(quote, &status_by_event);
                let payload = serde_json::to_string(&message)?;
                pipe.cmd("XADD")
                    .arg(&stream_key)
                    .arg("*")
                    .arg("data")
                    .arg(payload)
                    .ignore();
            }
            pipe.query_async::<()>(&mut conn).await?;
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Seen events and page warming
    // -----------------------------------------------------------------------

    /// Seed the seen-events set from the archive so restarts don't re-warm
    /// pages for events already being tracked.
    pub async fn load_seen_events(&self) -> Result<usize> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT event_id FROM events WHERE status IN ('upcoming', 'live')",
        )
        .fetch_all(&self.pool)
        .await?;

        let count = rows.len();
        for (event_id,) in rows {
            self.seen_events.insert(event_id);
        }

        info!(count, "seeded seen-events set from archive");
        Ok(count)
    }

    /// Startup hook: warm every upcoming event inside the warm window,
    /// regardless of the seen set (the page manager deduplicates). Events
    /// are marked seen first so polling doesn't warm them again.
    pub async fn warm_upcoming_events(&self) -> Result<()> {
        if !self.pages.is_enabled() {
            debug!("page manager disabled, skipping startup warm-up");
            return Ok(());
        }

        let rows: Vec<(String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT event_id, sport_key, home_team, away_team, commence_time
            FROM events
            WHERE status = 'upcoming'
              AND commence_time > NOW()
              AND commence_time < NOW() + make_interval(hours => $1)
            ORDER BY commence_time ASC
            "#,
        )
        .bind(WARM_WINDOW_HOURS as i32)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            info!("no upcoming events inside the warm window");
            return Ok(());
        }

        info!(count = rows.len(), "startup warm-up: queuing page warms");

        let pages = Arc::clone(&self.pages);
        let events: Vec<(String, String, String, DateTime<Utc>)> = rows
            .into_iter()
            .map(|(event_id, sport_key, home, away, commence)| {
                self.seen_events.insert(event_id);
                (sport_key, home, away, commence)
            })
            .collect();

        tokio::spawn(async move {
            for (i, (sport_key, home, away, commence)) in events.iter().enumerate() {
                if let Err(e) = pages.open_game_page(home, away, sport_key, *commence).await {
                    warn!(away = %away, home = %home, "startup page warm failed: {e}");
                }
                if i + 1 < events.len() {
                    tokio::time::sleep(WARM_RATE_LIMIT).await;
                }
            }
        });

        Ok(())
    }

    /// Warm pages for freshly-seen events, rate-limited, on a detached task.
    fn warm_game_pages(&self, new_events: Vec<Event>) {
        if !self.pages.is_enabled() {
            return;
        }

        let (to_warm, skipped_future) = warm_candidates(new_events, Utc::now());
        if to_warm.is_empty() {
            if skipped_future > 0 {
                debug!(skipped = skipped_future, "all new events beyond the warm window");
            }
            return;
        }

        info!(
            warming = to_warm.len(),
            skipped_beyond_window = skipped_future,
            "warming pages for new events"
        );

        let pages = Arc::clone(&self.pages);
        tokio::spawn(async move {
            for (i, event) in to_warm.iter().enumerate() {
                if let Err(e) = pages
                    .open_game_page(
                        &event.home_team,
                        &event.away_team,
                        &event.sport_key,
                        event.commence_time,
                    )
                    .await
                {
                    warn!(
                        away = %event.away_team,
                        home = %event.home_team,
                        "page warm failed: {e}"
                    );
                }
                if i + 1 < to_warm.len() {
                    tokio::time::sleep(WARM_RATE_LIMIT).await;
                }
            }
        });
    }

}

/// All current quotes for events still upcoming or live, for rebuilding the
/// cache after a restart or cache loss.
pub async fn load_current_quotes(pool: &PgPool) -> Result<Vec<Quote>> {
    type Row = (
        String,
        String,
        String,
        String,
        String,
        i32,
        Option<f64>,
        DateTime<Utc>,
        DateTime<Utc>,
    );

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT o.event_id, o.sport_key, o.market_key, o.book_key, o.outcome_name,
               o.price, o.point, o.vendor_last_update, o.received_at
        FROM odds_raw o
        JOIN events e ON e.event_id = o.event_id
        WHERE o.is_latest = TRUE
          AND e.status IN ('upcoming', 'live')
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(
                event_id,
                sport_key,
                market_key,
                book_key,
                outcome_name,
                price,
                point,
                vendor_last_update,
                received_at,
            )| Quote {
                event_id,
                sport_key,
                market_key,
                book_key,
                outcome_name,
                price,
                point,
                vendor_last_update,
                received_at,
            },
        )
        .collect())
}

// ---------------------------------------------------------------------------
// Transaction statements — batch SQL over array binds
// ---------------------------------------------------------------------------

async fn upsert_events(tx: &mut Transaction<'_, Postgres>, events: &[Event]) -> Result<()> {
    let mut event_ids = Vec::with_capacity(events.len());
    let mut sport_keys = Vec::with_capacity(events.len());
    let mut home_teams = Vec::with_capacity(events.len());
    let mut away_teams = Vec::with_capacity(events.len());
    let mut commence_times = Vec::with_capacity(events.len());
    let mut statuses = Vec::with_capacity(events.len());

    for event in events {
        event_ids.push(event.event_id.clone());
        sport_keys.push(event.sport_key.clone());
        home_teams.push(event.home_team.clone());
        away_teams.push(event.away_team.clone());
        commence_times.push(event.commence_time);
        statuses.push(event.status.as_str().to_string());
    }

    sqlx::query(
        r#"
        INSERT INTO events (event_id, sport_key, home_team, away_team, commence_time, status)
        SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::timestamptz[], $6::text[])
        ON CONFLICT (event_id) DO UPDATE SET
            home_team = EXCLUDED.home_team,
            away_team = EXCLUDED.away_team,
            commence_time = EXCLUDED.commence_time,
            status = EXCLUDED.status,
            last_seen_at = NOW()
        "#,
    )
    .bind(&event_ids)
    .bind(&sport_keys)
    .bind(&home_teams)
    .bind(&away_teams)
    .bind(&commence_times)
    .bind(&statuses)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Insert any books the seed data doesn't know with minimal metadata; the
/// archive's own rows are authoritative, so conflicts are ignored.
async fn upsert_books(tx: &mut Transaction<'_, Postgres>, quotes: &[Quote]) -> Result<()> {
    let mut by_book: HashMap<&str, &str> = HashMap::new();
    for quote in quotes {
        by_book.insert(quote.book_key.as_str(), quote.sport_key.as_str());
    }

    let mut book_keys = Vec::with_capacity(by_book.len());
    let mut display_names = Vec::with_capacity(by_book.len());
    let mut sport_keys = Vec::with_capacity(by_book.len());
    for (book_key, sport_key) in by_book {
        book_keys.push(book_key.to_string());
        display_names.push(capitalize_first(book_key));
        sport_keys.push(sport_key.to_string());
    }

    sqlx::query(
        r#"
        INSERT INTO books (book_key, display_name, book_type, active, regions, supported_sports)
        SELECT b.book_key, b.display_name, 'soft', TRUE, ARRAY['us'], ARRAY[b.sport_key]
        FROM UNNEST($1::text[], $2::text[], $3::text[]) AS b(book_key, display_name, sport_key)
        ON CONFLICT (book_key) DO NOTHING
        "#,
    )
    .bind(&book_keys)
    .bind(&display_names)
    .bind(&sport_keys)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn demote_previous(tx: &mut Transaction<'_, Postgres>, quotes: &[Quote]) -> Result<()> {
    if quotes.is_empty() {
        return Ok(());
    }

    let mut event_ids = Vec::with_capacity(quotes.len());
    let mut market_keys = Vec::with_capacity(quotes.len());
    let mut book_keys = Vec::with_capacity(quotes.len());
    let mut outcome_names = Vec::with_capacity(quotes.len());

    for quote in quotes {
        event_ids.push(quote.event_id.clone());
        market_keys.push(quote.market_key.clone());
        book_keys.push(quote.book_key.clone());
        outcome_names.push(quote.outcome_name.clone());
    }

    sqlx::query(
        r#"
        UPDATE odds_raw
        SET is_latest = FALSE
        WHERE is_latest = TRUE
          AND (event_id, market_key, book_key, outcome_name) IN (
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[])
          )
        "#,
    )
    .bind(&event_ids)
    .bind(&market_keys)
    .bind(&book_keys)
    .bind(&outcome_names)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_quotes(tx: &mut Transaction<'_, Postgres>, quotes: &[Quote]) -> Result<()> {
    if quotes.is_empty() {
        return Ok(());
    }

    let mut event_ids = Vec::with_capacity(quotes.len());
    let mut sport_keys = Vec::with_capacity(quotes.len());
    let mut market_keys = Vec::with_capacity(quotes.len());
    let mut book_keys = Vec::with_capacity(quotes.len());
    let mut outcome_names = Vec::with_capacity(quotes.len());
    let mut prices = Vec::with_capacity(quotes.len());
    let mut points: Vec<Option<f64>> = Vec::with_capacity(quotes.len());
    let mut vendor_updates = Vec::with_capacity(quotes.len());
    let mut received_ats = Vec::with_capacity(quotes.len());

    for quote in quotes {
        event_ids.push(quote.event_id.clone());
        sport_keys.push(quote.sport_key.clone());
        market_keys.push(quote.market_key.clone());
        book_keys.push(quote.book_key.clone());
        outcome_names.push(quote.outcome_name.clone());
        prices.push(quote.price);
        points.push(quote.point);
        vendor_updates.push(quote.vendor_last_update);
        received_ats.push(quote.received_at);
    }

    sqlx::query(
        r#"
        INSERT INTO odds_raw (
            event_id, sport_key, market_key, book_key, outcome_name,
            price, point, vendor_last_update, received_at, is_latest
        )
        SELECT *, TRUE FROM UNNEST(
            $1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
            $6::int[], $7::float8[], $8::timestamptz[], $9::timestamptz[]
        )
        "#,
    )
    .bind(&event_ids)
    .bind(&sport_keys)
    .bind(&market_keys)
    .bind(&book_keys)
    .bind(&outcome_names)
    .bind(&prices)
    .bind(&points)
    .bind(&vendor_updates)
    .bind(&received_ats)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn stream_message(quote: &Quote, status_by_event: &HashMap<&str, EventStatus>) -> StreamMessage {
    let event_status = status_by_event
        .get(quote.event_id.as_str())
        .copied()
        .unwrap_or(EventStatus::Upcoming);

    StreamMessage {
        event_id: quote.event_id.clone(),
        sport_key: quote.sport_key.clone(),
        market_key: quote.market_key.clone(),
        book_key: quote.book_key.clone(),
        outcome_name: quote.outcome_name.clone(),
        price: quote.price,
        point: quote.point,
        vendor_last_update: quote.vendor_last_update,
        received_at: quote.received_at,
        event_status: event_status.as_str().to_string(),
        change_type: None,
    }
}

/// Accept a quote unless its book is European-exclusive; pinnacle is the one
/// EU book allowed through.
pub fn book_accepted(book_key: &str) -> bool {
    let key = book_key.to_ascii_lowercase();
    if EU_ONLY_BOOKS.contains(&key.as_str()) {
        ALLOWED_EU_BOOKS.contains(&key.as_str())
    } else {
        true
    }
}

/// Split new events into those worth warming (upcoming, commence in the
/// future, inside the warm window) and a count of events beyond the window.
fn warm_candidates(events: Vec<Event>, now: DateTime<Utc>) -> (Vec<Event>, usize) {
    let window_end = now + chrono::Duration::hours(WARM_WINDOW_HOURS);
    let mut to_warm = Vec::new();
    let mut skipped_future = 0usize;

    for event in events {
        if event.status != EventStatus::Upcoming {
            continue;
        }
        if event.commence_time <= now {
            continue;
        }
        if event.commence_time > window_end {
            skipped_future += 1;
            continue;
        }
        to_warm.push(event);
    }

    (to_warm, skipped_future)
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn eu_books_are_filtered_except_pinnacle() {
        assert!(book_accepted("fanduel"));
        assert!(book_accepted("draftkings"));
        assert!(book_accepted("pinnacle"));
        assert!(book_accepted("Pinnacle"));

        assert!(!book_accepted("marathonbet"));
        assert!(!book_accepted("betfair_ex_eu"));
        assert!(!book_accepted("Matchbook"));
        assert!(!book_accepted("winamax_fr"));
    }

    #[test]
    fn warm_candidates_filters_by_status_and_window() {
        let now = Utc::now();

        let soon = testutil::event_at("e1", now + chrono::Duration::hours(4));
        let mut live = testutil::event_at("e2", now - chrono::Duration::minutes(10));
        live.status = EventStatus::Live;
        let past = testutil::event_at("e3", now - chrono::Duration::hours(1));
        let far = testutil::event_at("e4", now + chrono::Duration::hours(WARM_WINDOW_HOURS + 1));

        let (to_warm, skipped) = warm_candidates(vec![soon, live, past, far], now);
        assert_eq!(to_warm.len(), 1);
        assert_eq!(to_warm[0].event_id, "e1");
        assert_eq!(skipped, 1);
    }

    #[test]
    fn stream_message_defaults_unknown_events_to_upcoming() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -110, None);
        let message = stream_message(&quote, &HashMap::new());
        assert_eq!(message.event_status, "upcoming");

        let statuses: HashMap<&str, EventStatus> = [("e1", EventStatus::Live)].into();
        let message = stream_message(&quote, &statuses);
        assert_eq!(message.event_status, "live");
    }

    #[test]
    fn stream_message_json_omits_empty_optionals() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -110, None);
        let json = serde_json::to_value(stream_message(&quote, &HashMap::new())).unwrap();

        assert_eq!(json["event_id"], "e1");
        assert_eq!(json["price"], -110);
        assert_eq!(json["event_status"], "upcoming");
        assert!(json.get("point").is_none());
        assert!(json.get("change_type").is_none());

        let quote = testutil::quote("e1", "spreads", "fanduel", "Lakers -3.5", -110, Some(-3.5));
        let json = serde_json::to_value(stream_message(&quote, &HashMap::new())).unwrap();
        assert_eq!(json["point"], -3.5);
    }

    #[test]
    fn capitalize_first_handles_edge_cases() {
        assert_eq!(capitalize_first("fanduel"), "Fanduel");
        assert_eq!(capitalize_first(""), "");
        assert_eq!(capitalize_first("7bet"), "7bet");
    }
}
