use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ChangeType, Quote, QuoteChange};

/// Points closer than this are the same line. Vendors round-trip floats
/// through JSON, so exact equality would report phantom moves.
const POINT_EPSILON: f64 = 1e-3;

/// Minimal projection of a quote stored in the cache for comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedQuote {
    pub price: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point: Option<f64>,
    pub vendor_last_update: chrono::DateTime<chrono::Utc>,
}

/// Cache-backed change detection. One MGET per batch keeps the hot path
/// under a millisecond for a few hundred quotes; writes go through a
/// pipeline after the archive commit.
pub struct DeltaEngine {
    redis: ConnectionManager,
    ttl: Duration,
}

impl DeltaEngine {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self { redis, ttl }
    }

    /// Compare a batch against the cache and return only changed quotes, in
    /// input order. A cache transport error aborts the whole batch — the
    /// caller skips the tick rather than misclassifying everything as new.
    pub async fn detect_changes(&self, quotes: &[Quote]) -> Result<Vec<QuoteChange>> {
        if quotes.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = quotes.iter().map(cache_key).collect();

        let mut conn = self.redis.clone();
        let cached: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut changes = Vec::with_capacity(quotes.len());
        for (quote, cached_value) in quotes.iter().zip(cached) {
            let (change_type, old_price, old_point) =
                classify(quote, cached_value.as_deref());
            if change_type != ChangeType::Unchanged {
                changes.push(QuoteChange {
                    quote: quote.clone(),
                    change_type,
                    old_price,
                    old_point,
                });
            }
        }

        Ok(changes)
    }

    /// Write-through: store each quote's cached projection under its identity
    /// key with TTL. Called after a successful archive commit.
    pub async fn update_cache(&self, quotes: &[Quote]) -> Result<()> {
        if quotes.is_empty() {
            return Ok(());
        }

        let ttl_secs = self.ttl.as_secs().max(1);
        let mut pipe = redis::pipe();
        for quote in quotes {
            let cached = CachedQuote {
                price: quote.price,
                point: quote.point,
                vendor_last_update: quote.vendor_last_update,
            };
            let value = serde_json::to_string(&cached)?;
            pipe.cmd("SET")
                .arg(cache_key(quote))
                .arg(value)
                .arg("EX")
                .arg(ttl_secs)
                .ignore();
        }

        let mut conn = self.redis.clone();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Re-seed the cache from archive-current quotes, on startup or after
    /// cache loss. Same write path as the steady state.
    pub async fn rebuild_cache(&self, quotes: &[Quote]) -> Result<()> {
        self.update_cache(quotes).await
    }
}

/// Identity key: `odds:current:{event_id}:{market_key}:{book_key}:{outcome_name}`.
pub fn cache_key(quote: &Quote) -> String {
    format!(
        "odds:current:{}:{}:{}:{}",
        quote.event_id, quote.market_key, quote.book_key, quote.outcome_name,
    )
}

/// Classify a quote against its cached value. A missing or unreadable entry
/// classifies as `New` — the next write-through heals it.
fn classify(quote: &Quote, cached_value: Option<&str>) -> (ChangeType, Option<i32>, Option<f64>) {
    let Some(raw) = cached_value else {
        return (ChangeType::New, None, None);
    };

    let Ok(cached) = serde_json::from_str::<CachedQuote>(raw) else {
        return (ChangeType::New, None, None);
    };

    let price_changed = quote.price != cached.price;
    let point_changed = !points_equal(quote.point, cached.point);

    if !price_changed && !point_changed {
        return (ChangeType::Unchanged, None, None);
    }

    let change_type = match (price_changed, point_changed) {
        (true, true) => ChangeType::Both,
        (true, false) => ChangeType::PriceOnly,
        (false, true) => ChangeType::PointOnly,
        (false, false) => unreachable!(),
    };

    (change_type, Some(cached.price), cached.point)
}

fn points_equal(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a - b).abs() <= POINT_EPSILON,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn cached_json(price: i32, point: Option<f64>) -> String {
        serde_json::to_string(&CachedQuote {
            price,
            point,
            vendor_last_update: chrono::Utc::now(),
        })
        .unwrap()
    }

    #[test]
    fn no_cache_entry_is_new() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -110, None);
        let (change, old_price, old_point) = classify(&quote, None);
        assert_eq!(change, ChangeType::New);
        assert_eq!(old_price, None);
        assert_eq!(old_point, None);
    }

    #[test]
    fn corrupt_cache_entry_is_new() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -110, None);
        let (change, _, _) = classify(&quote, Some("{not json"));
        assert_eq!(change, ChangeType::New);
    }

    #[test]
    fn identical_quote_is_unchanged() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -110, None);
        let (change, _, _) = classify(&quote, Some(&cached_json(-110, None)));
        assert_eq!(change, ChangeType::Unchanged);
    }

    #[test]
    fn price_move_is_price_only() {
        let quote = testutil::quote("e1", "h2h", "fanduel", "Lakers", -115, None);
        let (change, old_price, old_point) = classify(&quote, Some(&cached_json(-110, None)));
        assert_eq!(change, ChangeType::PriceOnly);
        assert_eq!(old_price, Some(-110));
        assert_eq!(old_point, None);
    }

    #[test]
    fn point_move_is_point_only() {
        let quote = testutil::quote("e1", "spreads", "fanduel", "Lakers -4.5", -110, Some(4.5));
        let (change, old_price, old_point) =
            classify(&quote, Some(&cached_json(-110, Some(3.5))));
        assert_eq!(change, ChangeType::PointOnly);
        assert_eq!(old_price, Some(-110));
        assert_eq!(old_point, Some(3.5));
    }

    #[test]
    fn price_and_point_move_is_both() {
        let quote = testutil::quote("e1", "spreads", "fanduel", "Lakers -4.5", -120, Some(4.5));
        let (change, old_price, old_point) =
            classify(&quote, Some(&cached_json(-110, Some(3.5))));
        assert_eq!(change, ChangeType::Both);
        assert_eq!(old_price, Some(-110));
        assert_eq!(old_point, Some(3.5));
    }

    #[test]
    fn point_comparison_tolerates_float_noise() {
        let quote = testutil::quote("e1", "totals", "fanduel", "Over 223.5", -110, Some(223.5000004));
        let (change, _, _) = classify(&quote, Some(&cached_json(-110, Some(223.5))));
        assert_eq!(change, ChangeType::Unchanged);
    }

    #[test]
    fn point_appearing_or_vanishing_is_a_change() {
        let quote = testutil::quote("e1", "totals", "fanduel", "Over 223.5", -110, Some(223.5));
        let (change, _, _) = classify(&quote, Some(&cached_json(-110, None)));
        assert_eq!(change, ChangeType::PointOnly);

        let quote = testutil::quote("e1", "totals", "fanduel", "Over 223.5", -110, None);
        let (change, _, old_point) = classify(&quote, Some(&cached_json(-110, Some(223.5))));
        assert_eq!(change, ChangeType::PointOnly);
        assert_eq!(old_point, Some(223.5));
    }

    #[test]
    fn cached_quote_encoding_omits_absent_point() {
        let raw = cached_json(-110, None);
        assert!(!raw.contains("point"));

        let raw = cached_json(-110, Some(3.5));
        let parsed: CachedQuote = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.point, Some(3.5));
    }

    #[test]
    fn cache_key_layout() {
        let quote = testutil::quote("evt9", "spreads", "draftkings", "Celtics +3.5", -110, Some(3.5));
        assert_eq!(
            cache_key(&quote),
            "odds:current:evt9:spreads:draftkings:Celtics +3.5",
        );
    }
}
