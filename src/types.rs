use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// A single observed price: one sportsbook, one outcome, one market, one event.
/// Identity is `(event_id, market_key, book_key, outcome_name)` — the archive
/// keeps at most one row per identity with `is_latest = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub event_id: String,
    pub sport_key: String,
    pub market_key: String,
    pub book_key: String,
    pub outcome_name: String,
    /// American odds. Never zero.
    pub price: i32,
    /// Handicap or total line. Present for spreads/totals, absent for h2h.
    pub point: Option<f64>,
    pub vendor_last_update: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub sport_key: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub status: EventStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Upcoming => "upcoming",
            EventStatus::Live => "live",
            EventStatus::Completed => "completed",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upcoming" => Ok(EventStatus::Upcoming),
            "live" => Ok(EventStatus::Live),
            "completed" => Ok(EventStatus::Completed),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Change classification
// ---------------------------------------------------------------------------

/// How a quote differs from its cached prior observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// No cached entry (or the entry was unreadable) — first observation.
    New,
    /// Price moved, point unchanged.
    PriceOnly,
    /// Point moved, price unchanged.
    PointOnly,
    /// Both price and point moved.
    Both,
    /// Identical to the cached observation. Never persisted or published.
    Unchanged,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::New => "new",
            ChangeType::PriceOnly => "price",
            ChangeType::PointOnly => "point",
            ChangeType::Both => "price_and_point",
            ChangeType::Unchanged => "none",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A quote whose value differs from the cache, with the prior values attached.
#[derive(Debug, Clone)]
pub struct QuoteChange {
    pub quote: Quote,
    pub change_type: ChangeType,
    pub old_price: Option<i32>,
    pub old_point: Option<f64>,
}

// ---------------------------------------------------------------------------
// Vendor fetch options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchOddsOptions {
    pub sport_key: String,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FetchEventOddsOptions {
    pub sport_key: String,
    pub event_id: String,
    pub regions: Vec<String>,
    pub markets: Vec<String>,
}

/// Events and quotes from one vendor round-trip. Events are deduplicated by id.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub events: Vec<Event>,
    pub quotes: Vec<Quote>,
}

/// Vendor quota state, updated from response headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    pub requests_remaining: i64,
    pub requests_used: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_round_trips_through_strings() {
        for status in [
            EventStatus::Upcoming,
            EventStatus::Live,
            EventStatus::Completed,
            EventStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<EventStatus>(), Ok(status));
        }
        assert!("halftime".parse::<EventStatus>().is_err());
    }

    #[test]
    fn change_type_wire_strings() {
        assert_eq!(ChangeType::New.as_str(), "new");
        assert_eq!(ChangeType::PriceOnly.as_str(), "price");
        assert_eq!(ChangeType::PointOnly.as_str(), "point");
        assert_eq!(ChangeType::Both.as_str(), "price_and_point");
    }
}
