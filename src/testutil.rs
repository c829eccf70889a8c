//! Shared fixture builders for unit and integration tests.

use chrono::{DateTime, Utc};

use crate::types::{Event, EventStatus, Quote};

pub fn quote(
    event_id: &str,
    market_key: &str,
    book_key: &str,
    outcome_name: &str,
    price: i32,
    point: Option<f64>,
) -> Quote {
    let now = Utc::now();
    Quote {
        event_id: event_id.to_string(),
        sport_key: "basketball_nba".to_string(),
        market_key: market_key.to_string(),
        book_key: book_key.to_string(),
        outcome_name: outcome_name.to_string(),
        price,
        point,
        vendor_last_update: now,
        received_at: now,
    }
}

pub fn event_at(event_id: &str, commence_time: DateTime<Utc>) -> Event {
    Event {
        event_id: event_id.to_string(),
        sport_key: "basketball_nba".to_string(),
        home_team: "Boston Celtics".to_string(),
        away_team: "Los Angeles Lakers".to_string(),
        commence_time,
        status: EventStatus::Upcoming,
    }
}
