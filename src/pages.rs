use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fire-and-forget client for the page-manager collaborator: warms a game
/// page when an event is first seen with odds, closes it when the event
/// completes. Every failure here is logged and swallowed — page state is a
/// convenience, never a correctness dependency.
pub struct PageManagerClient {
    base_url: String,
    books: Vec<String>,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OpenGamePageRequest<'a> {
    /// Away team first, home second (collaborator convention).
    team1: &'a str,
    team2: &'a str,
    sport: &'a str,
    bet_period: &'static str,
    /// YYYY-MM-DD
    event_date: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    target_books: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CloseGamePageRequest<'a> {
    book: &'a str,
    game_key: &'a str,
}

#[derive(Debug, Deserialize, Default)]
struct PageActionResponse {
    #[serde(default)]
    all_ok: bool,
    #[serde(default)]
    any_ok: bool,
}

impl PageManagerClient {
    /// `base_url` empty means the collaborator is not deployed; the client
    /// builds but every call is a no-op.
    pub fn new(base_url: impl Into<String>, books: Vec<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url: base_url.into(), books, http })
    }

    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Warm a game page across the configured books.
    pub async fn open_game_page(
        &self,
        home_team: &str,
        away_team: &str,
        sport_key: &str,
        commence_time: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let req = OpenGamePageRequest {
            team1: away_team,
            team2: home_team,
            sport: map_sport_key(sport_key),
            bet_period: "game",
            event_date: commence_time.format("%Y-%m-%d").to_string(),
            target_books: self.books.clone(),
        };

        let resp = self
            .http
            .post(format!("{}/open-game-page", self.base_url))
            .json(&req)
            .send()
            .await?;
        let action: PageActionResponse = resp.json().await.unwrap_or_default();

        if action.any_ok {
            info!(
                away = away_team,
                home = home_team,
                all_ok = action.all_ok,
                "game page warmed"
            );
        } else {
            warn!(away = away_team, home = home_team, "no bot warmed the game page");
        }
        Ok(())
    }

    /// Close game pages for a completed event: one request per configured
    /// book, each keyed by the event's derived game key.
    pub async fn close_game_page_for_event(
        &self,
        home_team: &str,
        away_team: &str,
        sport_key: &str,
        commence_time: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        for book in &self.books {
            let game_key = build_game_key(book, sport_key, home_team, away_team, commence_time);
            let req = CloseGamePageRequest { book, game_key: &game_key };

            match self
                .http
                .post(format!("{}/close-game-page", self.base_url))
                .json(&req)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => {
                    warn!(book = %book, status = %resp.status(), "close page rejected");
                }
                Err(err) => {
                    warn!(book = %book, "close page request failed: {err}");
                }
            }
        }
        Ok(())
    }
}

/// `book:sport::yyyymmdd:team1:team2:game` with teams slug-normalized and
/// ordered alphabetically so both sides derive the same key.
pub fn build_game_key(
    book: &str,
    sport_key: &str,
    home_team: &str,
    away_team: &str,
    commence_time: DateTime<Utc>,
) -> String {
    let mut team1 = normalize_team_slug(away_team);
    let mut team2 = normalize_team_slug(home_team);
    if team1 > team2 {
        std::mem::swap(&mut team1, &mut team2);
    }

    format!(
        "{}:{}::{}:{}:{}:game",
        book,
        map_sport_key(sport_key),
        commence_time.format("%Y%m%d"),
        team1,
        team2,
    )
}

/// Collapse vendor sport keys to the page manager's short names.
pub fn map_sport_key(sport_key: &str) -> &str {
    match sport_key {
        "basketball_nba" | "basketball/nba" => "nba",
        "football_nfl" | "football/nfl" => "nfl",
        "baseball_mlb" | "baseball/mlb" => "mlb",
        "hockey_nhl" | "hockey/nhl" => "nhl",
        other => other,
    }
}

/// Lowercase alphanumerics with spaces as underscores; everything else drops.
pub fn normalize_team_slug(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            'a'..='z' | '0'..='9' => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sport_key_mapping() {
        assert_eq!(map_sport_key("basketball_nba"), "nba");
        assert_eq!(map_sport_key("football_nfl"), "nfl");
        assert_eq!(map_sport_key("hockey_nhl"), "nhl");
        assert_eq!(map_sport_key("soccer_epl"), "soccer_epl");
    }

    #[test]
    fn team_slug_normalization() {
        assert_eq!(normalize_team_slug("Los Angeles Lakers"), "los_angeles_lakers");
        assert_eq!(normalize_team_slug("76ers (PHI)"), "76ers_phi");
    }

    #[test]
    fn game_key_orders_teams_alphabetically() {
        let commence: DateTime<Utc> = "2030-01-15T00:10:00Z".parse().unwrap();

        let key = build_game_key("fanduel", "basketball_nba", "Boston Celtics", "Los Angeles Lakers", commence);
        assert_eq!(key, "fanduel:nba::20300115:boston_celtics:los_angeles_lakers:game");

        // Swapping home/away yields the same key.
        let flipped = build_game_key("fanduel", "basketball_nba", "Los Angeles Lakers", "Boston Celtics", commence);
        assert_eq!(key, flipped);
    }

    #[test]
    fn disabled_client_is_a_noop() {
        let client = PageManagerClient::new("", vec!["fanduel".to_string()]).unwrap();
        assert!(!client.is_enabled());
    }
}
