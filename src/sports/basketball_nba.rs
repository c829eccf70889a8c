use std::time::Duration;

use super::{FeaturedSchedule, PropsSchedule, RampTier, SportModule};

pub const SPORT_KEY: &str = "basketball_nba";

const FEATURED_MARKETS: &[&str] = &["h2h", "spreads", "totals"];

const PROPS_MARKETS: &[&str] = &[
    "player_points",
    "player_rebounds",
    "player_assists",
    "player_threes",
    "player_points_rebounds_assists",
    "player_points_rebounds",
    "player_points_assists",
    "player_rebounds_assists",
    "player_steals",
    "player_blocks",
    "player_turnovers",
    "player_double_double",
    "player_triple_double",
];

/// NBA module. Featured markets poll every 60s pre-match, ramping to 40s over
/// the final six hours; props discovery sweeps every six hours over a 48h
/// window with a five-tier ramp down to one minute at tipoff.
pub fn module() -> SportModule {
    SportModule {
        sport_key: SPORT_KEY,
        display_name: "NBA Basketball",
        regions: &["us", "us2"],
        featured_markets: FEATURED_MARKETS,
        props_markets: PROPS_MARKETS,
        featured: FeaturedSchedule {
            poll_interval: Duration::from_secs(60),
            pre_match_interval: Duration::from_secs(60),
            ramp_within_hours: 6.0,
            ramp_target_interval: Duration::from_secs(40),
            in_play_interval: Duration::from_secs(40),
        },
        props: PropsSchedule {
            enabled: true,
            poll_interval: Duration::from_secs(30 * 60),
            discovery_interval: Duration::from_secs(6 * 3600),
            discovery_window_hours: 48,
            ramp_tiers: vec![
                RampTier { from_hours: 9999.0, to_hours: 24.0, interval: Duration::from_secs(30 * 60) },
                RampTier { from_hours: 24.0, to_hours: 6.0, interval: Duration::from_secs(30 * 60) },
                RampTier { from_hours: 6.0, to_hours: 1.5, interval: Duration::from_secs(10 * 60) },
                RampTier { from_hours: 1.5, to_hours: 0.333, interval: Duration::from_secs(2 * 60) },
                RampTier { from_hours: 0.333, to_hours: 0.0, interval: Duration::from_secs(60) },
            ],
            in_play_interval: Duration::from_secs(60),
        },
        normalize_team: normalize_team_name,
    }
}

/// Standardize vendor team-name variants ("LA Lakers" vs "Los Angeles Lakers")
/// so event identity survives vendor inconsistencies.
pub fn normalize_team_name(name: &str) -> String {
    let name = name.trim();
    match name {
        "LA Lakers" => "Los Angeles Lakers".to_string(),
        "LA Clippers" => "Los Angeles Clippers".to_string(),
        "NY Knicks" => "New York Knicks".to_string(),
        "GS Warriors" => "Golden State Warriors".to_string(),
        "SA Spurs" => "San Antonio Spurs".to_string(),
        "OKC Thunder" => "Oklahoma City Thunder".to_string(),
        "NO Pelicans" => "New Orleans Pelicans".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_shape() {
        let m = module();
        assert_eq!(m.sport_key, "basketball_nba");
        assert_eq!(m.regions.len(), 2);
        assert_eq!(m.featured_markets, &["h2h", "spreads", "totals"]);
        assert_eq!(m.props.ramp_tiers.len(), 5);
        assert!(m.props.enabled);
        assert!(m.is_props_market("player_points"));
        assert!(!m.is_props_market("h2h"));
    }

    #[test]
    fn team_name_normalization() {
        assert_eq!(normalize_team_name("LA Lakers"), "Los Angeles Lakers");
        assert_eq!(normalize_team_name("  GS Warriors "), "Golden State Warriors");
        assert_eq!(normalize_team_name("Boston Celtics"), "Boston Celtics");
    }
}
