use std::time::Duration;

use super::{FeaturedSchedule, PropsSchedule, RampTier, SportModule};

pub const SPORT_KEY: &str = "football_nfl";

const FEATURED_MARKETS: &[&str] = &["h2h", "spreads", "totals"];

const PROPS_MARKETS: &[&str] = &[
    "player_pass_yds",
    "player_pass_tds",
    "player_rush_yds",
    "player_rush_attempts",
    "player_receptions",
    "player_reception_yds",
    "player_anytime_td",
];

/// NFL module. Lines move slower than NBA pre-match, so the pre-match cadence
/// is wider (2 min) with the same 40s target near kickoff; the weekly slate
/// allows a longer discovery window.
pub fn module() -> SportModule {
    SportModule {
        sport_key: SPORT_KEY,
        display_name: "NFL Football",
        regions: &["us", "us2"],
        featured_markets: FEATURED_MARKETS,
        props_markets: PROPS_MARKETS,
        featured: FeaturedSchedule {
            poll_interval: Duration::from_secs(120),
            pre_match_interval: Duration::from_secs(120),
            ramp_within_hours: 8.0,
            ramp_target_interval: Duration::from_secs(40),
            in_play_interval: Duration::from_secs(40),
        },
        props: PropsSchedule {
            enabled: true,
            poll_interval: Duration::from_secs(60 * 60),
            discovery_interval: Duration::from_secs(12 * 3600),
            discovery_window_hours: 168,
            ramp_tiers: vec![
                RampTier { from_hours: 9999.0, to_hours: 48.0, interval: Duration::from_secs(60 * 60) },
                RampTier { from_hours: 48.0, to_hours: 12.0, interval: Duration::from_secs(30 * 60) },
                RampTier { from_hours: 12.0, to_hours: 3.0, interval: Duration::from_secs(15 * 60) },
                RampTier { from_hours: 3.0, to_hours: 0.5, interval: Duration::from_secs(5 * 60) },
                RampTier { from_hours: 0.5, to_hours: 0.0, interval: Duration::from_secs(90) },
            ],
            in_play_interval: Duration::from_secs(90),
        },
        normalize_team: super::trim_team_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_shape() {
        let m = module();
        assert_eq!(m.sport_key, "football_nfl");
        assert!(m.props.enabled);
        assert_eq!(m.props.discovery_window_hours, 168);
        assert!(m.is_props_market("player_anytime_td"));
    }

    #[test]
    fn pre_match_cadence_is_wider_than_nba() {
        let nfl = module();
        let nba = super::super::basketball_nba::module();
        assert!(nfl.featured_interval(24.0, false) > nba.featured_interval(24.0, false));
    }
}
