pub mod basketball_nba;
pub mod football_nfl;

use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Quote;

// ---------------------------------------------------------------------------
// Polling schedules
// ---------------------------------------------------------------------------

/// Featured-market polling: a fixed pre-match cadence that ramps linearly to
/// a tighter target as the event approaches, and an in-play cadence once live.
#[derive(Debug, Clone)]
pub struct FeaturedSchedule {
    pub poll_interval: Duration,
    pub pre_match_interval: Duration,
    /// Hours before commence time at which ramping begins.
    pub ramp_within_hours: f64,
    pub ramp_target_interval: Duration,
    pub in_play_interval: Duration,
}

/// One bracket of the props ramp table: `[to_hours, from_hours)` maps to an
/// interval. Tiers are ordered widest-first; the last tier is the tightest.
#[derive(Debug, Clone, Copy)]
pub struct RampTier {
    pub from_hours: f64,
    pub to_hours: f64,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct PropsSchedule {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub discovery_interval: Duration,
    pub discovery_window_hours: i64,
    pub ramp_tiers: Vec<RampTier>,
    pub in_play_interval: Duration,
}

// ---------------------------------------------------------------------------
// SportModule
// ---------------------------------------------------------------------------

/// Static per-sport capability set: keys, markets, regions, polling schedules
/// and quote validation. Built once at startup, never mutated. Adding a sport
/// is a new module under `sports/` plus one registration call in `main`.
#[derive(Debug, Clone)]
pub struct SportModule {
    pub sport_key: &'static str,
    pub display_name: &'static str,
    pub regions: &'static [&'static str],
    pub featured_markets: &'static [&'static str],
    pub props_markets: &'static [&'static str],
    pub featured: FeaturedSchedule,
    pub props: PropsSchedule,
    /// Canonicalize vendor team-name variants before events reach the writer.
    pub normalize_team: fn(&str) -> String,
}

/// Default normalizer for sports without vendor name drift.
pub fn trim_team_name(name: &str) -> String {
    name.trim().to_string()
}

impl SportModule {
    /// Interval for the next featured poll given hours until commence time.
    /// Live events use the in-play cadence; far-out events the pre-match one;
    /// inside the ramp window the interval interpolates linearly toward the
    /// ramp target as `hours_to_start` approaches zero.
    pub fn featured_interval(&self, hours_to_start: f64, is_live: bool) -> Duration {
        if is_live {
            return self.featured.in_play_interval;
        }
        if hours_to_start > self.featured.ramp_within_hours {
            return self.featured.pre_match_interval;
        }

        let factor = (hours_to_start / self.featured.ramp_within_hours).clamp(0.0, 1.0);
        let spread = self
            .featured
            .pre_match_interval
            .saturating_sub(self.featured.ramp_target_interval);
        self.featured.ramp_target_interval + spread.mul_f64(factor)
    }

    /// Interval for the next props poll: the first ramp tier whose bracket
    /// contains `hours_to_start`, falling back to the tightest (final) tier.
    pub fn props_interval(&self, hours_to_start: f64, is_live: bool) -> Duration {
        if is_live {
            return self.props.in_play_interval;
        }
        for tier in &self.props.ramp_tiers {
            if hours_to_start >= tier.to_hours && hours_to_start < tier.from_hours {
                return tier.interval;
            }
        }
        self.props
            .ramp_tiers
            .last()
            .map(|t| t.interval)
            .unwrap_or(self.props.poll_interval)
    }

    pub fn is_props_market(&self, market_key: &str) -> bool {
        self.props_markets.contains(&market_key)
    }

    /// Boundary validation: malformed quotes never enter the pipeline.
    pub fn validate_quote(&self, quote: &Quote) -> Result<()> {
        if quote.sport_key != self.sport_key {
            return Err(AppError::InvalidQuote(format!(
                "sport_key {} does not belong to {}",
                quote.sport_key, self.sport_key
            )));
        }
        if !self.featured_markets.contains(&quote.market_key.as_str())
            && !self.props_markets.contains(&quote.market_key.as_str())
        {
            return Err(AppError::InvalidQuote(format!(
                "unknown market {} for {}",
                quote.market_key, self.sport_key
            )));
        }
        if quote.price == 0 {
            return Err(AppError::InvalidQuote("price cannot be 0".to_string()));
        }
        if (quote.market_key == "spreads" || quote.market_key == "totals") && quote.point.is_none() {
            return Err(AppError::InvalidQuote(format!(
                "market {} requires a point value",
                quote.market_key
            )));
        }
        Ok(())
    }

    pub fn regions_vec(&self) -> Vec<String> {
        self.regions.iter().map(|r| r.to_string()).collect()
    }

    pub fn featured_markets_vec(&self) -> Vec<String> {
        self.featured_markets.iter().map(|m| m.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn featured_interval_pre_match_far_out() {
        let module = basketball_nba::module();
        assert_eq!(module.featured_interval(12.0, false), Duration::from_secs(60));
    }

    #[test]
    fn featured_interval_ramps_toward_target() {
        let module = basketball_nba::module();
        // Halfway through the 6h ramp window: halfway between 60s and 40s.
        let interval = module.featured_interval(3.0, false);
        assert_eq!(interval, Duration::from_secs(50));

        // Near tipoff the interval approaches the 40s target.
        let interval = module.featured_interval(0.5, false);
        assert!(interval >= Duration::from_secs(40) && interval <= Duration::from_secs(45));
    }

    #[test]
    fn featured_interval_live_uses_in_play() {
        let module = basketball_nba::module();
        assert_eq!(module.featured_interval(0.0, true), Duration::from_secs(40));
    }

    #[test]
    fn props_interval_selects_matching_tier() {
        let module = basketball_nba::module();
        assert_eq!(module.props_interval(30.0, false), Duration::from_secs(1800));
        assert_eq!(module.props_interval(3.0, false), Duration::from_secs(600));
        assert_eq!(module.props_interval(1.0, false), Duration::from_secs(120));
        assert_eq!(module.props_interval(0.1, false), Duration::from_secs(60));
    }

    #[test]
    fn props_interval_out_of_range_falls_to_tightest_tier() {
        let module = basketball_nba::module();
        assert_eq!(module.props_interval(-1.0, false), Duration::from_secs(60));
    }

    #[test]
    fn validate_accepts_well_formed_quote() {
        let module = basketball_nba::module();
        let quote = testutil::quote("evt1", "h2h", "fanduel", "Lakers", -110, None);
        assert!(module.validate_quote(&quote).is_ok());
    }

    #[test]
    fn validate_rejects_zero_price() {
        let module = basketball_nba::module();
        let quote = testutil::quote("evt1", "h2h", "fanduel", "Lakers", 0, None);
        assert!(module.validate_quote(&quote).is_err());
    }

    #[test]
    fn validate_rejects_spread_without_point() {
        let module = basketball_nba::module();
        let quote = testutil::quote("evt1", "spreads", "fanduel", "Lakers -3.5", -110, None);
        assert!(module.validate_quote(&quote).is_err());

        let quote = testutil::quote("evt1", "spreads", "fanduel", "Lakers -3.5", -110, Some(-3.5));
        assert!(module.validate_quote(&quote).is_ok());
    }

    #[test]
    fn validate_rejects_foreign_sport_and_market() {
        let module = basketball_nba::module();

        let mut quote = testutil::quote("evt1", "h2h", "fanduel", "Lakers", -110, None);
        quote.sport_key = "football_nfl".to_string();
        assert!(module.validate_quote(&quote).is_err());

        let quote = testutil::quote("evt1", "player_pass_yds", "fanduel", "Someone", -110, Some(250.5));
        assert!(module.validate_quote(&quote).is_err());
    }
}
