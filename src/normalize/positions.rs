//! Position-aware compatibility rules.
//!
//! A pitcher's "hits" line is a batter stat the pitcher will never record;
//! the default query surface must not serve it. Rules are deny-lists per
//! (sport, position class): a prop passes unless its type is physically
//! impossible for the position. Team props and missing positions always
//! pass (fail-safe).

use crate::models::{PropType, Sport};

/// Baseball scorekeeping code for the pitcher.
const MLB_PITCHER_POSITION: &str = "1";

/// Team props carry this sentinel position.
pub const TEAM_POSITION: &str = "TEAM";

fn is_mlb_pitcher_stat(prop_type: PropType) -> bool {
    matches!(
        prop_type,
        PropType::PitcherStrikeouts
            | PropType::InningsPitched
            | PropType::HitsAllowed
            | PropType::WalksAllowed
            | PropType::EarnedRuns
            | PropType::PitcherWins
            | PropType::Saves
    )
}

fn is_mlb_batter_stat(prop_type: PropType) -> bool {
    matches!(
        prop_type,
        PropType::Hits
            | PropType::HomeRuns
            | PropType::RunsBattedIn
            | PropType::RunsScored
            | PropType::TotalBases
            | PropType::StolenBases
            | PropType::Doubles
            | PropType::BatterWalks
            | PropType::BatterStrikeouts
    )
}

fn is_nhl_skater_stat(prop_type: PropType) -> bool {
    matches!(
        prop_type,
        PropType::Goals | PropType::HockeyAssists | PropType::ShotsOnGoal
    )
}

/// Static sport-scoped compatibility table. Constructed at startup and
/// injected where needed; rule changes ship with a deploy.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionTable;

impl PositionTable {
    pub fn new() -> Self {
        Self
    }

    /// Whether `prop_type` is physically possible for a player at
    /// `position` in `sport`.
    pub fn compatible(&self, sport: Sport, position: &str, prop_type: PropType) -> bool {
        let position = position.trim();

        // Team props and missing positions are always preserved.
        if position.is_empty() || position.eq_ignore_ascii_case(TEAM_POSITION) {
            return true;
        }
        if prop_type.is_team_total() {
            return true;
        }

        match sport {
            Sport::Mlb => {
                if position == MLB_PITCHER_POSITION {
                    !is_mlb_batter_stat(prop_type)
                } else {
                    !is_mlb_pitcher_stat(prop_type)
                }
            }
            Sport::Nhl => {
                if position.eq_ignore_ascii_case("G") {
                    !is_nhl_skater_stat(prop_type)
                } else {
                    prop_type != PropType::GoalieSaves
                }
            }
            // Basketball and football positions don't gate any prop type
            // the pipeline carries.
            Sport::Nba | Sport::Nfl => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitcher_cannot_have_batter_stats() {
        let table = PositionTable::new();
        assert!(!table.compatible(Sport::Mlb, "1", PropType::Hits));
        assert!(!table.compatible(Sport::Mlb, "1", PropType::TotalBases));
        assert!(table.compatible(Sport::Mlb, "1", PropType::PitcherStrikeouts));
        assert!(table.compatible(Sport::Mlb, "1", PropType::InningsPitched));
    }

    #[test]
    fn test_batter_cannot_have_pitcher_stats() {
        let table = PositionTable::new();
        assert!(table.compatible(Sport::Mlb, "7", PropType::Hits));
        assert!(!table.compatible(Sport::Mlb, "7", PropType::EarnedRuns));
        assert!(!table.compatible(Sport::Mlb, "DH", PropType::Saves));
    }

    #[test]
    fn test_team_and_missing_positions_preserved() {
        let table = PositionTable::new();
        assert!(table.compatible(Sport::Mlb, "TEAM", PropType::TeamTotalRuns));
        assert!(table.compatible(Sport::Mlb, "", PropType::EarnedRuns));
        assert!(table.compatible(Sport::Mlb, "1", PropType::TeamTotalRuns));
    }

    #[test]
    fn test_unknown_prop_type_is_preserved() {
        // The unknown-type exclusion is a separate default-surface rule;
        // position filtering alone must not drop it.
        let table = PositionTable::new();
        assert!(table.compatible(Sport::Mlb, "1", PropType::Unknown));
    }

    #[test]
    fn test_nhl_goalie_rules() {
        let table = PositionTable::new();
        assert!(!table.compatible(Sport::Nhl, "G", PropType::Goals));
        assert!(table.compatible(Sport::Nhl, "G", PropType::GoalieSaves));
        assert!(!table.compatible(Sport::Nhl, "C", PropType::GoalieSaves));
        assert!(table.compatible(Sport::Nhl, "C", PropType::ShotsOnGoal));
    }

    #[test]
    fn test_basketball_positions_unrestricted() {
        let table = PositionTable::new();
        assert!(table.compatible(Sport::Nba, "C", PropType::Assists));
        assert!(table.compatible(Sport::Nba, "PG", PropType::Rebounds));
    }
}
