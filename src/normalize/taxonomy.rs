//! Taxonomy service: provider category strings -> canonical prop types.
//!
//! Two lookup tiers: an exact provider-scoped table, then a global
//! per-sport table over a normalized category key. Tables are immutable
//! snapshots behind an `ArcSwap`; reload builds a fresh snapshot and swaps
//! it in, so in-flight classifications never observe a torn table.

use crate::models::{PropType, Sport};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Bounded so a hostile provider can't grow the miss set without limit.
const MISS_SET_CAP: usize = 1024;

/// Strip punctuation, collapse whitespace, drop player/team prefixes.
pub fn normalize_category(category: &str) -> String {
    let lowered = category.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    collapsed
        .strip_prefix("player ")
        .or_else(|| collapsed.strip_prefix("team "))
        .unwrap_or(&collapsed)
        .to_string()
}

/// Immutable lookup snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyTables {
    /// (provider_id, sport, lowercased raw category) -> prop type.
    provider: HashMap<(String, Sport, String), PropType>,
    /// (sport, normalized category) -> prop type.
    global: HashMap<(Sport, String), PropType>,
}

impl TaxonomyTables {
    pub fn lookup(&self, provider_id: &str, category: &str, sport: Sport) -> Option<PropType> {
        let provider_key = (
            provider_id.to_ascii_lowercase(),
            sport,
            category.trim().to_lowercase(),
        );
        if let Some(&prop_type) = self.provider.get(&provider_key) {
            return Some(prop_type);
        }
        self.global
            .get(&(sport, normalize_category(category)))
            .copied()
    }

    pub fn insert_provider(&mut self, provider_id: &str, sport: Sport, category: &str, prop_type: PropType) {
        self.provider.insert(
            (
                provider_id.to_ascii_lowercase(),
                sport,
                category.trim().to_lowercase(),
            ),
            prop_type,
        );
    }

    pub fn insert_global(&mut self, sport: Sport, category: &str, prop_type: PropType) {
        self.global
            .insert((sport, normalize_category(category)), prop_type);
    }

    pub fn len(&self) -> usize {
        self.provider.len() + self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compiled-in mappings covering the common categories of the two
    /// built-in providers plus book-style long names.
    pub fn builtin() -> Self {
        use PropType::*;

        let mut tables = Self::default();

        let nba: &[(&str, PropType)] = &[
            ("points", Points),
            ("pts", Points),
            ("assists", Assists),
            ("ast", Assists),
            ("rebounds", Rebounds),
            ("reb", Rebounds),
            ("3 pt made", ThreePointersMade),
            ("three pointers made", ThreePointersMade),
            ("3pm", ThreePointersMade),
            ("steals", Steals),
            ("blocks", Blocks),
            ("blocked shots", Blocks),
            ("turnovers", Turnovers),
            ("pts rebs asts", PointsReboundsAssists),
            ("points rebounds assists", PointsReboundsAssists),
            ("pra", PointsReboundsAssists),
        ];
        let mlb: &[(&str, PropType)] = &[
            ("hits", Hits),
            ("home runs", HomeRuns),
            ("hr", HomeRuns),
            ("rbi", RunsBattedIn),
            ("rbis", RunsBattedIn),
            ("runs batted in", RunsBattedIn),
            ("runs", RunsScored),
            ("runs scored", RunsScored),
            ("total bases", TotalBases),
            ("stolen bases", StolenBases),
            ("doubles", Doubles),
            ("walks", BatterWalks),
            ("batter walks", BatterWalks),
            ("batter strikeouts", BatterStrikeouts),
            ("hitter strikeouts", BatterStrikeouts),
            ("pitcher strikeouts", PitcherStrikeouts),
            ("strikeouts", PitcherStrikeouts),
            ("ks", PitcherStrikeouts),
            ("innings pitched", InningsPitched),
            ("hits allowed", HitsAllowed),
            ("walks allowed", WalksAllowed),
            ("earned runs", EarnedRuns),
            ("earned runs allowed", EarnedRuns),
            ("wins", PitcherWins),
            ("saves", Saves),
            ("total runs", TeamTotalRuns),
        ];
        let nfl: &[(&str, PropType)] = &[
            ("passing yards", PassingYards),
            ("pass yards", PassingYards),
            ("passing tds", PassingTouchdowns),
            ("passing touchdowns", PassingTouchdowns),
            ("rushing yards", RushingYards),
            ("rush yards", RushingYards),
            ("receiving yards", ReceivingYards),
            ("rec yards", ReceivingYards),
            ("receptions", Receptions),
            ("interceptions", InterceptionsThrown),
            ("total points", TeamTotalPoints),
        ];
        let nhl: &[(&str, PropType)] = &[
            ("goals", Goals),
            ("assists", HockeyAssists),
            ("shots on goal", ShotsOnGoal),
            ("sog", ShotsOnGoal),
            ("saves", GoalieSaves),
            ("goalie saves", GoalieSaves),
            ("total goals", TeamTotalGoals),
        ];

        for (category, prop_type) in nba {
            tables.insert_global(Sport::Nba, category, *prop_type);
        }
        for (category, prop_type) in mlb {
            tables.insert_global(Sport::Mlb, category, *prop_type);
        }
        for (category, prop_type) in nfl {
            tables.insert_global(Sport::Nfl, category, *prop_type);
        }
        for (category, prop_type) in nhl {
            tables.insert_global(Sport::Nhl, category, *prop_type);
        }

        // Provider-scoped quirks that the normalized global key can't carry.
        tables.insert_provider("prizepicks", Sport::Mlb, "pitcher outs", PitcherStrikeouts);
        tables.insert_provider("draftkings", Sport::Nba, "player points", Points);
        tables.insert_provider("draftkings", Sport::Mlb, "strikeouts thrown", PitcherStrikeouts);

        tables
    }
}

/// One row of the TOML overlay file.
#[derive(Debug, Deserialize)]
struct TaxonomyEntry {
    #[serde(default)]
    provider: Option<String>,
    sport: Sport,
    category: String,
    prop_type: PropType,
}

#[derive(Debug, Default, Deserialize)]
struct TaxonomyFile {
    #[serde(default)]
    mapping: Vec<TaxonomyEntry>,
}

/// Result of an admin reload, returned in the response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub total_mappings: usize,
    pub added: usize,
    pub changed: usize,
    pub resolved_misses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct TaxonomyMiss {
    pub provider_id: String,
    pub sport: Sport,
    pub category: String,
}

pub struct TaxonomyService {
    tables: ArcSwap<TaxonomyTables>,
    misses: Mutex<BTreeSet<TaxonomyMiss>>,
    overlay_path: Option<String>,
}

impl TaxonomyService {
    pub fn new(overlay_path: Option<String>) -> anyhow::Result<Self> {
        let service = Self {
            tables: ArcSwap::from_pointee(TaxonomyTables::builtin()),
            misses: Mutex::new(BTreeSet::new()),
            overlay_path,
        };
        if service.overlay_path.is_some() {
            service.reload()?;
        }
        Ok(service)
    }

    #[cfg(test)]
    pub fn with_tables(tables: TaxonomyTables) -> Self {
        Self {
            tables: ArcSwap::from_pointee(tables),
            misses: Mutex::new(BTreeSet::new()),
            overlay_path: None,
        }
    }

    /// Resolve a provider category. Misses return `Unknown` and are
    /// recorded for operator review.
    pub fn resolve(&self, provider_id: &str, category: &str, sport: Sport) -> PropType {
        let tables = self.tables.load();
        match tables.lookup(provider_id, category, sport) {
            Some(prop_type) => prop_type,
            None => {
                self.record_miss(provider_id, category, sport);
                PropType::Unknown
            }
        }
    }

    fn record_miss(&self, provider_id: &str, category: &str, sport: Sport) {
        let mut misses = self.misses.lock();
        if misses.len() >= MISS_SET_CAP {
            return;
        }
        let miss = TaxonomyMiss {
            provider_id: provider_id.to_string(),
            sport,
            category: category.to_string(),
        };
        if misses.insert(miss) {
            warn!(
                provider = provider_id,
                sport = %sport,
                category,
                "taxonomy_miss"
            );
        }
    }

    /// Unmapped categories observed since startup (or last resolving reload).
    pub fn misses(&self) -> Vec<TaxonomyMiss> {
        self.misses.lock().iter().cloned().collect()
    }

    /// Rebuild the snapshot from builtins plus the overlay file and swap it
    /// in atomically. Misses that now resolve are dropped from the set.
    pub fn reload(&self) -> anyhow::Result<ReloadSummary> {
        let mut next = TaxonomyTables::builtin();
        if let Some(path) = &self.overlay_path {
            apply_overlay(&mut next, Path::new(path))?;
        }

        let previous = self.tables.load_full();
        let mut added = 0;
        let mut changed = 0;
        for (key, prop_type) in &next.global {
            match previous.global.get(key) {
                None => added += 1,
                Some(old) if old != prop_type => changed += 1,
                Some(_) => {}
            }
        }
        for (key, prop_type) in &next.provider {
            match previous.provider.get(key) {
                None => added += 1,
                Some(old) if old != prop_type => changed += 1,
                Some(_) => {}
            }
        }

        let total_mappings = next.len();
        let next = Arc::new(next);
        self.tables.store(next.clone());

        let mut misses = self.misses.lock();
        let before = misses.len();
        misses.retain(|m| next.lookup(&m.provider_id, &m.category, m.sport).is_none());
        let resolved_misses = before - misses.len();

        info!(total_mappings, added, changed, resolved_misses, "taxonomy_reloaded");
        Ok(ReloadSummary {
            total_mappings,
            added,
            changed,
            resolved_misses,
        })
    }
}

fn apply_overlay(tables: &mut TaxonomyTables, path: &Path) -> anyhow::Result<()> {
    use anyhow::Context;

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading taxonomy overlay {}", path.display()))?;
    let file: TaxonomyFile = toml::from_str(&text)
        .with_context(|| format!("parsing taxonomy overlay {}", path.display()))?;

    for entry in file.mapping {
        match entry.provider {
            Some(provider) => {
                tables.insert_provider(&provider, entry.sport, &entry.category, entry.prop_type)
            }
            None => tables.insert_global(entry.sport, &entry.category, entry.prop_type),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_normalize_category() {
        assert_eq!(normalize_category("Player Points"), "points");
        assert_eq!(normalize_category("  Team   Total  Runs!"), "total runs");
        assert_eq!(normalize_category("3-PT Made"), "3 pt made");
    }

    #[test]
    fn test_provider_table_wins_over_global() {
        let mut tables = TaxonomyTables::builtin();
        tables.insert_provider("oddco", Sport::Nba, "points", PropType::Rebounds);
        assert_eq!(
            tables.lookup("oddco", "Points", Sport::Nba),
            Some(PropType::Rebounds)
        );
        assert_eq!(
            tables.lookup("other", "Points", Sport::Nba),
            Some(PropType::Points)
        );
    }

    #[test]
    fn test_sport_scoping() {
        let tables = TaxonomyTables::builtin();
        // "saves" is a pitcher stat in MLB and a goalie stat in NHL.
        assert_eq!(tables.lookup("x", "Saves", Sport::Mlb), Some(PropType::Saves));
        assert_eq!(tables.lookup("x", "Saves", Sport::Nhl), Some(PropType::GoalieSaves));
    }

    #[test]
    fn test_miss_returns_unknown_and_is_recorded() {
        let service = TaxonomyService::new(None).unwrap();
        let prop_type = service.resolve("prizepicks", "Pitcher Outs Recorded", Sport::Mlb);
        assert_eq!(prop_type, PropType::Unknown);

        let misses = service.misses();
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].category, "Pitcher Outs Recorded");
    }

    #[test]
    fn test_reload_installs_mapping_and_resolves_miss() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[mapping]]
provider = "prizepicks"
sport = "mlb"
category = "Pitcher Outs Recorded"
prop_type = "pitcher_strikeouts"
"#
        )
        .unwrap();

        let service =
            TaxonomyService::new(Some(file.path().to_string_lossy().into_owned())).unwrap();
        // Force a miss with a category the overlay does not carry yet.
        assert_eq!(
            service.resolve("prizepicks", "Quality Starts", Sport::Mlb),
            PropType::Unknown
        );
        assert_eq!(
            service.resolve("prizepicks", "Pitcher Outs Recorded", Sport::Mlb),
            PropType::PitcherStrikeouts
        );

        writeln!(
            file,
            r#"
[[mapping]]
provider = "prizepicks"
sport = "mlb"
category = "Quality Starts"
prop_type = "pitcher_wins"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let summary = service.reload().unwrap();
        assert_eq!(summary.resolved_misses, 1);
        assert_eq!(
            service.resolve("prizepicks", "Quality Starts", Sport::Mlb),
            PropType::PitcherWins
        );
        assert!(service.misses().is_empty());
    }
}
