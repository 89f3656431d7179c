//! Canonical team table: provider-native team naming -> short codes.
//!
//! Providers disagree on team naming ("San Francisco Giants", "SF Giants",
//! "SFG"). Resolution is sport-scoped: exact full-name match, then known
//! short code, then partial nickname/city containment. Unknown teams keep
//! the raw string and are flagged rather than dropped.

use crate::models::Sport;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ResolvedTeam {
    pub code: String,
    /// False when no table entry matched and `code` is the raw input.
    pub resolved: bool,
}

#[derive(Debug, Clone)]
struct TeamEntry {
    code: &'static str,
    city: &'static str,
    nickname: &'static str,
}

const fn team(code: &'static str, city: &'static str, nickname: &'static str) -> TeamEntry {
    TeamEntry { code, city, nickname }
}

#[rustfmt::skip]
const MLB_TEAMS: &[TeamEntry] = &[
    team("ARI", "arizona", "diamondbacks"),
    team("ATL", "atlanta", "braves"),
    team("BAL", "baltimore", "orioles"),
    team("BOS", "boston", "red sox"),
    team("CHC", "chicago", "cubs"),
    team("CWS", "chicago", "white sox"),
    team("CIN", "cincinnati", "reds"),
    team("CLE", "cleveland", "guardians"),
    team("COL", "colorado", "rockies"),
    team("DET", "detroit", "tigers"),
    team("HOU", "houston", "astros"),
    team("KC",  "kansas city", "royals"),
    team("LAA", "los angeles", "angels"),
    team("LAD", "los angeles", "dodgers"),
    team("MIA", "miami", "marlins"),
    team("MIL", "milwaukee", "brewers"),
    team("MIN", "minnesota", "twins"),
    team("NYM", "new york", "mets"),
    team("NYY", "new york", "yankees"),
    team("OAK", "oakland", "athletics"),
    team("PHI", "philadelphia", "phillies"),
    team("PIT", "pittsburgh", "pirates"),
    team("SD",  "san diego", "padres"),
    team("SF",  "san francisco", "giants"),
    team("SEA", "seattle", "mariners"),
    team("STL", "st louis", "cardinals"),
    team("TB",  "tampa bay", "rays"),
    team("TEX", "texas", "rangers"),
    team("TOR", "toronto", "blue jays"),
    team("WSH", "washington", "nationals"),
];

#[rustfmt::skip]
const NBA_TEAMS: &[TeamEntry] = &[
    team("ATL", "atlanta", "hawks"),
    team("BOS", "boston", "celtics"),
    team("BKN", "brooklyn", "nets"),
    team("CHA", "charlotte", "hornets"),
    team("CHI", "chicago", "bulls"),
    team("CLE", "cleveland", "cavaliers"),
    team("DAL", "dallas", "mavericks"),
    team("DEN", "denver", "nuggets"),
    team("DET", "detroit", "pistons"),
    team("GSW", "golden state", "warriors"),
    team("HOU", "houston", "rockets"),
    team("IND", "indiana", "pacers"),
    team("LAC", "los angeles", "clippers"),
    team("LAL", "los angeles", "lakers"),
    team("MEM", "memphis", "grizzlies"),
    team("MIA", "miami", "heat"),
    team("MIL", "milwaukee", "bucks"),
    team("MIN", "minnesota", "timberwolves"),
    team("NOP", "new orleans", "pelicans"),
    team("NYK", "new york", "knicks"),
    team("OKC", "oklahoma city", "thunder"),
    team("ORL", "orlando", "magic"),
    team("PHI", "philadelphia", "76ers"),
    team("PHX", "phoenix", "suns"),
    team("POR", "portland", "trail blazers"),
    team("SAC", "sacramento", "kings"),
    team("SAS", "san antonio", "spurs"),
    team("TOR", "toronto", "raptors"),
    team("UTA", "utah", "jazz"),
    team("WAS", "washington", "wizards"),
];

#[rustfmt::skip]
const NFL_TEAMS: &[TeamEntry] = &[
    team("ARI", "arizona", "cardinals"),
    team("ATL", "atlanta", "falcons"),
    team("BAL", "baltimore", "ravens"),
    team("BUF", "buffalo", "bills"),
    team("CAR", "carolina", "panthers"),
    team("CHI", "chicago", "bears"),
    team("CIN", "cincinnati", "bengals"),
    team("CLE", "cleveland", "browns"),
    team("DAL", "dallas", "cowboys"),
    team("DEN", "denver", "broncos"),
    team("DET", "detroit", "lions"),
    team("GB",  "green bay", "packers"),
    team("HOU", "houston", "texans"),
    team("IND", "indianapolis", "colts"),
    team("JAX", "jacksonville", "jaguars"),
    team("KC",  "kansas city", "chiefs"),
    team("LAC", "los angeles", "chargers"),
    team("LAR", "los angeles", "rams"),
    team("LV",  "las vegas", "raiders"),
    team("MIA", "miami", "dolphins"),
    team("MIN", "minnesota", "vikings"),
    team("NE",  "new england", "patriots"),
    team("NO",  "new orleans", "saints"),
    team("NYG", "new york", "giants"),
    team("NYJ", "new york", "jets"),
    team("PHI", "philadelphia", "eagles"),
    team("PIT", "pittsburgh", "steelers"),
    team("SEA", "seattle", "seahawks"),
    team("SF",  "san francisco", "49ers"),
    team("TB",  "tampa bay", "buccaneers"),
    team("TEN", "tennessee", "titans"),
    team("WAS", "washington", "commanders"),
];

#[rustfmt::skip]
const NHL_TEAMS: &[TeamEntry] = &[
    team("ANA", "anaheim", "ducks"),
    team("BOS", "boston", "bruins"),
    team("BUF", "buffalo", "sabres"),
    team("CAR", "carolina", "hurricanes"),
    team("CBJ", "columbus", "blue jackets"),
    team("CGY", "calgary", "flames"),
    team("CHI", "chicago", "blackhawks"),
    team("COL", "colorado", "avalanche"),
    team("DAL", "dallas", "stars"),
    team("DET", "detroit", "red wings"),
    team("EDM", "edmonton", "oilers"),
    team("FLA", "florida", "panthers"),
    team("LAK", "los angeles", "kings"),
    team("MIN", "minnesota", "wild"),
    team("MTL", "montreal", "canadiens"),
    team("NJD", "new jersey", "devils"),
    team("NSH", "nashville", "predators"),
    team("NYI", "new york", "islanders"),
    team("NYR", "new york", "rangers"),
    team("OTT", "ottawa", "senators"),
    team("PHI", "philadelphia", "flyers"),
    team("PIT", "pittsburgh", "penguins"),
    team("SEA", "seattle", "kraken"),
    team("SJS", "san jose", "sharks"),
    team("STL", "st louis", "blues"),
    team("TBL", "tampa bay", "lightning"),
    team("TOR", "toronto", "maple leafs"),
    team("UTA", "utah", "hockey club"),
    team("VAN", "vancouver", "canucks"),
    team("VGK", "vegas", "golden knights"),
    team("WPG", "winnipeg", "jets"),
    team("WSH", "washington", "capitals"),
];

fn entries_for(sport: Sport) -> &'static [TeamEntry] {
    match sport {
        Sport::Mlb => MLB_TEAMS,
        Sport::Nba => NBA_TEAMS,
        Sport::Nfl => NFL_TEAMS,
        Sport::Nhl => NHL_TEAMS,
    }
}

fn clean(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// One row of the optional TOML overlay ([[team]] entries).
#[derive(Debug, Deserialize)]
pub struct TeamOverlayEntry {
    pub sport: Sport,
    pub name: String,
    pub code: String,
}

pub struct TeamTable {
    /// (sport, cleaned full/partial name) -> code, exact tier.
    exact: HashMap<(Sport, String), String>,
    /// (sport, code lowercased) -> code, pass-through tier.
    codes: HashMap<(Sport, String), String>,
}

impl Default for TeamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamTable {
    pub fn new() -> Self {
        let mut exact = HashMap::new();
        let mut codes = HashMap::new();

        for sport in Sport::ALL {
            for entry in entries_for(sport) {
                let full = format!("{} {}", entry.city, entry.nickname);
                exact.insert((sport, full), entry.code.to_string());
                codes.insert(
                    (sport, entry.code.to_lowercase()),
                    entry.code.to_string(),
                );
            }
        }

        Self { exact, codes }
    }

    /// Build from the shared overlay file's `[[team]]` entries; rows the
    /// file doesn't carry fall back to the built-in tables.
    pub fn from_overlay_file(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        #[derive(Debug, Default, Deserialize)]
        struct OverlayFile {
            #[serde(default)]
            team: Vec<TeamOverlayEntry>,
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading team overlay {}", path.display()))?;
        let file: OverlayFile = toml::from_str(&text)
            .with_context(|| format!("parsing team overlay {}", path.display()))?;
        Ok(Self::with_overlay(file.team))
    }

    pub fn with_overlay(entries: Vec<TeamOverlayEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table
                .exact
                .insert((entry.sport, clean(&entry.name)), entry.code.clone());
            table
                .codes
                .insert((entry.sport, entry.code.to_lowercase()), entry.code);
        }
        table
    }

    /// Resolve a provider-native team string to a short code.
    pub fn resolve(&self, sport: Sport, raw: &str) -> ResolvedTeam {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return ResolvedTeam {
                code: raw.to_string(),
                resolved: false,
            };
        }

        if let Some(code) = self.exact.get(&(sport, cleaned.clone())) {
            return ResolvedTeam {
                code: code.clone(),
                resolved: true,
            };
        }
        if let Some(code) = self.codes.get(&(sport, cleaned.clone())) {
            return ResolvedTeam {
                code: code.clone(),
                resolved: true,
            };
        }

        // Partial match: the raw string carries the nickname (or nickname
        // plus a city fragment). Nickname is the discriminator; city alone
        // is ambiguous for two-team markets.
        for entry in entries_for(sport) {
            if cleaned.contains(entry.nickname) {
                return ResolvedTeam {
                    code: entry.code.to_string(),
                    resolved: true,
                };
            }
        }

        ResolvedTeam {
            code: raw.to_string(),
            resolved: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_resolves() {
        let table = TeamTable::new();
        let resolved = table.resolve(Sport::Mlb, "San Francisco Giants");
        assert!(resolved.resolved);
        assert_eq!(resolved.code, "SF");
    }

    #[test]
    fn test_short_code_passes_through() {
        let table = TeamTable::new();
        let resolved = table.resolve(Sport::Mlb, "pit");
        assert!(resolved.resolved);
        assert_eq!(resolved.code, "PIT");
    }

    #[test]
    fn test_partial_nickname_match() {
        let table = TeamTable::new();
        let resolved = table.resolve(Sport::Nba, "L.A. Lakers");
        assert!(resolved.resolved);
        assert_eq!(resolved.code, "LAL");
    }

    #[test]
    fn test_sport_scoping_disambiguates() {
        let table = TeamTable::new();
        // "Giants" is SF in MLB but NYG in NFL.
        assert_eq!(table.resolve(Sport::Mlb, "Giants").code, "SF");
        assert_eq!(table.resolve(Sport::Nfl, "New York Giants").code, "NYG");
    }

    #[test]
    fn test_unknown_team_preserved_and_flagged() {
        let table = TeamTable::new();
        let resolved = table.resolve(Sport::Mlb, "Springfield Isotopes");
        assert!(!resolved.resolved);
        assert_eq!(resolved.code, "Springfield Isotopes");
    }

    #[test]
    fn test_overlay_file_parses_team_entries() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[team]]
sport = "mlb"
name = "Sacramento Athletics"
code = "ATH"

[[mapping]]
provider = "prizepicks"
sport = "mlb"
category = "irrelevant here"
prop_type = "hits"
"#
        )
        .unwrap();

        let table = TeamTable::from_overlay_file(file.path()).unwrap();
        assert_eq!(table.resolve(Sport::Mlb, "Sacramento Athletics").code, "ATH");
        // Built-ins still present underneath the overlay.
        assert_eq!(table.resolve(Sport::Mlb, "Pittsburgh Pirates").code, "PIT");
    }

    #[test]
    fn test_overlay_entry_wins() {
        let table = TeamTable::with_overlay(vec![TeamOverlayEntry {
            sport: Sport::Mlb,
            name: "Sacramento Athletics".to_string(),
            code: "ATH".to_string(),
        }]);
        assert_eq!(table.resolve(Sport::Mlb, "Sacramento Athletics").code, "ATH");
    }
}
