//! Canonical domain model for the prop ingestion pipeline.
//!
//! Provider clients decode their wire formats into `RawProp` at the boundary;
//! everything downstream of the mapper speaks `CanonicalProp` only. Identity
//! for a canonical prop is its `LineHash` and nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sports covered by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sport {
    Mlb,
    Nba,
    Nfl,
    Nhl,
}

impl Sport {
    pub const ALL: [Sport; 4] = [Sport::Mlb, Sport::Nba, Sport::Nfl, Sport::Nhl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sport::Mlb => "mlb",
            Sport::Nba => "nba",
            Sport::Nfl => "nfl",
            Sport::Nhl => "nhl",
        }
    }
}

impl FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mlb" => Ok(Sport::Mlb),
            "nba" => Ok(Sport::Nba),
            "nfl" => Ok(Sport::Nfl),
            "nhl" => Ok(Sport::Nhl),
            other => Err(format!("unknown sport '{other}'")),
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream game state. Only `Scheduled` games are visible on the default
/// query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    Live,
    Final,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Scheduled => "scheduled",
            GameStatus::Live => "live",
            GameStatus::Final => "final",
        }
    }
}

/// Payout family as offered by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutType {
    Standard,
    Flex,
    Boost,
    Multiplier,
}

impl PayoutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutType::Standard => "standard",
            PayoutType::Flex => "flex",
            PayoutType::Boost => "boost",
            PayoutType::Multiplier => "multiplier",
        }
    }
}

/// Which wire encoding the normalizer detected for the odds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutVariant {
    Multiplier,
    Moneyline,
    Decimal,
    /// Undetected or synthesized encoding; marked low-confidence.
    Mixed,
}

impl PayoutVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutVariant::Multiplier => "multiplier",
            PayoutVariant::Moneyline => "moneyline",
            PayoutVariant::Decimal => "decimal",
            PayoutVariant::Mixed => "mixed",
        }
    }
}

/// Market segment requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    PlayerProps,
    TeamProps,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::PlayerProps => "playerprops",
            MarketType::TeamProps => "teamprops",
        }
    }
}

/// Canonical prop category, sport-scoped. Provider-native category strings
/// resolve here through the taxonomy service; anything unmapped lands on
/// `Unknown` and is excluded from the default query surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropType {
    // Basketball
    Points,
    Assists,
    Rebounds,
    ThreePointersMade,
    Steals,
    Blocks,
    Turnovers,
    PointsReboundsAssists,

    // Baseball, batter side
    Hits,
    HomeRuns,
    RunsBattedIn,
    RunsScored,
    TotalBases,
    StolenBases,
    Doubles,
    BatterWalks,
    BatterStrikeouts,

    // Baseball, pitcher side
    PitcherStrikeouts,
    InningsPitched,
    HitsAllowed,
    WalksAllowed,
    EarnedRuns,
    PitcherWins,
    Saves,

    // Football
    PassingYards,
    PassingTouchdowns,
    RushingYards,
    ReceivingYards,
    Receptions,
    InterceptionsThrown,

    // Hockey
    Goals,
    HockeyAssists,
    ShotsOnGoal,
    GoalieSaves,

    // Team totals
    TeamTotalRuns,
    TeamTotalPoints,
    TeamTotalGoals,

    /// No taxonomy mapping existed at ingest time.
    Unknown,
}

impl PropType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropType::Points => "points",
            PropType::Assists => "assists",
            PropType::Rebounds => "rebounds",
            PropType::ThreePointersMade => "three_pointers_made",
            PropType::Steals => "steals",
            PropType::Blocks => "blocks",
            PropType::Turnovers => "turnovers",
            PropType::PointsReboundsAssists => "points_rebounds_assists",
            PropType::Hits => "hits",
            PropType::HomeRuns => "home_runs",
            PropType::RunsBattedIn => "runs_batted_in",
            PropType::RunsScored => "runs_scored",
            PropType::TotalBases => "total_bases",
            PropType::StolenBases => "stolen_bases",
            PropType::Doubles => "doubles",
            PropType::BatterWalks => "batter_walks",
            PropType::BatterStrikeouts => "batter_strikeouts",
            PropType::PitcherStrikeouts => "pitcher_strikeouts",
            PropType::InningsPitched => "innings_pitched",
            PropType::HitsAllowed => "hits_allowed",
            PropType::WalksAllowed => "walks_allowed",
            PropType::EarnedRuns => "earned_runs",
            PropType::PitcherWins => "pitcher_wins",
            PropType::Saves => "saves",
            PropType::PassingYards => "passing_yards",
            PropType::PassingTouchdowns => "passing_touchdowns",
            PropType::RushingYards => "rushing_yards",
            PropType::ReceivingYards => "receiving_yards",
            PropType::Receptions => "receptions",
            PropType::InterceptionsThrown => "interceptions_thrown",
            PropType::Goals => "goals",
            PropType::HockeyAssists => "hockey_assists",
            PropType::ShotsOnGoal => "shots_on_goal",
            PropType::GoalieSaves => "goalie_saves",
            PropType::TeamTotalRuns => "team_total_runs",
            PropType::TeamTotalPoints => "team_total_points",
            PropType::TeamTotalGoals => "team_total_goals",
            PropType::Unknown => "unknown",
        }
    }

    /// True for team-scoped totals, which bypass position filtering.
    pub fn is_team_total(&self) -> bool {
        matches!(
            self,
            PropType::TeamTotalRuns | PropType::TeamTotalPoints | PropType::TeamTotalGoals
        )
    }
}

impl FromStr for PropType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown prop type '{s}'"))
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled/live/final game as reported by a provider, already reduced to
/// the fields the pipeline cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub sport: Sport,
    pub home_team: String,
    pub away_team: String,
    pub start_ts: DateTime<Utc>,
    pub status: GameStatus,
}

/// Provider-shaped prop record, produced by a provider client after wire
/// decoding and nothing else. Payout fields keep whatever encoding the
/// provider used; the normalizer sorts that out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProp {
    pub provider_id: String,
    pub external_prop_id: String,
    pub external_player_id: String,
    pub player_name: String,
    /// Provider-native team naming; may be a full name.
    pub team_code: String,
    /// Sport-specific position code. "TEAM" for team props, may be empty.
    pub position: String,
    /// Provider-native category string, e.g. "PTS" or "Player Points".
    pub prop_category: String,
    pub line_value: f64,
    pub payout_type: PayoutType,
    pub over_odds: Option<f64>,
    pub under_odds: Option<f64>,
    /// Provider flagged this offering as a promotional boost.
    #[serde(default)]
    pub boost_flagged: bool,
    pub updated_ts: DateTime<Utc>,
    pub sport: Sport,
    pub game_id: String,
    pub game_status: GameStatus,
    pub game_start_ts: DateTime<Utc>,
}

/// Canonical payout schema. Multipliers are decimal-odds form rounded to
/// three decimals (half-to-even) at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutSchema {
    #[serde(rename = "type")]
    pub payout_type: PayoutType,
    pub variant_code: PayoutVariant,
    pub over_multiplier: f64,
    pub under_multiplier: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boost_multiplier: Option<f64>,
    /// Original provider encoding, preserved for traceability.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_format: BTreeMap<String, String>,
    /// Set when the encoding was guessed or one side was synthesized.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub low_confidence: bool,
}

/// Identity of the player (or team) a prop is attached to. Not part of the
/// line hash; two providers can disagree on player ids and still collide or
/// diverge purely on offering shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKey {
    Player {
        external_player_id: String,
        provider_id: String,
    },
    Team {
        team_code: String,
        provider_id: String,
    },
}

/// Content address of a canonical offering: SHA-256 over the fixed-order
/// canonical fields. Serialized as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineHash(pub [u8; 32]);

impl LineHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, String> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid line hash: {e}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "invalid line hash: expected 32 bytes".to_string())?;
        Ok(LineHash(arr))
    }
}

impl fmt::Display for LineHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for LineHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for LineHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LineHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        LineHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The pipeline's normalized prop record. `line_hash` is the sole identity;
/// consumers must never key off player name, team and line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalProp {
    pub line_hash: LineHash,
    pub prop_type: PropType,
    pub sport: Sport,
    pub subject: SubjectKey,
    pub player_name: String,
    /// Normalized short code ("SF", "PIT") when the team table resolved it,
    /// otherwise the provider-native string preserved as-is.
    pub team_code: String,
    /// True when the team table had no entry and `team_code` is raw.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub team_unresolved: bool,
    /// Preserved provider position code; "1" is the pitcher in baseball.
    pub position: String,
    pub offered_line: f64,
    pub payout: PayoutSchema,
    pub provider_id: String,
    pub external_prop_id: String,
    pub game_id: String,
    pub game_status: GameStatus,
    pub game_start_ts: DateTime<Utc>,
    /// Assigned from a monotonic clock at hash time.
    pub ingested_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
}

impl CanonicalProp {
    /// Whether this prop is visible on the default query surface.
    pub fn default_visible(&self) -> bool {
        self.game_status == GameStatus::Scheduled && self.prop_type != PropType::Unknown
    }
}
