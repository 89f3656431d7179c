//! PrizePicks provider client.
//!
//! PrizePicks serves a JSON:API-style payload: `data` holds projections,
//! `included` holds the player records they reference. Payouts are direct
//! multipliers; flex and demon/goblin style offerings arrive as
//! `odds_type` plus per-side multipliers, promos as a `boost` flag.

use crate::models::{Game, GameStatus, MarketType, PayoutType, RawProp, Sport};
use crate::providers::circuit::{CircuitConfig, CircuitSnapshot};
use crate::providers::http::{ProviderHttp, RetryPolicy};
use crate::providers::{ProviderClient, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.prizepicks.com";

pub const PROVIDER_ID: &str = "prizepicks";

fn league_id(sport: Sport) -> &'static str {
    match sport {
        Sport::Mlb => "2",
        Sport::Nba => "7",
        Sport::Nfl => "9",
        Sport::Nhl => "8",
    }
}

#[derive(Debug, Deserialize)]
struct GamesResponse {
    data: Vec<GameResource>,
}

#[derive(Debug, Deserialize)]
struct GameResource {
    id: String,
    attributes: GameAttributes,
}

#[derive(Debug, Deserialize)]
struct GameAttributes {
    home_team: String,
    away_team: String,
    start_time: DateTime<Utc>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ProjectionsResponse {
    data: Vec<ProjectionResource>,
    #[serde(default)]
    included: Vec<IncludedResource>,
}

#[derive(Debug, Deserialize)]
struct ProjectionResource {
    id: String,
    attributes: ProjectionAttributes,
    relationships: ProjectionRelationships,
}

#[derive(Debug, Deserialize)]
struct ProjectionAttributes {
    stat_type: String,
    line_score: f64,
    odds_type: String,
    #[serde(default)]
    over_multiplier: Option<f64>,
    #[serde(default)]
    under_multiplier: Option<f64>,
    #[serde(default)]
    boost: bool,
    updated_at: DateTime<Utc>,
    game_id: String,
    game_status: String,
    game_start: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ProjectionRelationships {
    new_player: RelationshipData,
}

#[derive(Debug, Deserialize)]
struct RelationshipData {
    data: ResourceRef,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum IncludedResource {
    #[serde(rename = "new_player")]
    Player {
        id: String,
        attributes: PlayerAttributes,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct PlayerAttributes {
    display_name: String,
    team: String,
    position: String,
}

fn parse_game_status(raw: &str) -> GameStatus {
    match raw.to_ascii_lowercase().as_str() {
        "live" | "in_progress" => GameStatus::Live,
        "final" | "complete" => GameStatus::Final,
        _ => GameStatus::Scheduled,
    }
}

fn parse_payout_type(odds_type: &str, boost: bool) -> PayoutType {
    if boost {
        return PayoutType::Boost;
    }
    match odds_type.to_ascii_lowercase().as_str() {
        "flex" => PayoutType::Flex,
        "standard" => PayoutType::Standard,
        _ => PayoutType::Multiplier,
    }
}

pub struct PrizePicksClient {
    http: ProviderHttp,
    base_url: String,
}

impl PrizePicksClient {
    pub fn new(
        timeout: Duration,
        circuit_config: CircuitConfig,
    ) -> anyhow::Result<Self> {
        let base_url = std::env::var("PRIZEPICKS_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let requests_per_minute = std::env::var("PRIZEPICKS_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            http: ProviderHttp::new(
                PROVIDER_ID,
                requests_per_minute,
                timeout,
                RetryPolicy::default(),
                circuit_config,
            )?,
            base_url,
        })
    }
}

#[async_trait]
impl ProviderClient for PrizePicksClient {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_scheduled_games(&self, sport: Sport) -> Result<Vec<Game>, ProviderError> {
        let url = format!("{}/games", self.base_url);
        let response: GamesResponse = self
            .http
            .get_json(&url, &[("league_id", league_id(sport).to_string())])
            .await?;

        let games = response
            .data
            .into_iter()
            .filter(|g| parse_game_status(&g.attributes.status) == GameStatus::Scheduled)
            .map(|g| Game {
                game_id: g.id,
                sport,
                home_team: g.attributes.home_team,
                away_team: g.attributes.away_team,
                start_ts: g.attributes.start_time,
                status: GameStatus::Scheduled,
            })
            .collect::<Vec<_>>();

        debug!(sport = %sport, games = games.len(), "prizepicks_games_fetched");
        Ok(games)
    }

    async fn fetch_props(
        &self,
        sport: Sport,
        game_ids: &[String],
        market: MarketType,
    ) -> Result<Vec<RawProp>, ProviderError> {
        let url = format!("{}/projections", self.base_url);
        let response: ProjectionsResponse = self
            .http
            .get_json(
                &url,
                &[
                    ("league_id", league_id(sport).to_string()),
                    ("market", market.as_str().to_string()),
                    ("per_page", "250".to_string()),
                ],
            )
            .await?;

        let players: HashMap<String, PlayerAttributes> = response
            .included
            .into_iter()
            .filter_map(|r| match r {
                IncludedResource::Player { id, attributes } => Some((id, attributes)),
                IncludedResource::Other => None,
            })
            .collect();

        let mut props = Vec::with_capacity(response.data.len());
        for projection in response.data {
            if !game_ids.is_empty() && !game_ids.contains(&projection.attributes.game_id) {
                continue;
            }
            let player_id = projection.relationships.new_player.data.id;
            let Some(player) = players.get(&player_id) else {
                debug!(projection = %projection.id, player = %player_id, "prizepicks_player_missing");
                continue;
            };

            let attrs = projection.attributes;
            props.push(RawProp {
                provider_id: PROVIDER_ID.to_string(),
                external_prop_id: projection.id,
                external_player_id: player_id,
                player_name: player.display_name.clone(),
                team_code: player.team.clone(),
                position: player.position.clone(),
                prop_category: attrs.stat_type,
                line_value: attrs.line_score,
                payout_type: parse_payout_type(&attrs.odds_type, attrs.boost),
                over_odds: attrs.over_multiplier,
                under_odds: attrs.under_multiplier,
                boost_flagged: attrs.boost,
                updated_ts: attrs.updated_at,
                sport,
                game_id: attrs.game_id,
                game_status: parse_game_status(&attrs.game_status),
                game_start_ts: attrs.game_start,
            });
        }

        Ok(props)
    }

    fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.http.circuit().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_payload_decodes() {
        let payload = r#"{
            "data": [{
                "id": "proj-1",
                "attributes": {
                    "stat_type": "PTS",
                    "line_score": 25.5,
                    "odds_type": "flex",
                    "over_multiplier": 3.0,
                    "under_multiplier": 2.5,
                    "boost": false,
                    "updated_at": "2026-04-01T17:00:00Z",
                    "game_id": "g-10",
                    "game_status": "scheduled",
                    "game_start": "2026-04-01T23:10:00Z"
                },
                "relationships": {
                    "new_player": {"data": {"id": "pl-7", "type": "new_player"}}
                }
            }],
            "included": [{
                "type": "new_player",
                "id": "pl-7",
                "attributes": {
                    "display_name": "LeBron James",
                    "team": "Los Angeles Lakers",
                    "position": "F"
                }
            }]
        }"#;

        let decoded: ProjectionsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded.data.len(), 1);
        assert_eq!(decoded.data[0].attributes.line_score, 25.5);
        assert!(matches!(
            decoded.included[0],
            IncludedResource::Player { .. }
        ));
    }

    #[test]
    fn test_unknown_included_types_tolerated() {
        let payload = r#"{
            "data": [],
            "included": [{"type": "league", "id": "7"}]
        }"#;
        let decoded: ProjectionsResponse = serde_json::from_str(payload).unwrap();
        assert!(matches!(decoded.included[0], IncludedResource::Other));
    }

    #[test]
    fn test_payout_type_parsing() {
        assert_eq!(parse_payout_type("flex", false), PayoutType::Flex);
        assert_eq!(parse_payout_type("standard", false), PayoutType::Standard);
        assert_eq!(parse_payout_type("multiplier", false), PayoutType::Multiplier);
        assert_eq!(parse_payout_type("flex", true), PayoutType::Boost);
    }
}
