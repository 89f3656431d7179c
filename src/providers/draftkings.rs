//! DraftKings provider client.
//!
//! The sportsbook API groups markets as eventgroup -> category ->
//! subcategory; offers nest per event with Over/Under outcomes quoting
//! american odds as signed strings ("+150", "-110", "EVEN"). Everything
//! decodes here into `RawProp`; interior stages never see DK shapes.

use crate::models::{Game, GameStatus, MarketType, PayoutType, RawProp, Sport};
use crate::providers::circuit::{CircuitConfig, CircuitSnapshot};
use crate::providers::http::{ProviderHttp, RetryPolicy};
use crate::providers::{ProviderClient, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://sportsbook-nash.draftkings.com/sites/US-SB/api/v5";

pub const PROVIDER_ID: &str = "draftkings";

/// (event group, player-prop category, team-prop category) per sport.
fn event_group(sport: Sport) -> (u64, u64, u64) {
    match sport {
        Sport::Mlb => (84240, 743, 525),
        Sport::Nba => (42648, 1215, 487),
        Sport::Nfl => (88808, 1000, 492),
        Sport::Nhl => (42133, 1189, 550),
    }
}

/// "+150" -> 150.0, "-180" -> -180.0, "EVEN" -> 100.0.
fn parse_american_odds(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("EVEN") {
        return Some(100.0);
    }
    s.parse::<f64>().ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventGroupResponse {
    event_group: EventGroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventGroup {
    #[serde(default)]
    events: Vec<DkEvent>,
    #[serde(default)]
    offer_categories: Vec<OfferCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DkEvent {
    event_id: u64,
    team_name1: String,
    team_name2: String,
    start_date: DateTime<Utc>,
    event_status: EventStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventStatus {
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferCategory {
    #[serde(default)]
    offer_subcategory_descriptors: Vec<SubcategoryDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubcategoryDescriptor {
    #[serde(default)]
    offer_subcategory: Option<OfferSubcategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferSubcategory {
    name: String,
    /// DK nests offers as one list per event.
    #[serde(default)]
    offers: Vec<Vec<Offer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Offer {
    provider_offer_id: String,
    event_id: u64,
    label: String,
    #[serde(default)]
    is_promotion: bool,
    #[serde(default)]
    outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Outcome {
    label: String,
    odds_american: String,
    #[serde(default)]
    line: Option<f64>,
    #[serde(default)]
    participant: Option<String>,
    #[serde(default)]
    participant_id: Option<String>,
    #[serde(default)]
    participant_team: Option<String>,
}

fn parse_event_state(state: &str) -> GameStatus {
    match state.to_ascii_lowercase().as_str() {
        "started" | "live" | "inprogress" => GameStatus::Live,
        "completed" | "final" => GameStatus::Final,
        _ => GameStatus::Scheduled,
    }
}

pub struct DraftKingsClient {
    http: ProviderHttp,
    base_url: String,
}

impl DraftKingsClient {
    pub fn new(
        timeout: Duration,
        circuit_config: CircuitConfig,
    ) -> anyhow::Result<Self> {
        let base_url = std::env::var("DRAFTKINGS_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let requests_per_minute = std::env::var("DRAFTKINGS_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

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

    async fn fetch_group(
        &self,
        sport: Sport,
        category: u64,
    ) -> Result<EventGroupResponse, ProviderError> {
        let (group, _, _) = event_group(sport);
        let url = format!(
            "{}/eventgroups/{}/categories/{}",
            self.base_url, group, category
        );
        self.http
            .get_json(&url, &[("format", "json".to_string())])
            .await
    }
}

#[async_trait]
impl ProviderClient for DraftKingsClient {
    fn provider_id(&self) -> &'static str {
        PROVIDER_ID
    }

    async fn fetch_scheduled_games(&self, sport: Sport) -> Result<Vec<Game>, ProviderError> {
        let (group, _, _) = event_group(sport);
        let url = format!("{}/eventgroups/{}", self.base_url, group);
        let response: EventGroupResponse = self
            .http
            .get_json(&url, &[("format", "json".to_string())])
            .await?;

        let games = response
            .event_group
            .events
            .into_iter()
            .filter(|e| parse_event_state(&e.event_status.state) == GameStatus::Scheduled)
            .map(|e| Game {
                game_id: e.event_id.to_string(),
                sport,
                home_team: e.team_name2,
                away_team: e.team_name1,
                start_ts: e.start_date,
                status: GameStatus::Scheduled,
            })
            .collect::<Vec<_>>();

        debug!(sport = %sport, games = games.len(), "draftkings_games_fetched");
        Ok(games)
    }

    async fn fetch_props(
        &self,
        sport: Sport,
        game_ids: &[String],
        market: MarketType,
    ) -> Result<Vec<RawProp>, ProviderError> {
        let (_, player_category, team_category) = event_group(sport);
        let category = match market {
            MarketType::PlayerProps => player_category,
            MarketType::TeamProps => team_category,
        };
        let response = self.fetch_group(sport, category).await?;

        let events: std::collections::HashMap<u64, &DkEvent> = response
            .event_group
            .events
            .iter()
            .map(|e| (e.event_id, e))
            .collect();

        let mut props = Vec::new();
        for category in &response.event_group.offer_categories {
            for descriptor in &category.offer_subcategory_descriptors {
                let Some(subcategory) = &descriptor.offer_subcategory else {
                    continue;
                };
                for offer in subcategory.offers.iter().flatten() {
                    let game_id = offer.event_id.to_string();
                    if !game_ids.is_empty() && !game_ids.contains(&game_id) {
                        continue;
                    }

                    let over = offer
                        .outcomes
                        .iter()
                        .find(|o| o.label.eq_ignore_ascii_case("over"));
                    let under = offer
                        .outcomes
                        .iter()
                        .find(|o| o.label.eq_ignore_ascii_case("under"));
                    let Some(line) = over.and_then(|o| o.line).or(under.and_then(|o| o.line))
                    else {
                        debug!(offer = %offer.provider_offer_id, "draftkings_offer_without_line");
                        continue;
                    };

                    let reference = over.or(under);
                    let (game_status, game_start_ts) = match events.get(&offer.event_id) {
                        Some(event) => (
                            parse_event_state(&event.event_status.state),
                            event.start_date,
                        ),
                        None => (GameStatus::Scheduled, Utc::now()),
                    };

                    let is_team_market = market == MarketType::TeamProps;
                    props.push(RawProp {
                        provider_id: PROVIDER_ID.to_string(),
                        external_prop_id: offer.provider_offer_id.clone(),
                        external_player_id: reference
                            .and_then(|o| o.participant_id.clone())
                            .unwrap_or_default(),
                        player_name: reference
                            .and_then(|o| o.participant.clone())
                            .unwrap_or_else(|| offer.label.clone()),
                        team_code: reference
                            .and_then(|o| o.participant_team.clone())
                            .unwrap_or_default(),
                        // DK does not expose player positions; the position
                        // filter preserves missing positions by design.
                        position: if is_team_market {
                            "TEAM".to_string()
                        } else {
                            String::new()
                        },
                        prop_category: subcategory.name.clone(),
                        line_value: line,
                        payout_type: PayoutType::Standard,
                        over_odds: over.and_then(|o| parse_american_odds(&o.odds_american)),
                        under_odds: under.and_then(|o| parse_american_odds(&o.odds_american)),
                        boost_flagged: offer.is_promotion,
                        updated_ts: Utc::now(),
                        sport,
                        game_id,
                        game_status,
                        game_start_ts,
                    });
                }
            }
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
    fn test_parse_american_odds() {
        assert_eq!(parse_american_odds("+150"), Some(150.0));
        assert_eq!(parse_american_odds("-180"), Some(-180.0));
        assert_eq!(parse_american_odds("EVEN"), Some(100.0));
        assert_eq!(parse_american_odds("n/a"), None);
    }

    #[test]
    fn test_event_group_payload_decodes() {
        let payload = r#"{
            "eventGroup": {
                "events": [{
                    "eventId": 101,
                    "teamName1": "Boston Celtics",
                    "teamName2": "Los Angeles Lakers",
                    "startDate": "2026-04-01T23:10:00Z",
                    "eventStatus": {"state": "NOT_STARTED"}
                }],
                "offerCategories": [{
                    "offerSubcategoryDescriptors": [{
                        "offerSubcategory": {
                            "name": "Player Points",
                            "offers": [[{
                                "providerOfferId": "o-1",
                                "eventId": 101,
                                "label": "LeBron James Points",
                                "outcomes": [
                                    {"label": "Over", "oddsAmerican": "-110", "line": 25.5,
                                     "participant": "LeBron James", "participantId": "dk-23",
                                     "participantTeam": "Los Angeles Lakers"},
                                    {"label": "Under", "oddsAmerican": "+110", "line": 25.5,
                                     "participant": "LeBron James", "participantId": "dk-23",
                                     "participantTeam": "Los Angeles Lakers"}
                                ]
                            }]]
                        }
                    }]
                }]
            }
        }"#;

        let decoded: EventGroupResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(decoded.event_group.events.len(), 1);
        let offers = &decoded.event_group.offer_categories[0].offer_subcategory_descriptors[0]
            .offer_subcategory
            .as_ref()
            .unwrap()
            .offers;
        assert_eq!(offers[0][0].outcomes.len(), 2);
        assert_eq!(offers[0][0].outcomes[0].line, Some(25.5));
    }

    #[test]
    fn test_event_state_mapping() {
        assert_eq!(parse_event_state("NOT_STARTED"), GameStatus::Scheduled);
        assert_eq!(parse_event_state("STARTED"), GameStatus::Live);
        assert_eq!(parse_event_state("COMPLETED"), GameStatus::Final);
    }
}
