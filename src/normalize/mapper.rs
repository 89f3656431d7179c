//! Prop mapper: RawProp -> CanonicalProp.
//!
//! Resolves the team code, classifies the category, normalizes the payout
//! and computes the line hash. The hash covers the offering shape only
//! (prop type, line at one decimal, payout schema at three) in a fixed
//! input order; re-mapping an identical raw record always reproduces the
//! same hash.

use crate::models::{
    CanonicalProp, LineHash, PropType, RawProp, SubjectKey,
};
use crate::normalize::payout::{PayoutError, PayoutNormalizer};
use crate::normalize::positions::TEAM_POSITION;
use crate::normalize::round_dp;
use crate::normalize::taxonomy::TaxonomyService;
use crate::normalize::teams::TeamTable;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("invalid line {line} for category '{category}'")]
    InvalidLine { line: f64, category: String },
    #[error(transparent)]
    Payout(#[from] PayoutError),
}

impl MappingError {
    pub fn kind(&self) -> &'static str {
        match self {
            MappingError::InvalidLine { .. } => "invalid_line",
            MappingError::Payout(PayoutError::InsufficientPayoutData) => "insufficient_payout_data",
            MappingError::Payout(PayoutError::NonFiniteOdds(_)) => "non_finite_odds",
        }
    }
}

/// Monotonic wall-clock for `ingested_ts`: never repeats, never goes
/// backwards, even when the system clock does.
#[derive(Debug)]
pub struct IngestClock {
    last_micros: AtomicI64,
}

impl Default for IngestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestClock {
    pub fn new() -> Self {
        Self {
            last_micros: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last_micros.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self.last_micros.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Utc
                        .timestamp_micros(next)
                        .single()
                        .unwrap_or_else(Utc::now)
                }
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Compute the content address over the canonical fields, in their fixed
/// order. `offered_line` must already be the raw offered line; rounding to
/// one decimal happens here so callers can't disagree about it.
pub fn compute_line_hash(
    prop_type: PropType,
    offered_line: f64,
    payout: &crate::models::PayoutSchema,
) -> LineHash {
    let boost = match payout.boost_multiplier {
        Some(b) => format!("{:.3}", b),
        None => "-".to_string(),
    };
    let preimage = format!(
        "{}|{:.1}|{}|{}|{:.3}|{:.3}|{}",
        prop_type.as_str(),
        round_dp(offered_line, 1),
        payout.payout_type.as_str(),
        payout.variant_code.as_str(),
        payout.over_multiplier,
        payout.under_multiplier,
        boost,
    );

    let digest = Sha256::digest(preimage.as_bytes());
    LineHash(digest.into())
}

pub struct PropMapper {
    taxonomy: Arc<TaxonomyService>,
    teams: Arc<TeamTable>,
    payout: Arc<PayoutNormalizer>,
    clock: Arc<IngestClock>,
}

impl PropMapper {
    pub fn new(
        taxonomy: Arc<TaxonomyService>,
        teams: Arc<TeamTable>,
        payout: Arc<PayoutNormalizer>,
        clock: Arc<IngestClock>,
    ) -> Self {
        Self {
            taxonomy,
            teams,
            payout,
            clock,
        }
    }

    /// Map one raw record. A taxonomy miss is not an error: the prop is
    /// ingested as `Unknown` and stays off the default query surface until
    /// the mapping lands. Payout and line problems drop the prop.
    pub fn map(&self, raw: &RawProp) -> Result<CanonicalProp, MappingError> {
        if !raw.line_value.is_finite() || raw.line_value < 0.0 {
            return Err(MappingError::InvalidLine {
                line: raw.line_value,
                category: raw.prop_category.clone(),
            });
        }

        let team = self.teams.resolve(raw.sport, &raw.team_code);
        if !team.resolved {
            warn!(
                provider = %raw.provider_id,
                sport = %raw.sport,
                team = %raw.team_code,
                "unknown_team_preserved"
            );
        }

        let prop_type = self
            .taxonomy
            .resolve(&raw.provider_id, &raw.prop_category, raw.sport);

        let payout = self.payout.normalize(raw, prop_type)?;
        let line_hash = compute_line_hash(prop_type, raw.line_value, &payout);

        let subject = if raw.position.eq_ignore_ascii_case(TEAM_POSITION) {
            SubjectKey::Team {
                team_code: team.code.clone(),
                provider_id: raw.provider_id.clone(),
            }
        } else {
            SubjectKey::Player {
                external_player_id: raw.external_player_id.clone(),
                provider_id: raw.provider_id.clone(),
            }
        };

        Ok(CanonicalProp {
            line_hash,
            prop_type,
            sport: raw.sport,
            subject,
            player_name: raw.player_name.clone(),
            team_code: team.code,
            team_unresolved: !team.resolved,
            position: raw.position.clone(),
            offered_line: round_dp(raw.line_value, 1),
            payout,
            provider_id: raw.provider_id.clone(),
            external_prop_id: raw.external_prop_id.clone(),
            game_id: raw.game_id.clone(),
            game_status: raw.game_status,
            game_start_ts: raw.game_start_ts,
            ingested_ts: self.clock.now(),
            updated_ts: raw.updated_ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameStatus, PayoutType, Sport};

    fn mapper() -> PropMapper {
        PropMapper::new(
            Arc::new(TaxonomyService::new(None).unwrap()),
            Arc::new(TeamTable::new()),
            Arc::new(PayoutNormalizer::default()),
            Arc::new(IngestClock::new()),
        )
    }

    fn raw_points(provider: &str, over: f64, under: f64, payout_type: PayoutType) -> RawProp {
        RawProp {
            provider_id: provider.to_string(),
            external_prop_id: "x1".to_string(),
            external_player_id: "lbj".to_string(),
            player_name: "LeBron James".to_string(),
            team_code: "Los Angeles Lakers".to_string(),
            position: "F".to_string(),
            prop_category: "PTS".to_string(),
            line_value: 25.5,
            payout_type,
            over_odds: Some(over),
            under_odds: Some(under),
            boost_flagged: false,
            updated_ts: Utc::now(),
            sport: Sport::Nba,
            game_id: "g1".to_string(),
            game_status: GameStatus::Scheduled,
            game_start_ts: Utc::now(),
        }
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = mapper();
        let raw = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        let first = mapper.map(&raw).unwrap();
        let second = mapper.map(&raw).unwrap();
        assert_eq!(first.line_hash, second.line_hash);
        // ingested_ts is monotonic, not part of identity.
        assert!(second.ingested_ts > first.ingested_ts);
    }

    #[test]
    fn test_same_prop_different_payout_structures_diverge() {
        let mapper = mapper();
        // PrizePicks multipliers vs DraftKings american odds on the same
        // player, category and line.
        let pp = mapper
            .map(&raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier))
            .unwrap();
        let mut dk_raw = raw_points("draftkings", -110.0, 110.0, PayoutType::Standard);
        dk_raw.prop_category = "Player Points".to_string();
        let dk = mapper.map(&dk_raw).unwrap();

        assert_eq!(pp.prop_type, PropType::Points);
        assert_eq!(dk.prop_type, PropType::Points);
        assert_eq!(pp.offered_line, dk.offered_line);
        assert_ne!(pp.line_hash, dk.line_hash);
        assert_eq!(pp.payout.over_multiplier, 3.000);
        assert_eq!(dk.payout.over_multiplier, 1.909);
    }

    #[test]
    fn test_line_rounds_to_one_decimal_for_hashing() {
        let mapper = mapper();
        let mut a = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        a.line_value = 25.49;
        let mut b = a.clone();
        b.line_value = 25.5;
        let mut c = a.clone();
        c.line_value = 25.44;

        let a = mapper.map(&a).unwrap();
        let b = mapper.map(&b).unwrap();
        let c = mapper.map(&c).unwrap();
        assert_eq!(a.offered_line, 25.5);
        assert_eq!(a.line_hash, b.line_hash);
        assert_eq!(c.offered_line, 25.4);
        assert_ne!(a.line_hash, c.line_hash);
    }

    #[test]
    fn test_boost_changes_hash() {
        let mapper = mapper();
        let plain = mapper
            .map(&raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier))
            .unwrap();
        let mut boosted_raw = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        boosted_raw.boost_flagged = true;
        let boosted = mapper.map(&boosted_raw).unwrap();
        assert_ne!(plain.line_hash, boosted.line_hash);
    }

    #[test]
    fn test_every_hash_component_is_significant() {
        use crate::models::{PayoutSchema, PayoutVariant};

        let base = PayoutSchema {
            payout_type: PayoutType::Standard,
            variant_code: PayoutVariant::Moneyline,
            over_multiplier: 1.909,
            under_multiplier: 1.909,
            boost_multiplier: None,
            provider_format: Default::default(),
            low_confidence: false,
        };
        let reference = compute_line_hash(PropType::Points, 25.5, &base);

        let mut other_under = base.clone();
        other_under.under_multiplier = 1.833;
        assert_ne!(reference, compute_line_hash(PropType::Points, 25.5, &other_under));

        let mut other_variant = base.clone();
        other_variant.variant_code = PayoutVariant::Decimal;
        assert_ne!(reference, compute_line_hash(PropType::Points, 25.5, &other_variant));

        let mut other_type = base.clone();
        other_type.payout_type = PayoutType::Flex;
        assert_ne!(reference, compute_line_hash(PropType::Points, 25.5, &other_type));

        assert_ne!(reference, compute_line_hash(PropType::Assists, 25.5, &base));
        assert_ne!(reference, compute_line_hash(PropType::Points, 26.5, &base));

        // Non-hash fields don't matter: provider_format and confidence are
        // traceability, not identity.
        let mut annotated = base.clone();
        annotated.low_confidence = true;
        annotated
            .provider_format
            .insert("over_odds".to_string(), "-110".to_string());
        assert_eq!(reference, compute_line_hash(PropType::Points, 25.5, &annotated));
    }

    #[test]
    fn test_invalid_line_rejected() {
        let mapper = mapper();
        let mut raw = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        raw.line_value = -0.5;
        assert!(matches!(
            mapper.map(&raw),
            Err(MappingError::InvalidLine { .. })
        ));

        raw.line_value = f64::NAN;
        assert!(mapper.map(&raw).is_err());
    }

    #[test]
    fn test_unknown_category_ingests_as_unknown() {
        let mapper = mapper();
        let mut raw = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        raw.sport = Sport::Mlb;
        raw.prop_category = "Pitcher Outs Recorded".to_string();
        raw.team_code = "New York Yankees".to_string();
        let prop = mapper.map(&raw).unwrap();
        assert_eq!(prop.prop_type, PropType::Unknown);
        assert!(!prop.default_visible());
    }

    #[test]
    fn test_team_prop_gets_team_subject() {
        let mapper = mapper();
        let mut raw = raw_points("draftkings", -110.0, -110.0, PayoutType::Standard);
        raw.position = "TEAM".to_string();
        raw.sport = Sport::Mlb;
        raw.team_code = "Pittsburgh Pirates".to_string();
        raw.prop_category = "Team Total Runs".to_string();
        let prop = mapper.map(&raw).unwrap();
        assert_eq!(prop.prop_type, PropType::TeamTotalRuns);
        assert_eq!(prop.team_code, "PIT");
        assert!(matches!(prop.subject, SubjectKey::Team { .. }));
    }

    #[test]
    fn test_unknown_team_preserved_raw() {
        let mapper = mapper();
        let mut raw = raw_points("prizepicks", 3.0, 2.5, PayoutType::Multiplier);
        raw.team_code = "Springfield Isotopes".to_string();
        let prop = mapper.map(&raw).unwrap();
        assert!(prop.team_unresolved);
        assert_eq!(prop.team_code, "Springfield Isotopes");
    }

    #[test]
    fn test_ingest_clock_monotonic() {
        let clock = IngestClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
    }
}
