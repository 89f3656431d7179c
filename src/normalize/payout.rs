//! Payout normalization.
//!
//! Converts provider-specific payout encodings (direct multipliers, american
//! moneyline, decimal odds) into the canonical `PayoutSchema`. Detection
//! runs in a fixed order so the same raw record always lands on the same
//! variant, which in turn keeps the line hash stable.

use crate::models::{PayoutSchema, PayoutType, PayoutVariant, PropType, RawProp};
use crate::normalize::round_dp;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

/// Assumed vig when synthesizing a missing side from implied probability.
const DEFAULT_VIG: f64 = 0.05;

/// Boost trips when the over multiplier exceeds this factor times the
/// rolling 24h median for the prop type.
const DEFAULT_BOOST_FACTOR: f64 = 1.3;

/// Minimum baseline observations before the boost heuristic may fire.
const BOOST_MIN_SAMPLES: usize = 10;

/// Cap per prop type so the baseline window stays bounded under bursts.
const BASELINE_WINDOW_CAP: usize = 4096;

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("insufficient payout data: both over and under odds missing")]
    InsufficientPayoutData,
    #[error("non-finite odds value {0}")]
    NonFiniteOdds(f64),
}

fn in_multiplier_range(v: f64) -> bool {
    (1.0..=100.0).contains(&v)
}

fn looks_american(v: f64) -> bool {
    v.fract() == 0.0 && v.abs() >= 100.0
}

fn in_decimal_range(v: f64) -> bool {
    v > 1.0 && v < 50.0
}

/// Convert a single american odds value to a decimal multiplier.
fn american_to_multiplier(v: f64) -> f64 {
    if v >= 0.0 {
        1.0 + v / 100.0
    } else {
        1.0 + 100.0 / v.abs()
    }
}

/// Last-resort per-side conversion when the pair matched no format.
fn heuristic_multiplier(v: f64) -> f64 {
    if v.abs() >= 100.0 {
        american_to_multiplier(v)
    } else {
        v
    }
}

/// Rolling 24h over-multiplier baseline per prop type, used by the boost
/// heuristic. Shared across provider cycles; short critical sections only.
#[derive(Debug, Default)]
pub struct BoostBaseline {
    windows: Mutex<HashMap<PropType, VecDeque<(DateTime<Utc>, f64)>>>,
}

impl BoostBaseline {
    /// Record an observation and return the current median, if enough
    /// samples exist. The new observation is excluded from its own median.
    fn observe(&self, prop_type: PropType, multiplier: f64, now: DateTime<Utc>) -> Option<f64> {
        let mut windows = self.windows.lock();
        let window = windows.entry(prop_type).or_default();

        let cutoff = now - Duration::hours(24);
        while window.front().is_some_and(|(ts, _)| *ts < cutoff) {
            window.pop_front();
        }

        let median = if window.len() >= BOOST_MIN_SAMPLES {
            let mut values: Vec<f64> = window.iter().map(|(_, v)| *v).collect();
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            Some(if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            })
        } else {
            None
        };

        window.push_back((now, multiplier));
        if window.len() > BASELINE_WINDOW_CAP {
            window.pop_front();
        }

        median
    }
}

/// Stateless conversion plus the shared boost baseline.
#[derive(Debug)]
pub struct PayoutNormalizer {
    baseline: BoostBaseline,
    boost_factor: f64,
}

impl Default for PayoutNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_BOOST_FACTOR)
    }
}

impl PayoutNormalizer {
    pub fn new(boost_factor: f64) -> Self {
        Self {
            baseline: BoostBaseline::default(),
            boost_factor,
        }
    }

    pub fn from_env() -> Self {
        let factor = std::env::var("BOOST_BASELINE_FACTOR")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|&v| v > 1.0)
            .unwrap_or(DEFAULT_BOOST_FACTOR);
        Self::new(factor)
    }

    /// Normalize the raw payout fields into a canonical schema.
    ///
    /// `prop_type` is already resolved by the taxonomy service; the boost
    /// baseline is keyed on it.
    pub fn normalize(&self, raw: &RawProp, prop_type: PropType) -> Result<PayoutSchema, PayoutError> {
        for odds in [raw.over_odds, raw.under_odds].into_iter().flatten() {
            if !odds.is_finite() {
                return Err(PayoutError::NonFiniteOdds(odds));
            }
        }

        let mut provider_format = BTreeMap::new();
        provider_format.insert("payout_type".to_string(), raw.payout_type.as_str().to_string());
        if let Some(o) = raw.over_odds {
            provider_format.insert("over_odds".to_string(), o.to_string());
        }
        if let Some(u) = raw.under_odds {
            provider_format.insert("under_odds".to_string(), u.to_string());
        }

        let (over_raw, under_raw, variant, low_confidence) =
            match (raw.over_odds, raw.under_odds) {
                (None, None) => return Err(PayoutError::InsufficientPayoutData),
                (Some(over), Some(under)) => {
                    let (o, u, variant) = Self::detect_pair(raw.payout_type, over, under);
                    let low = variant == PayoutVariant::Mixed;
                    if low {
                        warn!(
                            provider = %raw.provider_id,
                            category = %raw.prop_category,
                            over,
                            under,
                            "payout_format_undetected"
                        );
                    }
                    (o, u, variant, low)
                }
                (Some(over), None) => {
                    let o = heuristic_multiplier(over);
                    let u = synthesize_other_side(o);
                    debug!(provider = %raw.provider_id, over, "payout_under_synthesized");
                    (o, u, PayoutVariant::Mixed, true)
                }
                (None, Some(under)) => {
                    let u = heuristic_multiplier(under);
                    let o = synthesize_other_side(u);
                    debug!(provider = %raw.provider_id, under, "payout_over_synthesized");
                    (o, u, PayoutVariant::Mixed, true)
                }
            };

        let over_multiplier = round_dp(over_raw, 3);
        let under_multiplier = round_dp(under_raw, 3);

        // Boost: explicit provider flag wins; otherwise compare the over
        // multiplier against the rolling baseline for this prop type.
        let median = self
            .baseline
            .observe(prop_type, over_multiplier, raw.updated_ts);
        let heuristic_boost = median.is_some_and(|m| over_multiplier > self.boost_factor * m);

        let (payout_type, boost_multiplier) = if raw.boost_flagged || heuristic_boost {
            (PayoutType::Boost, Some(over_multiplier))
        } else {
            (raw.payout_type, None)
        };

        Ok(PayoutSchema {
            payout_type,
            variant_code: variant,
            over_multiplier,
            under_multiplier,
            boost_multiplier,
            provider_format,
            low_confidence,
        })
    }

    /// Fixed-order format detection for a two-sided pair. Returns raw
    /// (unrounded) multipliers plus the detected variant.
    fn detect_pair(payout_type: PayoutType, over: f64, under: f64) -> (f64, f64, PayoutVariant) {
        let multiplier_family = matches!(
            payout_type,
            PayoutType::Multiplier | PayoutType::Flex | PayoutType::Boost
        );

        if multiplier_family && in_multiplier_range(over) && in_multiplier_range(under) {
            return (over, under, PayoutVariant::Multiplier);
        }
        if looks_american(over) && looks_american(under) {
            return (
                american_to_multiplier(over),
                american_to_multiplier(under),
                PayoutVariant::Moneyline,
            );
        }
        if in_decimal_range(over) && in_decimal_range(under) {
            return (over, under, PayoutVariant::Decimal);
        }

        (
            heuristic_multiplier(over),
            heuristic_multiplier(under),
            PayoutVariant::Mixed,
        )
    }
}

/// Given one side's decimal multiplier, derive the other from implied
/// probability under the assumed vig: 1/known + 1/other = 1 + vig.
fn synthesize_other_side(known_multiplier: f64) -> f64 {
    let implied_other = 1.0 + DEFAULT_VIG - 1.0 / known_multiplier.max(1.0);
    if implied_other <= 0.0 {
        return 1.0;
    }
    (1.0 / implied_other).max(1.0)
}
