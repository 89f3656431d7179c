//! Multi-tier cache: in-process L1 plus optional external L2.
//!
//! L1 is authoritative for this process; L2 is an optimistic shared cache
//! that other processes may warm from. Writes go L1-first with the L2
//! write detached and best-effort. Queries never leave L1.

pub mod l1;
pub mod l2;

pub use l1::{L1Cache, UpsertOutcome};
pub use l2::{CacheError, L2Cache};

use crate::metrics::PipelineMetrics;
use crate::models::{CanonicalProp, GameStatus, LineHash, PropType, Sport};
use crate::normalize::positions::PositionTable;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Filters for the read surface, applied in a fixed order: sport, status,
/// prop type, position compatibility, then pagination.
#[derive(Debug, Clone, Default)]
pub struct PropQuery {
    pub prop_types: Option<HashSet<PropType>>,
    /// Restrict to props whose raw position code is in this set.
    pub positions: Option<HashSet<String>>,
    /// Lift the position-compatibility filter (curation views).
    pub include_incompatible: bool,
    /// Offset pagination; ignored when `cursor` is present.
    pub page: usize,
    pub size: usize,
    /// Keyset pagination: resume strictly after this hash.
    pub cursor: Option<LineHash>,
}

#[derive(Debug, Clone)]
pub struct QueryPage {
    pub items: Vec<Arc<CanonicalProp>>,
    /// Best-effort: the sport index size at scan time, which may lag a
    /// cycle behind what a full filtered count would report.
    pub total: usize,
    pub next_cursor: Option<LineHash>,
}

pub struct CacheManager {
    l1: L1Cache,
    l2: Option<L2Cache>,
    positions: PositionTable,
    metrics: Arc<PipelineMetrics>,
    ttl_live: Duration,
    ttl_pregame: Duration,
}

impl CacheManager {
    pub fn new(
        capacity: usize,
        l2: Option<L2Cache>,
        positions: PositionTable,
        metrics: Arc<PipelineMetrics>,
        ttl_live: Duration,
        ttl_pregame: Duration,
    ) -> Self {
        Self {
            l1: L1Cache::new(capacity),
            l2,
            positions,
            metrics,
            ttl_live,
            ttl_pregame,
        }
    }

    pub fn ttl_for(&self, prop: &CanonicalProp) -> Duration {
        if prop.game_status == GameStatus::Live {
            self.ttl_live
        } else {
            self.ttl_pregame
        }
    }

    pub fn l2_attached(&self) -> bool {
        self.l2.is_some()
    }

    pub fn l2_pending_retries(&self) -> usize {
        self.l2.as_ref().map(|l2| l2.pending_retries()).unwrap_or(0)
    }

    /// L1 first; on miss consult L2 and repopulate L1 on a hit. L2 errors
    /// degrade to a miss.
    pub async fn get(&self, hash: &LineHash) -> Option<Arc<CanonicalProp>> {
        if let Some(prop) = self.l1.get(hash) {
            self.metrics.record_l1_hit();
            return Some(prop);
        }
        self.metrics.record_l1_miss();

        let l2 = self.l2.as_ref()?;
        match l2.get(hash).await {
            Ok(Some(prop)) => {
                self.metrics.record_l2_hit();
                let ttl = self.ttl_for(&prop);
                let prop = Arc::new(prop);
                self.l1.upsert(prop.clone(), ttl);
                Some(prop)
            }
            Ok(None) => {
                self.metrics.record_l2_miss();
                None
            }
            Err(e) => {
                self.metrics.record_l2_error();
                debug!(hash = %hash, error = %e, "l2_get_degraded_to_miss");
                None
            }
        }
    }

    /// Deduplicating write-through. L1 is written under the shard lock;
    /// the L2 write detaches so a slow or dead redis never blocks a cycle.
    pub fn upsert(&self, prop: Arc<CanonicalProp>) -> (UpsertOutcome, Option<LineHash>) {
        let ttl = self.ttl_for(&prop);
        let (outcome, superseded) = self.l1.upsert(prop.clone(), ttl);

        if let Some(l2) = self.l2.clone() {
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = l2.put(&prop, ttl).await {
                    metrics.record_l2_error();
                    debug!(hash = %prop.line_hash, error = %e, "l2_write_dropped");
                }
            });
        }

        (outcome, superseded)
    }

    pub async fn invalidate(&self, hash: &LineHash) {
        self.l1.remove(hash);
        if let Some(l2) = &self.l2 {
            l2.remove(std::slice::from_ref(hash)).await;
        }
    }

    pub async fn invalidate_sport(&self, sport: Sport) -> usize {
        let removed = self.l1.invalidate_sport(sport);
        if let Some(l2) = &self.l2 {
            l2.remove(&removed).await;
        }
        removed.len()
    }

    pub async fn invalidate_game(&self, game_id: &str) -> usize {
        let removed = self.l1.invalidate_game(game_id);
        if let Some(l2) = &self.l2 {
            l2.remove(&removed).await;
        }
        removed.len()
    }

    /// Replay recent store output into L1 (startup warming).
    pub fn warm(&self, props: Vec<CanonicalProp>) -> usize {
        let mut warmed = 0;
        for prop in props {
            let ttl = self.ttl_for(&prop);
            self.l1.upsert(Arc::new(prop), ttl);
            warmed += 1;
        }
        warmed
    }

    pub async fn drain_l2_retries(&self) -> usize {
        match &self.l2 {
            Some(l2) => l2.drain_retries().await,
            None => 0,
        }
    }

    fn visible(&self, sport: Sport, query: &PropQuery, prop: &CanonicalProp) -> bool {
        if prop.sport != sport {
            return false;
        }
        if prop.game_status != GameStatus::Scheduled {
            return false;
        }
        // Unknown types stay off the surface unless explicitly requested.
        let explicitly_unknown = query
            .prop_types
            .as_ref()
            .is_some_and(|set| set.contains(&PropType::Unknown));
        if prop.prop_type == PropType::Unknown && !explicitly_unknown {
            return false;
        }
        if let Some(types) = &query.prop_types {
            if !types.contains(&prop.prop_type) {
                return false;
            }
        }
        if let Some(positions) = &query.positions {
            if !positions.contains(prop.position.trim()) {
                return false;
            }
        }
        if !query.include_incompatible
            && !self
                .positions
                .compatible(prop.sport, &prop.position, prop.prop_type)
        {
            return false;
        }
        true
    }

    /// Scan the sport index in line-hash order with the filter chain
    /// applied, paginating by cursor (keyset) or page (offset).
    pub fn query(&self, sport: Sport, query: &PropQuery) -> QueryPage {
        let size = query.size.max(1);
        let total = self.l1.sport_len(sport);
        let hashes = self.l1.sport_hashes_after(sport, query.cursor);

        let mut to_skip = if query.cursor.is_none() {
            query.page.saturating_mul(size)
        } else {
            0
        };

        let mut items: Vec<Arc<CanonicalProp>> = Vec::with_capacity(size);
        let mut next_cursor = None;
        for hash in hashes {
            let Some(prop) = self.l1.get_visible(&hash) else {
                continue;
            };
            if !self.visible(sport, query, &prop) {
                continue;
            }
            if to_skip > 0 {
                to_skip -= 1;
                continue;
            }
            if items.len() == size {
                // One past the page: there is more.
                next_cursor = items.last().map(|p| p.line_hash);
                break;
            }
            items.push(prop);
        }

        QueryPage {
            items,
            total,
            next_cursor,
        }
    }

    /// All visible props for a game, hash-ordered.
    pub fn by_game(&self, game_id: &str) -> Vec<Arc<CanonicalProp>> {
        self.l1
            .game_hashes(game_id)
            .into_iter()
            .filter_map(|hash| self.l1.get_visible(&hash))
            .filter(|p| p.default_visible())
            .collect()
    }

    pub fn purge_expired(&self) -> usize {
        self.l1.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.l1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l1.is_empty()
    }
}
