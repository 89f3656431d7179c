//! In-process cache tier.
//!
//! Sharded by line hash (64 shards) so concurrent cycles rarely contend;
//! the per-shard lock doubles as the per-hash write serialization the
//! upsert contract requires. Secondary indices (sport, game, offer key)
//! support queries and targeted invalidation. Entries carry a TTL and an
//! LRU stamp; eviction prefers entries already close to expiry.

use crate::models::{CanonicalProp, LineHash, Sport};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const SHARD_COUNT: usize = 64;

/// Entries inside this fraction of their TTL are evicted preferentially.
const EVICTION_TTL_FRACTION: f64 = 0.25;

/// Outcome of a deduplicating upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Duplicate,
}

struct Entry {
    prop: Arc<CanonicalProp>,
    expires_at: Instant,
    ttl: Duration,
    last_touched: AtomicU64,
    superseded: bool,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn near_expiry(&self, now: Instant) -> bool {
        let remaining = self.expires_at.saturating_duration_since(now);
        remaining.as_secs_f64() <= self.ttl.as_secs_f64() * EVICTION_TTL_FRACTION
    }
}

#[derive(Default)]
struct Shard {
    entries: HashMap<LineHash, Entry>,
}

/// Read-mostly secondary indices. Updated only on insert/remove, so the
/// single lock sees little write traffic compared to the shards.
#[derive(Default)]
struct Indexes {
    by_sport: HashMap<Sport, BTreeSet<LineHash>>,
    by_game: HashMap<String, HashSet<LineHash>>,
    /// (provider_id, external_prop_id) -> current hash; used to find the
    /// predecessor when a provider re-issues an offering with a new line
    /// or payout.
    by_offer: HashMap<(String, String), LineHash>,
}

impl Indexes {
    fn insert(&mut self, prop: &CanonicalProp) {
        self.by_sport
            .entry(prop.sport)
            .or_default()
            .insert(prop.line_hash);
        self.by_game
            .entry(prop.game_id.clone())
            .or_default()
            .insert(prop.line_hash);
        self.by_offer.insert(
            (prop.provider_id.clone(), prop.external_prop_id.clone()),
            prop.line_hash,
        );
    }

    fn remove(&mut self, prop: &CanonicalProp) {
        if let Some(set) = self.by_sport.get_mut(&prop.sport) {
            set.remove(&prop.line_hash);
            if set.is_empty() {
                self.by_sport.remove(&prop.sport);
            }
        }
        if let Some(set) = self.by_game.get_mut(&prop.game_id) {
            set.remove(&prop.line_hash);
            if set.is_empty() {
                self.by_game.remove(&prop.game_id);
            }
        }
        let offer_key = (prop.provider_id.clone(), prop.external_prop_id.clone());
        if self.by_offer.get(&offer_key) == Some(&prop.line_hash) {
            self.by_offer.remove(&offer_key);
        }
    }
}

pub struct L1Cache {
    shards: Vec<RwLock<Shard>>,
    indexes: RwLock<Indexes>,
    capacity_per_shard: usize,
    touch_counter: AtomicU64,
}

impl L1Cache {
    pub fn new(capacity: usize) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(Shard::default())).collect();
        Self {
            shards,
            indexes: RwLock::new(Indexes::default()),
            capacity_per_shard: (capacity / SHARD_COUNT).max(1),
            touch_counter: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, hash: &LineHash) -> &RwLock<Shard> {
        &self.shards[hash.0[0] as usize % SHARD_COUNT]
    }

    fn touch_stamp(&self) -> u64 {
        self.touch_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Read a live entry, superseded or not: in-flight readers holding an
    /// old hash still deserve the record until TTL takes it.
    pub fn get(&self, hash: &LineHash) -> Option<Arc<CanonicalProp>> {
        let shard = self.shard_for(hash).read();
        let entry = shard.entries.get(hash)?;
        if entry.expired(Instant::now()) {
            return None;
        }
        entry.last_touched.store(self.touch_stamp(), Ordering::Relaxed);
        Some(entry.prop.clone())
    }

    /// Deduplicating upsert under the shard lock. Returns the outcome plus
    /// the predecessor hash this record superseded, if any.
    pub fn upsert(
        &self,
        prop: Arc<CanonicalProp>,
        ttl: Duration,
    ) -> (UpsertOutcome, Option<LineHash>) {
        let hash = prop.line_hash;
        let now = Instant::now();
        let stamp = self.touch_stamp();

        // Old record whose index entries no longer describe the new one.
        let mut displaced: Option<Arc<CanonicalProp>> = None;

        let outcome = {
            let mut shard = self.shard_for(&hash).write();
            match shard.entries.get_mut(&hash) {
                Some(entry) if !entry.expired(now) => {
                    entry.expires_at = now + ttl;
                    entry.ttl = ttl;
                    entry.last_touched.store(stamp, Ordering::Relaxed);
                    if prop.updated_ts > entry.prop.updated_ts || entry.superseded {
                        displaced = Some(entry.prop.clone());
                        entry.prop = prop.clone();
                        entry.superseded = false;
                        UpsertOutcome::Updated
                    } else {
                        UpsertOutcome::Duplicate
                    }
                }
                _ => {
                    // Replacing an expired leftover still has to clean its
                    // index entries.
                    displaced = shard.entries.get(&hash).map(|e| e.prop.clone());
                    shard.entries.insert(
                        hash,
                        Entry {
                            prop: prop.clone(),
                            expires_at: now + ttl,
                            ttl,
                            last_touched: AtomicU64::new(stamp),
                            superseded: false,
                        },
                    );
                    self.evict_if_full(&mut shard, now);
                    UpsertOutcome::Inserted
                }
            }
        };

        let mut superseded_predecessor = None;
        match outcome {
            UpsertOutcome::Duplicate => {}
            UpsertOutcome::Updated => {
                // Same hash, but identity-adjacent fields (game, offer key)
                // may have moved; reindex only when they did.
                if let Some(old) = &displaced {
                    let same_indexing = old.game_id == prop.game_id
                        && old.provider_id == prop.provider_id
                        && old.external_prop_id == prop.external_prop_id;
                    if !same_indexing {
                        let mut indexes = self.indexes.write();
                        indexes.remove(old);
                        indexes.insert(&prop);
                    }
                }
            }
            UpsertOutcome::Inserted => {
                let predecessor = {
                    let mut indexes = self.indexes.write();
                    if let Some(old) = &displaced {
                        indexes.remove(old);
                    }
                    let offer_key = (prop.provider_id.clone(), prop.external_prop_id.clone());
                    let predecessor =
                        indexes.by_offer.get(&offer_key).copied().filter(|p| *p != hash);
                    indexes.insert(&prop);
                    predecessor
                };
                // A new hash for an offer key we already track means the
                // line or payout moved: the old entity stays until TTL,
                // flagged.
                if let Some(old_hash) = predecessor {
                    if self.mark_superseded(&old_hash) {
                        superseded_predecessor = Some(old_hash);
                    }
                }
            }
        }

        (outcome, superseded_predecessor)
    }

    fn mark_superseded(&self, hash: &LineHash) -> bool {
        let mut shard = self.shard_for(hash).write();
        match shard.entries.get_mut(hash) {
            Some(entry) if !entry.superseded => {
                entry.superseded = true;
                true
            }
            _ => false,
        }
    }

    /// Evict over-capacity entries: anything already expired, then entries
    /// within a quarter of their TTL, then plain LRU.
    fn evict_if_full(&self, shard: &mut Shard, now: Instant) {
        while shard.entries.len() > self.capacity_per_shard {
            let victim = shard
                .entries
                .iter()
                .min_by_key(|(_, e)| {
                    let class = if e.expired(now) {
                        0u8
                    } else if e.near_expiry(now) {
                        1
                    } else {
                        2
                    };
                    (class, e.last_touched.load(Ordering::Relaxed))
                })
                .map(|(hash, _)| *hash);

            let Some(hash) = victim else { break };
            if let Some(entry) = shard.entries.remove(&hash) {
                self.indexes.write().remove(&entry.prop);
                debug!(hash = %hash, "l1_evicted");
            }
        }
    }

    /// Remove a single hash. Returns the removed record.
    pub fn remove(&self, hash: &LineHash) -> Option<Arc<CanonicalProp>> {
        let removed = {
            let mut shard = self.shard_for(hash).write();
            shard.entries.remove(hash)
        };
        removed.map(|entry| {
            self.indexes.write().remove(&entry.prop);
            entry.prop
        })
    }

    pub fn invalidate_sport(&self, sport: Sport) -> Vec<LineHash> {
        let hashes: Vec<LineHash> = self
            .indexes
            .read()
            .by_sport
            .get(&sport)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for hash in &hashes {
            self.remove(hash);
        }
        hashes
    }

    pub fn invalidate_game(&self, game_id: &str) -> Vec<LineHash> {
        let hashes: Vec<LineHash> = self
            .indexes
            .read()
            .by_game
            .get(game_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for hash in &hashes {
            self.remove(hash);
        }
        hashes
    }

    /// Hashes for a sport in line-hash order, resuming after `cursor`.
    pub fn sport_hashes_after(&self, sport: Sport, cursor: Option<LineHash>) -> Vec<LineHash> {
        let indexes = self.indexes.read();
        let Some(set) = indexes.by_sport.get(&sport) else {
            return Vec::new();
        };
        match cursor {
            Some(after) => set
                .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                .copied()
                .collect(),
            None => set.iter().copied().collect(),
        }
    }

    pub fn game_hashes(&self, game_id: &str) -> Vec<LineHash> {
        let indexes = self.indexes.read();
        indexes
            .by_game
            .get(game_id)
            .map(|set| {
                let mut hashes: Vec<LineHash> = set.iter().copied().collect();
                hashes.sort_unstable();
                hashes
            })
            .unwrap_or_default()
    }

    /// Live (unexpired, non-superseded) record for query scans.
    pub fn get_visible(&self, hash: &LineHash) -> Option<Arc<CanonicalProp>> {
        let shard = self.shard_for(hash).read();
        let entry = shard.entries.get(hash)?;
        if entry.expired(Instant::now()) || entry.superseded {
            return None;
        }
        Some(entry.prop.clone())
    }

    pub fn sport_len(&self, sport: Sport) -> usize {
        self.indexes
            .read()
            .by_sport
            .get(&sport)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; called from a background sweep.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for shard in &self.shards {
            let expired: Vec<(LineHash, Arc<CanonicalProp>)> = {
                let shard = shard.read();
                shard
                    .entries
                    .iter()
                    .filter(|(_, e)| e.expired(now))
                    .map(|(h, e)| (*h, e.prop.clone()))
                    .collect()
            };
            if expired.is_empty() {
                continue;
            }
            let mut guard = shard.write();
            let mut indexes = self.indexes.write();
            for (hash, prop) in expired {
                if guard.entries.get(&hash).is_some_and(|e| e.expired(now)) {
                    guard.entries.remove(&hash);
                    indexes.remove(&prop);
                    purged += 1;
                }
            }
        }
        purged
    }
}
