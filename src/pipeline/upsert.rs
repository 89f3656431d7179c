//! Deduplicating upserter.
//!
//! Consumes mapped batches, upserts each record into the cache tiers and
//! the durable store, and accounts for backpressure. Within a batch
//! records are processed in line-hash order so concurrent cycles'
//! interleavings can't matter; per-hash writes serialize on the cache
//! shard lock.

use crate::cache::{CacheManager, UpsertOutcome};
use crate::metrics::PipelineMetrics;
use crate::models::{CanonicalProp, LineHash};
use crate::store::PropStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

/// Pending-upsert accounting shared between the orchestrator (producer)
/// and the upserter (consumer). Once pending crosses the high-water mark
/// the producer stalls until it drains below the low-water mark.
pub struct BackpressureGauge {
    pending: AtomicUsize,
    high_water: usize,
    low_water: usize,
    drained: Notify,
    metrics: Arc<PipelineMetrics>,
}

impl BackpressureGauge {
    pub fn new(high_water: usize, low_water: usize, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            pending: AtomicUsize::new(0),
            high_water,
            low_water: low_water.min(high_water),
            drained: Notify::new(),
            metrics,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn add(&self, n: usize) {
        let depth = self.pending.fetch_add(n, Ordering::Relaxed) + n;
        self.metrics.set_pending_upserts(depth);
    }

    pub fn sub(&self, n: usize) {
        let before = self.pending.fetch_sub(n, Ordering::Relaxed);
        let depth = before.saturating_sub(n);
        self.metrics.set_pending_upserts(depth);
        if depth <= self.low_water {
            self.drained.notify_waiters();
        }
    }

    pub fn over_high_water(&self) -> bool {
        self.pending() > self.high_water
    }

    /// Block new fetch dispatch while over the high-water mark; resume
    /// only after draining to the low-water mark (hysteresis, so the
    /// producer doesn't flap at the threshold).
    pub async fn wait_for_capacity(&self) {
        if !self.over_high_water() {
            return;
        }
        debug!(pending = self.pending(), "backpressure_throttling_fetches");
        loop {
            let notified = self.drained.notified();
            if self.pending() <= self.low_water {
                return;
            }
            notified.await;
        }
    }
}

/// Downstream notification on cache mutations.
#[derive(Debug, Clone)]
pub enum PropEvent {
    Inserted(LineHash),
    Updated(LineHash),
    Superseded { old: LineHash, new: LineHash },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BatchStats {
    pub inserted: usize,
    pub updated: usize,
    pub duplicate: usize,
    pub superseded: usize,
    pub store_failures: usize,
}

pub struct Upserter {
    cache: Arc<CacheManager>,
    store: Option<Arc<PropStore>>,
    metrics: Arc<PipelineMetrics>,
    gauge: Arc<BackpressureGauge>,
    events: broadcast::Sender<PropEvent>,
}

impl Upserter {
    pub fn new(
        cache: Arc<CacheManager>,
        store: Option<Arc<PropStore>>,
        metrics: Arc<PipelineMetrics>,
        gauge: Arc<BackpressureGauge>,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            cache,
            store,
            metrics,
            gauge,
            events,
        }
    }

    pub fn gauge(&self) -> Arc<BackpressureGauge> {
        self.gauge.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PropEvent> {
        self.events.subscribe()
    }

    /// Upsert a mapped batch in line-hash order. The caller must have
    /// added the batch to the gauge when it was enqueued; every record is
    /// subtracted here whether it landed or not.
    pub async fn upsert_batch(&self, mut props: Vec<CanonicalProp>) -> BatchStats {
        props.sort_by(|a, b| a.line_hash.cmp(&b.line_hash));

        let mut stats = BatchStats::default();
        for prop in props {
            self.upsert_one(prop, &mut stats).await;
            self.gauge.sub(1);
        }
        stats
    }

    async fn upsert_one(&self, prop: CanonicalProp, stats: &mut BatchStats) {
        let prop = Arc::new(prop);
        let (outcome, superseded) = self.cache.upsert(prop.clone());

        match outcome {
            UpsertOutcome::Inserted => {
                stats.inserted += 1;
                self.metrics.record_inserted();
                let _ = self.events.send(PropEvent::Inserted(prop.line_hash));
            }
            UpsertOutcome::Updated => {
                stats.updated += 1;
                self.metrics.record_updated();
                let _ = self.events.send(PropEvent::Updated(prop.line_hash));
            }
            UpsertOutcome::Duplicate => {
                stats.duplicate += 1;
                self.metrics.record_duplicate();
            }
        }

        if let Some(old) = superseded {
            stats.superseded += 1;
            self.metrics.record_superseded();
            let _ = self.events.send(PropEvent::Superseded {
                old,
                new: prop.line_hash,
            });
        }

        // Duplicates only refresh TTL; the store row is already current.
        if outcome != UpsertOutcome::Duplicate {
            if let Some(store) = &self.store {
                if store.upsert(&prop).await.is_err() {
                    stats.store_failures += 1;
                }
            }
        }
    }
}
