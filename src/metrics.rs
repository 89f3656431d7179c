//! Pipeline metrics.
//!
//! Counters live in a shared atomic struct so the health endpoint can render
//! hit rates without touching the exporter; the same increment sites also
//! emit to the `metrics` recorder for Prometheus scraping at `/metrics`.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Install the Prometheus recorder and return the render handle.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l2_errors: AtomicU64,

    upserts_inserted: AtomicU64,
    upserts_updated: AtomicU64,
    upserts_duplicate: AtomicU64,
    upserts_superseded: AtomicU64,

    fetch_success: AtomicU64,
    fetch_failure: AtomicU64,
    mapping_errors: AtomicU64,
    payout_drops: AtomicU64,
    taxonomy_misses: AtomicU64,

    store_writes: AtomicU64,
    store_failures: AtomicU64,
    store_buffered: AtomicU64,
    store_shed: AtomicU64,
}

impl PipelineMetrics {
    pub fn record_l1_hit(&self) {
        self.l1_hits.fetch_add(1, Ordering::Relaxed);
        counter!("propline_cache_requests_total", 1, "tier" => "l1", "outcome" => "hit");
    }

    pub fn record_l1_miss(&self) {
        self.l1_misses.fetch_add(1, Ordering::Relaxed);
        counter!("propline_cache_requests_total", 1, "tier" => "l1", "outcome" => "miss");
    }

    pub fn record_l2_hit(&self) {
        self.l2_hits.fetch_add(1, Ordering::Relaxed);
        counter!("propline_cache_requests_total", 1, "tier" => "l2", "outcome" => "hit");
    }

    pub fn record_l2_miss(&self) {
        self.l2_misses.fetch_add(1, Ordering::Relaxed);
        counter!("propline_cache_requests_total", 1, "tier" => "l2", "outcome" => "miss");
    }

    pub fn record_l2_error(&self) {
        self.l2_errors.fetch_add(1, Ordering::Relaxed);
        counter!("propline_cache_errors_total", 1, "tier" => "l2");
    }

    pub fn record_inserted(&self) {
        self.upserts_inserted.fetch_add(1, Ordering::Relaxed);
        counter!("propline_upserts_total", 1, "outcome" => "inserted");
    }

    pub fn record_updated(&self) {
        self.upserts_updated.fetch_add(1, Ordering::Relaxed);
        counter!("propline_upserts_total", 1, "outcome" => "updated");
    }

    pub fn record_duplicate(&self) {
        self.upserts_duplicate.fetch_add(1, Ordering::Relaxed);
        counter!("propline_upserts_total", 1, "outcome" => "duplicate");
    }

    pub fn record_superseded(&self) {
        self.upserts_superseded.fetch_add(1, Ordering::Relaxed);
        counter!("propline_upserts_total", 1, "outcome" => "superseded");
    }

    pub fn record_fetch(&self, provider: &'static str, ok: bool) {
        if ok {
            self.fetch_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fetch_failure.fetch_add(1, Ordering::Relaxed);
        }
        let outcome = if ok { "ok" } else { "error" };
        counter!("propline_fetches_total", 1, "provider" => provider, "outcome" => outcome);
    }

    pub fn record_mapping_error(&self, kind: &'static str) {
        self.mapping_errors.fetch_add(1, Ordering::Relaxed);
        counter!("propline_mapping_errors_total", 1, "kind" => kind);
    }

    pub fn record_payout_drop(&self, provider: &str) {
        self.payout_drops.fetch_add(1, Ordering::Relaxed);
        counter!("propline_payout_drops_total", 1, "provider" => provider.to_string());
    }

    pub fn record_taxonomy_miss(&self) {
        self.taxonomy_misses.fetch_add(1, Ordering::Relaxed);
        counter!("propline_taxonomy_misses_total", 1);
    }

    pub fn record_store_write(&self) {
        self.store_writes.fetch_add(1, Ordering::Relaxed);
        counter!("propline_store_writes_total", 1);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
        counter!("propline_store_failures_total", 1);
    }

    pub fn record_store_buffered(&self, depth: usize) {
        self.store_buffered.fetch_add(1, Ordering::Relaxed);
        gauge!("propline_store_buffer_depth", depth as f64);
    }

    pub fn record_store_shed(&self) {
        self.store_shed.fetch_add(1, Ordering::Relaxed);
        counter!("propline_store_shed_total", 1);
    }

    pub fn set_pending_upserts(&self, depth: usize) {
        gauge!("propline_pending_upserts", depth as f64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l1_misses = self.l1_misses.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let l2_misses = self.l2_misses.load(Ordering::Relaxed);

        MetricsSnapshot {
            l1_hits,
            l1_misses,
            l1_hit_rate: hit_rate(l1_hits, l1_misses),
            l2_hits,
            l2_misses,
            l2_hit_rate: hit_rate(l2_hits, l2_misses),
            l2_errors: self.l2_errors.load(Ordering::Relaxed),
            upserts_inserted: self.upserts_inserted.load(Ordering::Relaxed),
            upserts_updated: self.upserts_updated.load(Ordering::Relaxed),
            upserts_duplicate: self.upserts_duplicate.load(Ordering::Relaxed),
            upserts_superseded: self.upserts_superseded.load(Ordering::Relaxed),
            fetch_success: self.fetch_success.load(Ordering::Relaxed),
            fetch_failure: self.fetch_failure.load(Ordering::Relaxed),
            mapping_errors: self.mapping_errors.load(Ordering::Relaxed),
            payout_drops: self.payout_drops.load(Ordering::Relaxed),
            taxonomy_misses: self.taxonomy_misses.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            store_shed: self.store_shed.load(Ordering::Relaxed),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time counter values for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l1_hit_rate: f64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_hit_rate: f64,
    pub l2_errors: u64,
    pub upserts_inserted: u64,
    pub upserts_updated: u64,
    pub upserts_duplicate: u64,
    pub upserts_superseded: u64,
    pub fetch_success: u64,
    pub fetch_failure: u64,
    pub mapping_errors: u64,
    pub payout_drops: u64,
    pub taxonomy_misses: u64,
    pub store_failures: u64,
    pub store_shed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty_is_zero() {
        assert_eq!(hit_rate(0, 0), 0.0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PipelineMetrics::default();
        metrics.record_l1_hit();
        metrics.record_l1_hit();
        metrics.record_l1_miss();
        metrics.record_inserted();

        let snap = metrics.snapshot();
        assert_eq!(snap.l1_hits, 2);
        assert_eq!(snap.l1_misses, 1);
        assert!((snap.l1_hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.upserts_inserted, 1);
    }
}
