//! Pipeline health: circuit states, cycle recency, cache hit rates and
//! degraded-mode flags, in one document for operators and probes.

use crate::api::envelope::ok;
use crate::api::AppState;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::PairStatus;
use crate::providers::{CircuitSnapshot, CircuitState};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    #[serde(flatten)]
    pub circuit: CircuitSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub l1_entries: usize,
    pub l1_hit_rate: f64,
    pub l2_attached: bool,
    pub l2_hit_rate: f64,
    pub l2_pending_retries: usize,
}

#[derive(Debug, Serialize)]
pub struct StoreHealth {
    pub attached: bool,
    pub degraded: bool,
    pub buffered_writes: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub providers: Vec<ProviderHealth>,
    pub pairs: Vec<PairStatus>,
    pub cache: CacheHealth,
    pub store: StoreHealth,
    pub pending_upserts: usize,
    pub taxonomy_misses: usize,
    pub counters: MetricsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let counters = state.metrics.snapshot();
    let providers: Vec<ProviderHealth> = state
        .orchestrator
        .circuit_snapshots()
        .into_iter()
        .map(|(provider, circuit)| ProviderHealth { provider, circuit })
        .collect();

    let store_degraded = state.store.as_ref().is_some_and(|s| s.is_degraded());
    let any_circuit_open = providers
        .iter()
        .any(|p| p.circuit.state == CircuitState::Open);
    let status = if store_degraded || any_circuit_open {
        "degraded"
    } else {
        "ok"
    };

    let response = HealthResponse {
        status,
        providers,
        pairs: state.orchestrator.pair_statuses(),
        cache: CacheHealth {
            l1_entries: state.cache.len(),
            l1_hit_rate: counters.l1_hit_rate,
            l2_attached: state.cache.l2_attached(),
            l2_hit_rate: counters.l2_hit_rate,
            l2_pending_retries: state.cache.l2_pending_retries(),
        },
        store: StoreHealth {
            attached: state.store.is_some(),
            degraded: store_degraded,
            buffered_writes: state.store.as_ref().map(|s| s.buffered()).unwrap_or(0),
        },
        pending_upserts: state.gauge.pending(),
        taxonomy_misses: state.taxonomy.misses().len(),
        counters,
    };

    ok(response)
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}
