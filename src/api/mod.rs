//! HTTP surface.
//!
//! Read endpoints serve from the cache tiers only; admin endpoints drive
//! hot reload and invalidation; health and metrics expose pipeline state.

pub mod admin;
pub mod envelope;
pub mod health;
pub mod props;

use crate::cache::CacheManager;
use crate::metrics::PipelineMetrics;
use crate::normalize::taxonomy::TaxonomyService;
use crate::pipeline::{BackpressureGauge, Orchestrator};
use crate::store::PropStore;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
    pub taxonomy: Arc<TaxonomyService>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Option<Arc<PropStore>>,
    pub metrics: Arc<PipelineMetrics>,
    pub gauge: Arc<BackpressureGauge>,
    pub prometheus: PrometheusHandle,
    pub query_timeout: Duration,
    pub hot_reload_enabled: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/props", get(props::list_props))
        .route("/api/props/:line_hash", get(props::get_prop))
        .route("/api/games/:game_id/props", get(props::get_by_game))
        .route("/api/admin/taxonomy/reload", post(admin::reload_taxonomy))
        .route("/api/admin/cache/invalidate", post(admin::invalidate_cache))
        .route("/api/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
