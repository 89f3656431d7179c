//! Admin surface: taxonomy reload and cache invalidation.

use crate::api::envelope::{ok, ApiError, Envelope, ErrorCode};
use crate::api::AppState;
use crate::models::{LineHash, Sport};
use crate::normalize::taxonomy::{ReloadSummary, TaxonomyMiss};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    #[serde(flatten)]
    pub summary: ReloadSummary,
    /// Categories still unmapped after the reload.
    pub outstanding_misses: Vec<TaxonomyMiss>,
}

pub async fn reload_taxonomy(
    State(state): State<AppState>,
) -> Result<Json<Envelope<ReloadResponse>>, ApiError> {
    if !state.hot_reload_enabled {
        return Err(ApiError::invalid("taxonomy hot reload is disabled"));
    }

    let summary = state
        .taxonomy
        .reload()
        .map_err(|e| ApiError::internal(format!("taxonomy reload failed: {e}")))?;

    Ok(ok(ReloadResponse {
        summary,
        outstanding_misses: state.taxonomy.misses(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidateScope {
    Sport,
    Game,
    Hash,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub scope: InvalidateScope,
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub removed: usize,
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<Envelope<InvalidateResponse>>, ApiError> {
    let removed = match request.scope {
        InvalidateScope::Sport => {
            let sport: Sport = request.key.parse().map_err(ApiError::invalid)?;
            state.cache.invalidate_sport(sport).await
        }
        InvalidateScope::Game => state.cache.invalidate_game(&request.key).await,
        InvalidateScope::Hash => {
            let hash = LineHash::from_hex(&request.key).map_err(|e| {
                ApiError::new(ErrorCode::InvalidParameter, format!("bad line hash: {e}"))
            })?;
            state.cache.invalidate(&hash).await;
            1
        }
    };

    info!(key = %request.key, removed, "admin_cache_invalidation");
    Ok(ok(InvalidateResponse { removed }))
}
