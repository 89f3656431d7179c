//! Prop read surface: paginated listing, single lookup, per-game listing.

use crate::api::envelope::{ok, ok_empty, ApiError, Envelope, ErrorCode};
use crate::api::AppState;
use crate::cache::PropQuery;
use crate::models::{CanonicalProp, LineHash, PropType, Sport};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub sport: String,
    /// Comma-separated canonical prop types.
    pub prop_types: Option<String>,
    /// Comma-separated raw position codes.
    pub positions: Option<String>,
    #[serde(default)]
    pub include_incompatible: bool,
    #[serde(default)]
    pub page: usize,
    pub size: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub total: usize,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PropPage {
    pub items: Vec<Arc<CanonicalProp>>,
    pub pagination: Pagination,
}

/// Cursors are opaque to clients: base64 over a versioned keyset
/// position, bound to the sport that minted them.
fn encode_cursor(sport: Sport, hash: &LineHash) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(format!("v1:{}:{}", sport.as_str(), hash.to_hex()))
}

fn decode_cursor(sport: Sport, cursor: &str) -> Result<LineHash, ApiError> {
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| ApiError::invalid("malformed cursor"))?;

    let mut parts = decoded.splitn(3, ':');
    let (version, cursor_sport, hash) = (parts.next(), parts.next(), parts.next());
    if version != Some("v1") {
        return Err(ApiError::invalid("unsupported cursor version"));
    }
    if cursor_sport != Some(sport.as_str()) {
        return Err(ApiError::invalid("cursor does not match requested sport"));
    }
    hash.and_then(|h| LineHash::from_hex(h).ok())
        .ok_or_else(|| ApiError::invalid("malformed cursor"))
}

fn parse_sport(raw: &str) -> Result<Sport, ApiError> {
    raw.parse::<Sport>().map_err(ApiError::invalid)
}

fn parse_prop_types(raw: &str) -> Result<HashSet<PropType>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<PropType>().map_err(|_| {
                ApiError::new(
                    ErrorCode::UnknownPropCategory,
                    format!("unknown prop type '{s}'"),
                )
            })
        })
        .collect()
}

/// ETag over the newest ingestion in the page; a page that hasn't moved
/// since the client's copy answers 304 with no body.
fn page_etag(items: &[Arc<CanonicalProp>]) -> Option<String> {
    items
        .iter()
        .map(|p| p.ingested_ts.timestamp_micros())
        .max()
        .map(|max| format!("\"{max:x}-{}\"", items.len()))
}

pub async fn list_props(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let sport = parse_sport(&params.sport)?;
    let size = params.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let cursor = params
        .cursor
        .as_deref()
        .map(|c| decode_cursor(sport, c))
        .transpose()?;

    let query = PropQuery {
        prop_types: params.prop_types.as_deref().map(parse_prop_types).transpose()?,
        positions: params.positions.as_deref().map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
        include_incompatible: params.include_incompatible,
        page: params.page,
        size,
        cursor,
    };

    let page = tokio::time::timeout(state.query_timeout, async {
        state.cache.query(sport, &query)
    })
    .await
    .map_err(|_| ApiError::new(ErrorCode::Internal, "query timed out"))?;

    let etag = page_etag(&page.items);
    if let (Some(etag), Some(if_none_match)) = (
        etag.as_deref(),
        headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()),
    ) {
        if if_none_match == etag {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let body = PropPage {
        pagination: Pagination {
            total: page.total,
            next_cursor: page.next_cursor.map(|h| encode_cursor(sport, &h)),
        },
        items: page.items,
    };

    let mut response = ok(body).into_response();
    if let Some(etag) = etag {
        if let Ok(value) = etag.parse() {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

pub async fn get_prop(
    State(state): State<AppState>,
    Path(line_hash): Path<String>,
) -> Result<Response, ApiError> {
    let hash = LineHash::from_hex(&line_hash).map_err(ApiError::invalid)?;

    let found = tokio::time::timeout(state.query_timeout, state.cache.get(&hash))
        .await
        .map_err(|_| ApiError::new(ErrorCode::Internal, "query timed out"))?;

    match found {
        Some(prop) => Ok(ok(prop).into_response()),
        None => Ok((StatusCode::NOT_FOUND, ok_empty()).into_response()),
    }
}

#[derive(Debug, Serialize)]
pub struct GameProps {
    pub game_id: String,
    pub items: Vec<Arc<CanonicalProp>>,
}

pub async fn get_by_game(
    State(state): State<AppState>,
    Path(game_id): Path<String>,
) -> Result<Json<Envelope<GameProps>>, ApiError> {
    let items = state.cache.by_game(&game_id);
    Ok(ok(GameProps { game_id, items }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        let hash = LineHash([42u8; 32]);
        let cursor = encode_cursor(Sport::Nba, &hash);
        assert_eq!(decode_cursor(Sport::Nba, &cursor).unwrap(), hash);
    }

    #[test]
    fn test_cursor_sport_mismatch_rejected() {
        let cursor = encode_cursor(Sport::Nba, &LineHash([42u8; 32]));
        assert!(decode_cursor(Sport::Mlb, &cursor).is_err());
    }

    #[test]
    fn test_cursor_garbage_rejected() {
        assert!(decode_cursor(Sport::Nba, "not base64 at all!!").is_err());
        let bogus = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("v2:nba:abcd");
        assert!(decode_cursor(Sport::Nba, &bogus).is_err());
    }

    #[test]
    fn test_prop_type_parsing() {
        let types = parse_prop_types("points, assists").unwrap();
        assert!(types.contains(&PropType::Points));
        assert!(types.contains(&PropType::Assists));
        assert!(parse_prop_types("points,nonsense").is_err());
    }
}
