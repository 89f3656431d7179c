//! Provider clients.
//!
//! One module per upstream book plus the shared plumbing every client
//! fetches through: rate limiting, retry with backoff, timeout and the
//! circuit breaker. Clients decode their wire formats into `RawProp` at
//! this boundary and never fabricate data on failure; falling back to
//! cached props is the orchestrator's call, not theirs.

pub mod circuit;
pub mod draftkings;
pub mod http;
pub mod prizepicks;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState};
pub use draftkings::DraftKingsClient;
pub use http::{ProviderHttp, RetryPolicy};
pub use prizepicks::PrizePicksClient;

use crate::models::{Game, MarketType, RawProp, Sport};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream unavailable ({})", status.map(|s| s.to_string()).unwrap_or_else(|| "network".to_string()))]
    UpstreamUnavailable { status: Option<u16> },
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("circuit open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },
    #[error("request timed out")]
    Timeout,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),
}

impl ProviderError {
    /// Transient errors are worth retrying within a call; the rest fail
    /// the call immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::UpstreamUnavailable { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout
        )
    }

    /// Only genuine upstream failures feed the circuit breaker. Rate
    /// limiting is flow control, and decode problems are data-shape bugs
    /// that fast-failing the provider would not help.
    pub fn counts_against_circuit(&self) -> bool {
        matches!(
            self,
            ProviderError::UpstreamUnavailable { .. } | ProviderError::Timeout
        )
    }
}

/// A stateless upstream fetcher. Implementations own their wire DTOs and
/// their provider-specific quirks; everything they return is already in
/// pipeline shape.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider_id(&self) -> &'static str;

    /// Games with status `Scheduled` only.
    async fn fetch_scheduled_games(&self, sport: Sport) -> Result<Vec<Game>, ProviderError>;

    async fn fetch_props(
        &self,
        sport: Sport,
        game_ids: &[String],
        market: MarketType,
    ) -> Result<Vec<RawProp>, ProviderError>;

    /// Circuit breaker state for health reporting.
    fn circuit_snapshot(&self) -> CircuitSnapshot;
}
