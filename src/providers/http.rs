//! Shared HTTP plumbing for provider clients.
//!
//! Every upstream call goes through one path: circuit gate, rate limiter,
//! request with timeout, retry with jittered exponential backoff on
//! transient errors only. Retry-After is honored on 429s. The circuit
//! records one outcome per call, not per attempt.

use crate::providers::circuit::{CircuitBreaker, CircuitConfig};
use crate::providers::ProviderError;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff for a zero-based attempt index, with +/-30% jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.as_millis() as f64 * self.factor.powi(attempt as i32);
        let capped = exp.min(self.cap.as_millis() as f64);
        let jittered = capped * rand::thread_rng().gen_range(0.7..1.3);
        Duration::from_millis(jittered as u64)
    }
}

pub struct ProviderHttp {
    name: &'static str,
    client: reqwest::Client,
    limiter: DirectRateLimiter,
    retry: RetryPolicy,
    circuit: CircuitBreaker,
}

impl ProviderHttp {
    pub fn new(
        name: &'static str,
        requests_per_minute: u32,
        timeout: Duration,
        retry: RetryPolicy,
        circuit_config: CircuitConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("propline/0.1")
            .build()?;

        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute.max(1)).expect("non-zero requests per minute"),
        );

        Ok(Self {
            name,
            client,
            limiter: RateLimiter::direct(quota),
            retry,
            circuit: CircuitBreaker::new(name, circuit_config),
        })
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// GET `url` and decode the JSON body. One circuit outcome per call.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        if let Err(retry_in) = self.circuit.try_acquire() {
            return Err(ProviderError::CircuitOpen { retry_in });
        }

        let result = self.get_json_with_retries(url, query).await;
        match &result {
            Ok(_) => self.circuit.record_success(),
            Err(e) if e.counts_against_circuit() => self.circuit.record_failure(),
            Err(_) => {}
        }
        result
    }

    async fn get_json_with_retries<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.until_ready().await;

            match self.attempt_once(url, query).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = match &e {
                        ProviderError::RateLimited {
                            retry_after: Some(after),
                        } => *after,
                        _ => self.retry.backoff(attempt),
                    };
                    debug!(
                        provider = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying_upstream_call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(provider = self.name, url, attempts = attempt + 1, error = %e, "upstream_call_failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::UpstreamUnavailable { status: None }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ProviderError::UpstreamUnavailable {
                status: Some(status.as_u16()),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::UnexpectedStatus(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        let first = policy.backoff(0);
        assert!(first >= Duration::from_millis(70) && first <= Duration::from_millis(130));

        // Far past the cap: jitter keeps it within 30% of 5s.
        let late = policy.backoff(10);
        assert!(late >= Duration::from_millis(3500) && late <= Duration::from_millis(6500));
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::Timeout.counts_against_circuit());
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(!ProviderError::RateLimited { retry_after: None }.counts_against_circuit());
        assert!(!ProviderError::Decode("bad".to_string()).is_transient());
        assert!(!ProviderError::UnexpectedStatus(404).counts_against_circuit());
    }
}
