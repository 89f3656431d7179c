//! Per-provider circuit breaker.
//!
//! Closed -> Open -> HalfOpen -> Closed. Trips on consecutive failures or
//! on failure rate over a rolling call window. Open fast-fails every call
//! for a cooldown; HalfOpen admits exactly one probe, and a failed probe
//! reopens with exponentially growing cooldown.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before tripping.
    pub failure_threshold: u32,
    /// Rolling window length for the failure-rate trip.
    pub window_size: usize,
    /// Trip when failures exceed this fraction of a full window.
    pub failure_rate: f64,
    /// First cooldown after tripping.
    pub cooldown: Duration,
    /// Cooldown ceiling for repeated probe failures.
    pub cooldown_cap: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 20,
            failure_rate: 0.5,
            cooldown: Duration::from_secs(30),
            cooldown_cap: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Rolling outcome window, true = failure.
    window: VecDeque<bool>,
    open_until: Option<Instant>,
    /// Consecutive Open episodes without an intervening success; drives
    /// the exponential cooldown.
    reopen_count: u32,
    probe_in_flight: bool,
}

/// Snapshot for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub cooldown_remaining_secs: Option<u64>,
}

pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window: VecDeque::with_capacity(20),
                open_until: None,
                reopen_count: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate a call. `Err` carries the remaining cooldown; callers must not
    /// touch the network when this fails.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let open_until = inner.open_until.unwrap_or(now);
                if now < open_until {
                    return Err(open_until - now);
                }
                // Cooldown elapsed: this caller becomes the probe.
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                info!(provider = self.name, "circuit_half_open");
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(Duration::ZERO)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(provider = self.name, "circuit_closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.reopen_count = 0;
        inner.probe_in_flight = false;
        inner.open_until = None;
        Self::push_outcome(&mut inner.window, false, self.config.window_size);
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        Self::push_outcome(&mut inner.window, true, self.config.window_size);

        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen with exponential cooldown.
                inner.probe_in_flight = false;
                inner.reopen_count += 1;
                self.open(&mut inner);
            }
            CircuitState::Closed => {
                let failures = inner.window.iter().filter(|&&f| f).count();
                let window_full = inner.window.len() >= self.config.window_size;
                let rate_tripped = window_full
                    && (failures as f64 / inner.window.len() as f64) > self.config.failure_rate;

                if inner.consecutive_failures >= self.config.failure_threshold || rate_tripped {
                    self.open(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut CircuitInner) {
        let cooldown = self
            .config
            .cooldown
            .checked_mul(1u32 << inner.reopen_count.min(8))
            .unwrap_or(self.config.cooldown_cap)
            .min(self.config.cooldown_cap);
        inner.state = CircuitState::Open;
        inner.open_until = Some(Instant::now() + cooldown);
        warn!(
            provider = self.name,
            failures = inner.consecutive_failures,
            cooldown_secs = cooldown.as_secs(),
            "circuit_opened"
        );
    }

    fn push_outcome(window: &mut VecDeque<bool>, failed: bool, cap: usize) {
        window.push_back(failed);
        while window.len() > cap {
            window.pop_front();
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        let now = Instant::now();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown_remaining_secs: inner
                .open_until
                .filter(|_| inner.state == CircuitState::Open)
                .map(|until| until.saturating_duration_since(now).as_secs()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitConfig {
                cooldown: Duration::from_millis(cooldown_ms),
                cooldown_cap: Duration::from_millis(cooldown_ms * 10),
                ..CircuitConfig::default()
            },
        )
    }

    #[test]
    fn test_trips_after_consecutive_failures() {
        let circuit = breaker(10_000);
        for _ in 0..4 {
            assert!(circuit.try_acquire().is_ok());
            circuit.record_failure();
        }
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert!(circuit.try_acquire().is_ok());
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.try_acquire().is_err());
    }

    #[test]
    fn test_failure_rate_trips_over_window() {
        let circuit = breaker(10_000);
        // Alternate so consecutive never reaches 5, but rate exceeds 50%
        // once the window is full: 13 failures, 7 successes over 20.
        for i in 0..20 {
            if i % 3 == 2 {
                circuit.record_success();
            } else {
                circuit.record_failure();
            }
        }
        assert_eq!(circuit.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_probe_success_closes() {
        let circuit = breaker(20);
        for _ in 0..5 {
            circuit.record_failure();
        }
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(30));
        // First caller after cooldown is the probe.
        assert!(circuit.try_acquire().is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        // Concurrent callers fail fast while the probe is out.
        assert!(circuit.try_acquire().is_err());

        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_probe_failure_reopens_with_longer_cooldown() {
        let circuit = breaker(20);
        for _ in 0..5 {
            circuit.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(circuit.try_acquire().is_ok());
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        // First reopen doubles the cooldown: 40ms. Not yet elapsed at 30ms.
        std::thread::sleep(Duration::from_millis(30));
        assert!(circuit.try_acquire().is_err());
        std::thread::sleep(Duration::from_millis(20));
        assert!(circuit.try_acquire().is_ok());
    }

    #[test]
    fn test_cooldown_capped() {
        let circuit = breaker(20);
        for _ in 0..5 {
            circuit.record_failure();
        }
        for _ in 0..12 {
            std::thread::sleep(Duration::from_millis(1));
            // Force repeated probe failures; cooldown must stay capped at
            // 10x base rather than doubling unbounded.
            let mut inner = circuit.inner.lock();
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = true;
            drop(inner);
            circuit.record_failure();
        }
        let snapshot = circuit.snapshot();
        assert!(snapshot.cooldown_remaining_secs.unwrap_or(0) <= 1);
    }
}
