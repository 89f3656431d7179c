//! Application configuration.
//!
//! Everything is environment-driven with hard defaults so the service boots
//! in a bare container. Component-level knobs (circuit breaker, retry,
//! cache) have their own config structs next to the component; this module
//! holds the cross-cutting settings and the per-(sport, provider) cadences.

use crate::models::Sport;
use anyhow::Result;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Immutable after startup. Hot-reloadable state (taxonomy, team and
/// position tables) lives behind `ArcSwap` snapshots, not here.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Optional; absent means the durable store is disabled (L1/L2 only).
    pub database_url: Option<String>,
    /// Optional; absent means L2 is disabled (L1 only).
    pub redis_url: Option<String>,

    /// Seconds between cycles while any game of the pair is live.
    pub fetch_cadence_live: Duration,
    /// Seconds between cycles when everything is pre-game.
    pub fetch_cadence_pregame: Duration,
    /// Per-(sport, provider) cadence overrides, e.g. `CADENCE_MLB_PRIZEPICKS=30`.
    pub cadence_overrides: HashMap<(Sport, String), Duration>,

    pub cache_l1_capacity: usize,
    pub cache_ttl_live: Duration,
    pub cache_ttl_pregame: Duration,

    pub circuit_threshold: u32,
    pub circuit_cooldown: Duration,

    /// Global cap on concurrent provider requests.
    pub max_in_flight: usize,

    pub upsert_high_water: usize,
    pub upsert_low_water: usize,

    pub taxonomy_hot_reload: bool,
    /// Optional TOML overlay for taxonomy/team/position tables.
    pub taxonomy_path: Option<String>,

    pub request_timeout: Duration,
    pub cycle_timeout: Duration,
    pub query_timeout: Duration,

    /// Run one cycle per (sport, provider) pair and exit.
    pub run_once: bool,
    pub sports: Vec<Sport>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8090".to_string())
            .parse()
            .unwrap_or(8090);

        let sports = env::var("SPORTS")
            .unwrap_or_else(|_| "mlb,nba,nfl,nhl".to_string())
            .split(',')
            .filter_map(|s| s.trim().parse::<Sport>().ok())
            .collect::<Vec<_>>();

        let mut cadence_overrides = HashMap::new();
        for (key, value) in env::vars() {
            let Some(rest) = key.strip_prefix("CADENCE_") else {
                continue;
            };
            let Some((sport_raw, provider_raw)) = rest.split_once('_') else {
                continue;
            };
            let (Ok(sport), Ok(secs)) = (sport_raw.parse::<Sport>(), value.parse::<u64>()) else {
                continue;
            };
            if secs > 0 {
                cadence_overrides.insert(
                    (sport, provider_raw.to_ascii_lowercase()),
                    Duration::from_secs(secs),
                );
            }
        }

        let high_water = env_usize("UPSERT_HIGH_WATER", 10_000);
        let low_water = env_usize("UPSERT_LOW_WATER", 5_000).min(high_water);

        Ok(Self {
            port,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            fetch_cadence_live: Duration::from_secs(env_u64("FETCH_CADENCE_LIVE_SECS", 60)),
            fetch_cadence_pregame: Duration::from_secs(env_u64("FETCH_CADENCE_PREGAME_SECS", 300)),
            cadence_overrides,
            cache_l1_capacity: env_usize("CACHE_L1_CAPACITY", 50_000),
            cache_ttl_live: Duration::from_secs(env_u64("CACHE_TTL_LIVE_SECS", 120)),
            cache_ttl_pregame: Duration::from_secs(env_u64("CACHE_TTL_PREGAME_SECS", 3600)),
            circuit_threshold: env_u64("CIRCUIT_THRESHOLD", 5) as u32,
            circuit_cooldown: Duration::from_secs(env_u64("CIRCUIT_COOLDOWN_SECS", 30)),
            max_in_flight: env_usize("MAX_IN_FLIGHT", 25),
            upsert_high_water: high_water,
            upsert_low_water: low_water,
            taxonomy_hot_reload: env_bool("TAXONOMY_HOT_RELOAD", true),
            taxonomy_path: env::var("TAXONOMY_PATH").ok().filter(|s| !s.is_empty()),
            request_timeout: Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 10)),
            cycle_timeout: Duration::from_secs(env_u64("CYCLE_TIMEOUT_SECS", 120)),
            query_timeout: Duration::from_secs(env_u64("QUERY_TIMEOUT_SECS", 5)),
            run_once: env_bool("RUN_ONCE", false),
            sports,
        })
    }

    /// Cadence for a pair: explicit override, else live/pregame default.
    pub fn cadence_for(&self, sport: Sport, provider: &str, any_live: bool) -> Duration {
        if let Some(d) = self
            .cadence_overrides
            .get(&(sport, provider.to_ascii_lowercase()))
        {
            return *d;
        }
        if any_live {
            self.fetch_cadence_live
        } else {
            self.fetch_cadence_pregame
        }
    }

    /// TTL for an entry given whether its game is live.
    pub fn ttl_for(&self, live: bool) -> Duration {
        if live {
            self.cache_ttl_live
        } else {
            self.cache_ttl_pregame
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8090,
            database_url: None,
            redis_url: None,
            fetch_cadence_live: Duration::from_secs(60),
            fetch_cadence_pregame: Duration::from_secs(300),
            cadence_overrides: HashMap::new(),
            cache_l1_capacity: 50_000,
            cache_ttl_live: Duration::from_secs(120),
            cache_ttl_pregame: Duration::from_secs(3600),
            circuit_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
            max_in_flight: 25,
            upsert_high_water: 10_000,
            upsert_low_water: 5_000,
            taxonomy_hot_reload: true,
            taxonomy_path: None,
            request_timeout: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(120),
            query_timeout: Duration::from_secs(5),
            run_once: false,
            sports: Sport::ALL.to_vec(),
        }
    }
}
