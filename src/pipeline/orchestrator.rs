//! Pipeline orchestrator.
//!
//! One cadence loop per (sport, provider) pair; loops never synchronize
//! with each other and a pair never overlaps itself. Each cycle streams
//! fetch -> map -> upsert per market batch, bounded by the global
//! fan-out semaphore and the upsert backpressure gauge. A provider whose
//! circuit is open is skipped; its cached props stay authoritative until
//! TTL.

use crate::cache::CacheManager;
use crate::config::Config;
use crate::metrics::PipelineMetrics;
use crate::models::{GameStatus, MarketType, PropType, RawProp, Sport};
use crate::normalize::mapper::PropMapper;
use crate::pipeline::upsert::Upserter;
use crate::providers::{CircuitSnapshot, ProviderClient, ProviderError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Fetching,
    Mapping,
    Upserting,
    Completed,
    FailedPartial,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairStatus {
    pub sport: Sport,
    pub provider: String,
    pub state: CycleState,
    pub last_started: Option<DateTime<Utc>>,
    pub last_completed: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub last_inserted: usize,
    pub last_updated: usize,
    pub last_duplicate: usize,
}

impl PairStatus {
    fn new(sport: Sport, provider: &str) -> Self {
        Self {
            sport,
            provider: provider.to_string(),
            state: CycleState::Idle,
            last_started: None,
            last_completed: None,
            last_duration_ms: None,
            last_error: None,
            cycles_completed: 0,
            cycles_failed: 0,
            last_inserted: 0,
            last_updated: 0,
            last_duplicate: 0,
        }
    }
}

enum CycleOutcome {
    Completed,
    /// Some markets failed but others landed.
    Partial { failures: u32, last_error: String },
    /// Nothing landed (circuit open, games fetch failed).
    Failed(String),
    Cancelled,
}

#[derive(Default)]
struct CycleTotals {
    inserted: usize,
    updated: usize,
    duplicate: usize,
}

pub struct Orchestrator {
    config: Arc<Config>,
    providers: Vec<Arc<dyn ProviderClient>>,
    mapper: Arc<PropMapper>,
    upserter: Arc<Upserter>,
    cache: Arc<CacheManager>,
    metrics: Arc<PipelineMetrics>,
    fan_out: Arc<Semaphore>,
    statuses: Arc<RwLock<HashMap<(Sport, String), PairStatus>>>,
    /// One lock per (sport, provider): a pair never overlaps itself even
    /// when cycles are driven externally.
    cycle_locks: HashMap<(Sport, String), Arc<tokio::sync::Mutex<()>>>,
    /// game_id -> (sport, last observed status); drives live-cadence
    /// selection and game-status invalidation.
    game_statuses: Arc<Mutex<HashMap<String, (Sport, GameStatus)>>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        providers: Vec<Arc<dyn ProviderClient>>,
        mapper: Arc<PropMapper>,
        upserter: Arc<Upserter>,
        cache: Arc<CacheManager>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let fan_out = Arc::new(Semaphore::new(config.max_in_flight));
        let mut statuses = HashMap::new();
        let mut cycle_locks = HashMap::new();
        for sport in &config.sports {
            for provider in &providers {
                let key = (*sport, provider.provider_id().to_string());
                statuses.insert(key.clone(), PairStatus::new(*sport, provider.provider_id()));
                cycle_locks.insert(key, Arc::new(tokio::sync::Mutex::new(())));
            }
        }
        Self {
            config,
            providers,
            mapper,
            upserter,
            cache,
            metrics,
            fan_out,
            statuses: Arc::new(RwLock::new(statuses)),
            cycle_locks,
            game_statuses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn pair_statuses(&self) -> Vec<PairStatus> {
        let mut statuses: Vec<PairStatus> = self.statuses.read().values().cloned().collect();
        statuses.sort_by(|a, b| (a.sport, &a.provider).cmp(&(b.sport, &b.provider)));
        statuses
    }

    pub fn circuit_snapshots(&self) -> Vec<(String, CircuitSnapshot)> {
        self.providers
            .iter()
            .map(|p| (p.provider_id().to_string(), p.circuit_snapshot()))
            .collect()
    }

    /// Replay the most recent ingestion from the durable store into L1.
    pub fn warm_cache(&self, props: Vec<crate::models::CanonicalProp>) {
        let warmed = self.cache.warm(props);
        if warmed > 0 {
            info!(warmed, "cache_warmed_from_store");
        }
    }

    /// Run all pair loops until cancelled. In run-once mode every pair
    /// executes exactly one cycle and the call returns.
    pub async fn run(self: Arc<Self>, cancel: watch::Receiver<bool>) {
        let mut tasks = JoinSet::new();

        for provider in self.providers.clone() {
            for sport in self.config.sports.clone() {
                let orchestrator = self.clone();
                let provider = provider.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    orchestrator.pair_loop(sport, provider, cancel).await;
                });
            }
        }

        // Housekeeping has no natural end; in run-once mode the pair
        // cycles are the whole job.
        if !self.config.run_once {
            let orchestrator = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                orchestrator.janitor_loop(cancel).await;
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    async fn pair_loop(
        &self,
        sport: Sport,
        provider: Arc<dyn ProviderClient>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let provider_id = provider.provider_id();
        info!(sport = %sport, provider = provider_id, "pair_loop_started");

        loop {
            if *cancel.borrow() {
                break;
            }

            let pair_lock = self
                .cycle_locks
                .get(&(sport, provider_id.to_string()))
                .cloned()
                .unwrap_or_default();
            let Ok(_cycle_guard) = pair_lock.try_lock() else {
                // A cycle for this pair is still running elsewhere.
                debug!(sport = %sport, provider = provider_id, "cycle_overlap_skipped");
                if self.config.run_once {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };

            let started_wall = Utc::now();
            let started = Instant::now();
            self.update_status(sport, provider_id, |s| {
                s.state = CycleState::Fetching;
                s.last_started = Some(started_wall);
            });

            let outcome = match timeout(
                self.config.cycle_timeout,
                self.run_cycle(sport, provider.as_ref(), &cancel),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => CycleOutcome::Failed("cycle timed out".to_string()),
            };

            let duration_ms = started.elapsed().as_millis() as u64;
            self.finish_cycle(sport, provider_id, outcome, duration_ms);

            if self.config.run_once {
                break;
            }

            let any_live = self.any_live(sport);
            let cadence = self.config.cadence_for(sport, provider_id, any_live);
            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                }
            }
        }

        self.update_status(sport, provider_id, |s| s.state = CycleState::Idle);
        debug!(sport = %sport, provider = provider_id, "pair_loop_stopped");
    }

    fn finish_cycle(
        &self,
        sport: Sport,
        provider_id: &str,
        outcome: CycleOutcome,
        duration_ms: u64,
    ) {
        self.update_status(sport, provider_id, |s| {
            s.last_duration_ms = Some(duration_ms);
            s.last_completed = Some(Utc::now());
            match &outcome {
                CycleOutcome::Completed => {
                    s.state = CycleState::Completed;
                    s.last_error = None;
                    s.cycles_completed += 1;
                }
                CycleOutcome::Partial { failures, last_error } => {
                    s.state = CycleState::FailedPartial;
                    s.last_error = Some(format!("{failures} market fetch(es) failed: {last_error}"));
                    s.cycles_completed += 1;
                }
                CycleOutcome::Failed(error) => {
                    s.state = CycleState::FailedPartial;
                    s.last_error = Some(error.clone());
                    s.cycles_failed += 1;
                }
                CycleOutcome::Cancelled => {
                    s.state = CycleState::Idle;
                }
            }
        });
    }

    async fn run_cycle(
        &self,
        sport: Sport,
        provider: &dyn ProviderClient,
        cancel: &watch::Receiver<bool>,
    ) -> CycleOutcome {
        let provider_id = provider.provider_id();

        // Backpressure gates the whole cycle before any fetch dispatch.
        self.upserter.gauge().wait_for_capacity().await;
        if *cancel.borrow() {
            return CycleOutcome::Cancelled;
        }

        let games = {
            let _permit = self.fan_out.acquire().await;
            provider.fetch_scheduled_games(sport).await
        };
        // In-flight fetches complete even when cancelled; results drop here.
        if *cancel.borrow() {
            return CycleOutcome::Cancelled;
        }

        let games = match games {
            Ok(games) => {
                self.metrics.record_fetch(provider_id, true);
                games
            }
            Err(e) => {
                if !matches!(e, ProviderError::CircuitOpen { .. }) {
                    self.metrics.record_fetch(provider_id, false);
                }
                // Cached props for this provider stay authoritative within
                // their TTL; nothing is fabricated in their place.
                warn!(sport = %sport, provider = provider_id, error = %e, "cycle_skipped");
                return CycleOutcome::Failed(e.to_string());
            }
        };

        for game in &games {
            self.note_game_status(&game.game_id, sport, game.status).await;
        }
        let game_ids: Vec<String> = games.iter().map(|g| g.game_id.clone()).collect();

        let mut totals = CycleTotals::default();
        let mut failures = 0u32;
        let mut last_error = String::new();

        for market in [MarketType::PlayerProps, MarketType::TeamProps] {
            self.upserter.gauge().wait_for_capacity().await;
            if *cancel.borrow() {
                return CycleOutcome::Cancelled;
            }

            let fetched = {
                let _permit = self.fan_out.acquire().await;
                provider.fetch_props(sport, &game_ids, market).await
            };
            if *cancel.borrow() {
                return CycleOutcome::Cancelled;
            }

            let raw = match fetched {
                Ok(raw) => {
                    self.metrics.record_fetch(provider_id, true);
                    raw
                }
                Err(e) => {
                    if !matches!(e, ProviderError::CircuitOpen { .. }) {
                        self.metrics.record_fetch(provider_id, false);
                    }
                    warn!(
                        sport = %sport,
                        provider = provider_id,
                        market = market.as_str(),
                        error = %e,
                        "market_fetch_failed"
                    );
                    failures += 1;
                    last_error = e.to_string();
                    continue;
                }
            };

            self.update_status(sport, provider_id, |s| s.state = CycleState::Mapping);
            let batch = self.map_batch(sport, provider_id, raw).await;

            self.update_status(sport, provider_id, |s| s.state = CycleState::Upserting);
            self.upserter.gauge().add(batch.len());
            if *cancel.borrow() {
                // Nothing may be partially upserted on cancel.
                self.upserter.gauge().sub(batch.len());
                return CycleOutcome::Cancelled;
            }
            let stats = self.upserter.upsert_batch(batch).await;
            totals.inserted += stats.inserted;
            totals.updated += stats.updated;
            totals.duplicate += stats.duplicate;
        }

        self.update_status(sport, provider_id, |s| {
            s.last_inserted = totals.inserted;
            s.last_updated = totals.updated;
            s.last_duplicate = totals.duplicate;
        });

        debug!(
            sport = %sport,
            provider = provider_id,
            inserted = totals.inserted,
            updated = totals.updated,
            duplicate = totals.duplicate,
            "cycle_finished"
        );

        if failures > 0 {
            CycleOutcome::Partial { failures, last_error }
        } else {
            CycleOutcome::Completed
        }
    }

    /// Map a raw batch. Ordered by player first so per-player records run
    /// adjacently through the mapper's resolution path; per-prop failures
    /// drop that prop only.
    async fn map_batch(
        &self,
        sport: Sport,
        provider_id: &str,
        mut raw: Vec<RawProp>,
    ) -> Vec<crate::models::CanonicalProp> {
        raw.sort_by(|a, b| a.external_player_id.cmp(&b.external_player_id));

        let mut batch = Vec::with_capacity(raw.len());
        for record in raw {
            self.note_game_status(&record.game_id, sport, record.game_status)
                .await;
            if record.game_status != GameStatus::Scheduled {
                continue;
            }

            match self.mapper.map(&record) {
                Ok(prop) => {
                    if prop.prop_type == PropType::Unknown {
                        self.metrics.record_taxonomy_miss();
                    }
                    batch.push(prop);
                }
                Err(e) => {
                    self.metrics.record_mapping_error(e.kind());
                    if matches!(
                        e,
                        crate::normalize::mapper::MappingError::Payout(
                            crate::normalize::payout::PayoutError::InsufficientPayoutData
                        )
                    ) {
                        self.metrics.record_payout_drop(provider_id);
                    }
                    warn!(
                        provider = provider_id,
                        sport = %sport,
                        category = %record.prop_category,
                        player = %record.player_name,
                        line = record.line_value,
                        error = %e,
                        "prop_mapping_failed"
                    );
                }
            }
        }
        batch
    }

    /// Record the latest observed status for a game; a transition off
    /// `Scheduled` invalidates every cached prop for that game.
    async fn note_game_status(&self, game_id: &str, sport: Sport, status: GameStatus) {
        let transition = {
            let mut statuses = self.game_statuses.lock();
            let prev = statuses.insert(game_id.to_string(), (sport, status));
            status != GameStatus::Scheduled && matches!(prev, Some((_, GameStatus::Scheduled)))
        };

        if transition {
            let removed = self.cache.invalidate_game(game_id).await;
            info!(game = game_id, status = status.as_str(), removed, "game_status_invalidation");
        }
    }

    fn any_live(&self, sport: Sport) -> bool {
        self.game_statuses
            .lock()
            .values()
            .any(|(s, status)| *s == sport && *status == GameStatus::Live)
    }

    fn update_status<F: FnOnce(&mut PairStatus)>(&self, sport: Sport, provider_id: &str, f: F) {
        let mut statuses = self.statuses.write();
        if let Some(status) = statuses.get_mut(&(sport, provider_id.to_string())) {
            f(status);
        }
    }

    /// Housekeeping: expired-entry sweeps, L2 invalidation retries and
    /// finished-game bookkeeping.
    async fn janitor_loop(&self, mut cancel: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(30));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let purged = self.cache.purge_expired();
            if purged > 0 {
                debug!(purged, "expired_entries_purged");
            }
            self.cache.drain_l2_retries().await;

            // Final games have no props left in cache; forget them.
            self.game_statuses
                .lock()
                .retain(|_, (_, status)| *status != GameStatus::Final);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::normalize::mapper::{IngestClock, PropMapper};
    use crate::normalize::payout::PayoutNormalizer;
    use crate::normalize::positions::PositionTable;
    use crate::normalize::taxonomy::TaxonomyService;
    use crate::normalize::teams::TeamTable;
    use crate::pipeline::upsert::BackpressureGauge;

    fn bare_orchestrator() -> Orchestrator {
        let metrics = Arc::new(PipelineMetrics::default());
        let cache = Arc::new(CacheManager::new(
            1000,
            None,
            PositionTable::new(),
            metrics.clone(),
            Duration::from_secs(120),
            Duration::from_secs(3600),
        ));
        let gauge = Arc::new(BackpressureGauge::new(10, 5, metrics.clone()));
        let upserter = Arc::new(Upserter::new(cache.clone(), None, metrics.clone(), gauge));
        let mapper = Arc::new(PropMapper::new(
            Arc::new(TaxonomyService::new(None).unwrap()),
            Arc::new(TeamTable::new()),
            Arc::new(PayoutNormalizer::default()),
            Arc::new(IngestClock::new()),
        ));
        Orchestrator::new(
            Arc::new(Config::default()),
            Vec::new(),
            mapper,
            upserter,
            cache,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_live_game_switches_cadence() {
        let orchestrator = bare_orchestrator();
        assert!(!orchestrator.any_live(Sport::Nba));

        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Scheduled)
            .await;
        assert!(!orchestrator.any_live(Sport::Nba));

        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Live)
            .await;
        assert!(orchestrator.any_live(Sport::Nba));
        // Live in one sport does not speed up the others.
        assert!(!orchestrator.any_live(Sport::Mlb));
    }

    #[tokio::test]
    async fn test_repeated_live_reports_invalidate_once() {
        let orchestrator = bare_orchestrator();
        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Scheduled)
            .await;

        // First transition invalidates; repeats are no-ops, so a game
        // reported live on every cycle doesn't hammer the cache tiers.
        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Live)
            .await;
        let map = orchestrator.game_statuses.lock().clone();
        assert_eq!(map.get("g1"), Some(&(Sport::Nba, GameStatus::Live)));

        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Live)
            .await;
        orchestrator
            .note_game_status("g1", Sport::Nba, GameStatus::Final)
            .await;
        let map = orchestrator.game_statuses.lock().clone();
        assert_eq!(map.get("g1"), Some(&(Sport::Nba, GameStatus::Final)));
    }
}
