//! End-to-end pipeline tests with stub providers: fetch cycles through
//! mapping, dedup, cache and the query surface, without any network.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use propline::cache::{CacheManager, PropQuery};
use propline::config::Config;
use propline::metrics::PipelineMetrics;
use propline::models::{Game, GameStatus, MarketType, PayoutType, PropType, RawProp, Sport};
use propline::normalize::mapper::{IngestClock, PropMapper};
use propline::normalize::payout::PayoutNormalizer;
use propline::normalize::positions::PositionTable;
use propline::normalize::taxonomy::TaxonomyService;
use propline::normalize::teams::TeamTable;
use propline::pipeline::{BackpressureGauge, Orchestrator, Upserter};
use propline::providers::{
    CircuitBreaker, CircuitConfig, CircuitSnapshot, ProviderClient, ProviderError,
};
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct StubProvider {
    id: &'static str,
    games: Mutex<Vec<Game>>,
    props: Mutex<Vec<RawProp>>,
    /// Fail this many upstream calls before succeeding again.
    fail_remaining: AtomicU32,
    /// Calls that actually reached "the network" (circuit-open calls
    /// never count).
    network_calls: AtomicU32,
    circuit: CircuitBreaker,
}

impl StubProvider {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            games: Mutex::new(Vec::new()),
            props: Mutex::new(Vec::new()),
            fail_remaining: AtomicU32::new(0),
            network_calls: AtomicU32::new(0),
            circuit: CircuitBreaker::new(
                id,
                CircuitConfig {
                    cooldown: Duration::from_millis(200),
                    cooldown_cap: Duration::from_millis(2000),
                    ..CircuitConfig::default()
                },
            ),
        }
    }

    fn set_games(&self, games: Vec<Game>) {
        *self.games.lock() = games;
    }

    fn set_props(&self, props: Vec<RawProp>) {
        *self.props.lock() = props;
    }

    fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    fn network_calls(&self) -> u32 {
        self.network_calls.load(Ordering::SeqCst)
    }

    /// The same gate/record discipline the real HTTP plumbing applies.
    fn call_upstream(&self) -> Result<(), ProviderError> {
        if let Err(retry_in) = self.circuit.try_acquire() {
            return Err(ProviderError::CircuitOpen { retry_in });
        }
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            self.circuit.record_failure();
            return Err(ProviderError::UpstreamUnavailable { status: Some(500) });
        }
        self.circuit.record_success();
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
    fn provider_id(&self) -> &'static str {
        self.id
    }

    async fn fetch_scheduled_games(&self, sport: Sport) -> Result<Vec<Game>, ProviderError> {
        self.call_upstream()?;
        Ok(self
            .games
            .lock()
            .iter()
            .filter(|g| g.sport == sport && g.status == GameStatus::Scheduled)
            .cloned()
            .collect())
    }

    async fn fetch_props(
        &self,
        sport: Sport,
        _game_ids: &[String],
        market: MarketType,
    ) -> Result<Vec<RawProp>, ProviderError> {
        self.call_upstream()?;
        let props = self.props.lock();
        Ok(props
            .iter()
            .filter(|p| {
                let is_team = p.position.eq_ignore_ascii_case("TEAM");
                p.sport == sport
                    && match market {
                        MarketType::PlayerProps => !is_team,
                        MarketType::TeamProps => is_team,
                    }
            })
            .cloned()
            .collect())
    }

    fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.circuit.snapshot()
    }
}

struct Pipeline {
    orchestrator: Arc<Orchestrator>,
    cache: Arc<CacheManager>,
    taxonomy: Arc<TaxonomyService>,
}

fn build_pipeline(
    providers: Vec<Arc<StubProvider>>,
    sports: Vec<Sport>,
    taxonomy_path: Option<String>,
) -> Pipeline {
    let mut config = Config::default();
    config.run_once = true;
    config.sports = sports;

    let metrics = Arc::new(PipelineMetrics::default());
    let taxonomy = Arc::new(TaxonomyService::new(taxonomy_path).unwrap());
    let mapper = Arc::new(PropMapper::new(
        taxonomy.clone(),
        Arc::new(TeamTable::new()),
        Arc::new(PayoutNormalizer::default()),
        Arc::new(IngestClock::new()),
    ));
    let cache = Arc::new(CacheManager::new(
        10_000,
        None,
        PositionTable::new(),
        metrics.clone(),
        Duration::from_secs(120),
        Duration::from_secs(3600),
    ));
    let gauge = Arc::new(BackpressureGauge::new(10_000, 5_000, metrics.clone()));
    let upserter = Arc::new(Upserter::new(cache.clone(), None, metrics.clone(), gauge));

    let providers: Vec<Arc<dyn ProviderClient>> = providers
        .into_iter()
        .map(|p| p as Arc<dyn ProviderClient>)
        .collect();

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(config),
        providers,
        mapper,
        upserter,
        cache.clone(),
        metrics,
    ));

    Pipeline {
        orchestrator,
        cache,
        taxonomy,
    }
}

async fn run_cycles(pipeline: &Pipeline) {
    let (_tx, rx) = watch::channel(false);
    pipeline.orchestrator.clone().run(rx).await;
}

fn scheduled_game(game_id: &str, sport: Sport) -> Game {
    Game {
        game_id: game_id.to_string(),
        sport,
        home_team: "Los Angeles Lakers".to_string(),
        away_team: "Boston Celtics".to_string(),
        start_ts: Utc::now() + chrono::Duration::hours(4),
        status: GameStatus::Scheduled,
    }
}

#[allow(clippy::too_many_arguments)]
fn raw_prop(
    provider: &str,
    offer: &str,
    sport: Sport,
    player: &str,
    position: &str,
    category: &str,
    line: f64,
    odds: (Option<f64>, Option<f64>),
    payout_type: PayoutType,
    game_id: &str,
) -> RawProp {
    RawProp {
        provider_id: provider.to_string(),
        external_prop_id: offer.to_string(),
        external_player_id: format!("{provider}-{player}"),
        player_name: player.to_string(),
        team_code: "Los Angeles Lakers".to_string(),
        position: position.to_string(),
        prop_category: category.to_string(),
        line_value: line,
        payout_type,
        over_odds: odds.0,
        under_odds: odds.1,
        boost_flagged: false,
        updated_ts: Utc::now(),
        sport,
        game_id: game_id.to_string(),
        game_status: GameStatus::Scheduled,
        game_start_ts: Utc::now() + chrono::Duration::hours(4),
    }
}

#[tokio::test]
async fn test_multi_provider_same_prop_distinct_hashes() {
    let prizepicks = Arc::new(StubProvider::new("prizepicks"));
    let draftkings = Arc::new(StubProvider::new("draftkings"));

    prizepicks.set_games(vec![scheduled_game("g1", Sport::Nba)]);
    prizepicks.set_props(vec![raw_prop(
        "prizepicks",
        "pp-1",
        Sport::Nba,
        "LeBron James",
        "F",
        "PTS",
        25.5,
        (Some(3.0), Some(2.5)),
        PayoutType::Multiplier,
        "g1",
    )]);

    draftkings.set_games(vec![scheduled_game("g1", Sport::Nba)]);
    draftkings.set_props(vec![raw_prop(
        "draftkings",
        "dk-1",
        Sport::Nba,
        "LeBron James",
        "",
        "Player Points",
        25.5,
        (Some(-110.0), Some(110.0)),
        PayoutType::Standard,
        "g1",
    )]);

    let pipeline = build_pipeline(vec![prizepicks, draftkings], vec![Sport::Nba], None);
    run_cycles(&pipeline).await;

    let page = pipeline.cache.query(
        Sport::Nba,
        &PropQuery {
            size: 50,
            ..Default::default()
        },
    );
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().all(|p| p.prop_type == PropType::Points));
    assert!(page.items.iter().all(|p| p.offered_line == 25.5));
    assert_ne!(page.items[0].line_hash, page.items[1].line_hash);

    let multipliers: Vec<f64> = page.items.iter().map(|p| p.payout.over_multiplier).collect();
    assert!(multipliers.contains(&3.000));
    assert!(multipliers.contains(&1.909));
}

#[tokio::test]
async fn test_position_filter_hides_pitcher_batter_stats() {
    let provider = Arc::new(StubProvider::new("prizepicks"));
    provider.set_games(vec![scheduled_game("g2", Sport::Mlb)]);
    provider.set_props(vec![
        raw_prop(
            "prizepicks",
            "pp-hits",
            Sport::Mlb,
            "Gerrit Cole",
            "1",
            "hits",
            0.5,
            (Some(2.8), Some(1.4)),
            PayoutType::Multiplier,
            "g2",
        ),
        raw_prop(
            "prizepicks",
            "pp-ks",
            Sport::Mlb,
            "Gerrit Cole",
            "1",
            "Pitcher Strikeouts",
            6.5,
            (Some(1.9), Some(1.9)),
            PayoutType::Multiplier,
            "g2",
        ),
    ]);

    let pipeline = build_pipeline(vec![provider], vec![Sport::Mlb], None);
    run_cycles(&pipeline).await;

    // Both ingested...
    assert_eq!(pipeline.cache.len(), 2);

    // ...but the impossible combination is off the default surface.
    let default_page = pipeline.cache.query(
        Sport::Mlb,
        &PropQuery {
            size: 50,
            ..Default::default()
        },
    );
    assert_eq!(default_page.items.len(), 1);
    assert_eq!(default_page.items[0].prop_type, PropType::PitcherStrikeouts);

    let curation = pipeline.cache.query(
        Sport::Mlb,
        &PropQuery {
            size: 50,
            include_incompatible: true,
            ..Default::default()
        },
    );
    assert_eq!(curation.items.len(), 2);
}

#[tokio::test]
async fn test_circuit_open_stops_network_calls() {
    let provider = Arc::new(StubProvider::new("prizepicks"));
    provider.set_games(vec![scheduled_game("g3", Sport::Nba)]);
    provider.fail_next(100);

    let pipeline = build_pipeline(vec![provider.clone()], vec![Sport::Nba], None);

    // Five failing cycles trip the breaker (each cycle makes one games
    // call before failing out).
    for _ in 0..5 {
        run_cycles(&pipeline).await;
    }
    assert_eq!(provider.network_calls(), 5);

    // Circuit open: further cycles never reach the network.
    for _ in 0..3 {
        run_cycles(&pipeline).await;
    }
    assert_eq!(provider.network_calls(), 5);

    // After cooldown one probe is admitted; success closes the circuit
    // and the cycle proceeds (games + two market fetches).
    tokio::time::sleep(Duration::from_millis(250)).await;
    provider.fail_next(0);
    run_cycles(&pipeline).await;
    assert_eq!(provider.network_calls(), 8);
}

#[tokio::test]
async fn test_game_status_change_invalidates_cached_props() {
    let provider = Arc::new(StubProvider::new("prizepicks"));
    provider.set_games(vec![scheduled_game("g4", Sport::Nba)]);
    provider.set_props(vec![raw_prop(
        "prizepicks",
        "pp-9",
        Sport::Nba,
        "LeBron James",
        "F",
        "PTS",
        25.5,
        (Some(3.0), Some(2.5)),
        PayoutType::Multiplier,
        "g4",
    )]);

    let pipeline = build_pipeline(vec![provider.clone()], vec![Sport::Nba], None);
    run_cycles(&pipeline).await;
    assert_eq!(pipeline.cache.len(), 1);

    // Next cycle reports the game live.
    let mut live_prop = provider.props.lock()[0].clone();
    live_prop.game_status = GameStatus::Live;
    provider.set_props(vec![live_prop]);
    provider.set_games(vec![]);

    run_cycles(&pipeline).await;
    assert!(pipeline.cache.by_game("g4").is_empty());
    let page = pipeline.cache.query(
        Sport::Nba,
        &PropQuery {
            size: 50,
            ..Default::default()
        },
    );
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn test_empty_provider_response_completes_cleanly() {
    let provider = Arc::new(StubProvider::new("prizepicks"));
    provider.set_games(vec![scheduled_game("g5", Sport::Nba)]);

    let pipeline = build_pipeline(vec![provider], vec![Sport::Nba], None);
    run_cycles(&pipeline).await;

    assert!(pipeline.cache.is_empty());
    let statuses = pipeline.orchestrator.pair_statuses();
    assert!(statuses
        .iter()
        .all(|s| s.last_error.is_none() && s.cycles_failed == 0));
}

#[tokio::test]
async fn test_taxonomy_miss_then_reload_recovers() {
    let mut overlay = tempfile::NamedTempFile::new().unwrap();

    let provider = Arc::new(StubProvider::new("prizepicks"));
    provider.set_games(vec![scheduled_game("g6", Sport::Mlb)]);
    provider.set_props(vec![raw_prop(
        "prizepicks",
        "pp-outs",
        Sport::Mlb,
        "Gerrit Cole",
        "1",
        "Pitcher Outs Recorded",
        16.5,
        (Some(1.8), Some(1.8)),
        PayoutType::Multiplier,
        "g6",
    )]);

    let pipeline = build_pipeline(
        vec![provider.clone()],
        vec![Sport::Mlb],
        Some(overlay.path().to_string_lossy().into_owned()),
    );
    run_cycles(&pipeline).await;

    // Stored but invisible, and the miss is on record for curation.
    assert_eq!(pipeline.cache.len(), 1);
    let page = pipeline.cache.query(
        Sport::Mlb,
        &PropQuery {
            size: 50,
            ..Default::default()
        },
    );
    assert!(page.items.is_empty());
    assert!(pipeline
        .taxonomy
        .misses()
        .iter()
        .any(|m| m.category == "Pitcher Outs Recorded"));

    // Operator installs the mapping and reloads.
    writeln!(
        overlay,
        r#"
[[mapping]]
provider = "prizepicks"
sport = "mlb"
category = "Pitcher Outs Recorded"
prop_type = "pitcher_strikeouts"
"#
    )
    .unwrap();
    overlay.flush().unwrap();
    let summary = pipeline.taxonomy.reload().unwrap();
    assert_eq!(summary.resolved_misses, 1);

    run_cycles(&pipeline).await;
    let page = pipeline.cache.query(
        Sport::Mlb,
        &PropQuery {
            size: 50,
            ..Default::default()
        },
    );
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].prop_type, PropType::PitcherStrikeouts);
}
