//! propline - prop ingestion & canonicalization service.
//!
//! Wires the pipeline together: provider clients behind circuit breakers,
//! the normalization stages, the tiered cache and durable store, the
//! orchestrator's cadence loops and the HTTP query surface.

use anyhow::{Context, Result};
use clap::Parser;
use propline::api::{self, AppState};
use propline::cache::{CacheManager, L2Cache};
use propline::config::Config;
use propline::metrics::{self, PipelineMetrics};
use propline::normalize::mapper::{IngestClock, PropMapper};
use propline::normalize::payout::PayoutNormalizer;
use propline::normalize::positions::PositionTable;
use propline::normalize::taxonomy::TaxonomyService;
use propline::normalize::teams::TeamTable;
use propline::pipeline::{BackpressureGauge, Orchestrator, Upserter};
use propline::providers::{CircuitConfig, DraftKingsClient, PrizePicksClient, ProviderClient};
use propline::store::PropStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "propline", about = "Prop ingestion & canonicalization pipeline")]
struct Args {
    /// Run one fetch cycle per (sport, provider) pair and exit.
    #[arg(long, env = "RUN_ONCE")]
    run_once: bool,

    /// Skip cache warming from the durable store at startup.
    #[arg(long)]
    no_warm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("propline=info,tower_http=warn")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if args.run_once {
        config.run_once = true;
    }
    let config = Arc::new(config);

    info!(
        sports = ?config.sports,
        max_in_flight = config.max_in_flight,
        l1_capacity = config.cache_l1_capacity,
        "starting_propline"
    );

    let prometheus = metrics::install_recorder()?;
    let pipeline_metrics = Arc::new(PipelineMetrics::default());

    // Normalization stages, constructor-injected as immutable snapshots.
    let taxonomy = Arc::new(
        TaxonomyService::new(config.taxonomy_path.clone()).context("loading taxonomy tables")?,
    );
    let teams = Arc::new(match &config.taxonomy_path {
        Some(path) => TeamTable::from_overlay_file(std::path::Path::new(path))
            .context("loading team overlay")?,
        None => TeamTable::new(),
    });
    let positions = PositionTable::new();
    let payout = Arc::new(PayoutNormalizer::from_env());
    let clock = Arc::new(IngestClock::new());
    let mapper = Arc::new(PropMapper::new(
        taxonomy.clone(),
        teams,
        payout,
        clock,
    ));

    // Cache tiers: L2 is optional and its absence is only a degradation.
    let l2 = match &config.redis_url {
        Some(url) => match L2Cache::connect(url).await {
            Ok(l2) => Some(l2),
            Err(e) => {
                warn!(error = %e, "l2_unavailable_running_l1_only");
                None
            }
        },
        None => None,
    };
    let cache = Arc::new(CacheManager::new(
        config.cache_l1_capacity,
        l2,
        positions,
        pipeline_metrics.clone(),
        config.cache_ttl_live,
        config.cache_ttl_pregame,
    ));

    let store = match &config.database_url {
        Some(url) => match PropStore::connect(url, pipeline_metrics.clone()).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "store_unavailable_running_cache_only");
                None
            }
        },
        None => None,
    };

    let gauge = Arc::new(BackpressureGauge::new(
        config.upsert_high_water,
        config.upsert_low_water,
        pipeline_metrics.clone(),
    ));
    let upserter = Arc::new(Upserter::new(
        cache.clone(),
        store.clone(),
        pipeline_metrics.clone(),
        gauge.clone(),
    ));

    let circuit_config = CircuitConfig {
        failure_threshold: config.circuit_threshold,
        cooldown: config.circuit_cooldown,
        ..CircuitConfig::default()
    };
    let providers: Vec<Arc<dyn ProviderClient>> = vec![
        Arc::new(
            PrizePicksClient::new(config.request_timeout, circuit_config.clone())
                .context("building prizepicks client")?,
        ),
        Arc::new(
            DraftKingsClient::new(config.request_timeout, circuit_config)
                .context("building draftkings client")?,
        ),
    ];

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        providers,
        mapper,
        upserter,
        cache.clone(),
        pipeline_metrics.clone(),
    ));

    // Warm L1 from the store's most recent ingestion.
    if !args.no_warm {
        if let Some(store) = &store {
            match store.recent(None, config.cache_l1_capacity as i64).await {
                Ok(props) => orchestrator.warm_cache(props),
                Err(e) => warn!(error = %e, "cache_warming_failed"),
            }
        }
    }

    if config.taxonomy_hot_reload {
        #[cfg(unix)]
        spawn_sighup_reload(taxonomy.clone());
    }

    let state = AppState {
        cache,
        taxonomy,
        orchestrator: orchestrator.clone(),
        store: store.clone(),
        metrics: pipeline_metrics,
        gauge,
        prometheus,
        query_timeout: config.query_timeout,
        hot_reload_enabled: config.taxonomy_hot_reload,
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "api_listening");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "api_server_exited");
        }
    });

    // Degraded-store flush loop runs for the life of the process.
    if let Some(store) = store {
        let flush_cancel = cancel_rx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                tick.tick().await;
                if *flush_cancel.borrow() {
                    break;
                }
                if store.is_degraded() {
                    store.flush_buffer().await;
                }
            }
        });
    }

    if config.run_once {
        info!("run_once_mode");
        orchestrator.run(cancel_rx).await;
        return Ok(());
    }

    let pipeline = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(cancel_rx).await })
    };

    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("shutting_down");
    let _ = cancel_tx.send(true);
    let _ = pipeline.await;
    server.abort();

    Ok(())
}

/// SIGHUP reloads taxonomy tables, same path as the admin endpoint.
#[cfg(unix)]
fn spawn_sighup_reload(taxonomy: Arc<TaxonomyService>) {
    tokio::spawn(async move {
        let Ok(mut hup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            return;
        };
        while hup.recv().await.is_some() {
            match taxonomy.reload() {
                Ok(summary) => info!(
                    total = summary.total_mappings,
                    added = summary.added,
                    "taxonomy_reloaded_on_sighup"
                ),
                Err(e) => error!(error = %e, "sighup_taxonomy_reload_failed"),
            }
        }
    });
}
