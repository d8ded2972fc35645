//! pawaRisk — odds aggregation and risk monitoring pipeline.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! connects the store, runs cache warmup, wires the pipeline
//! (coordinator, write handler, scheduler, watchdog, broadcaster
//! bridge) and waits for Ctrl+C, tearing everything down in reverse
//! creation order.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use pawarisk::broadcast::Broadcaster;
use pawarisk::cache::OddsCache;
use pawarisk::config::AppConfig;
use pawarisk::engine::coordinator::Coordinator;
use pawarisk::engine::scheduler::{Scheduler, Watchdog};
use pawarisk::engine::{bridge_cache_updates, warmup, ShutdownSignal};
use pawarisk::mapping::cache::MappingCache;
use pawarisk::platforms::bet9ja::Bet9jaClient;
use pawarisk::platforms::betpawa::BetpawaClient;
use pawarisk::platforms::sportybet::SportybetClient;
use pawarisk::platforms::OddsPlatform;
use pawarisk::store::writer::{WriteHandler, WriteQueue};
use pawarisk::store::{PipelineStore, Store};

const BANNER: &str = r#"
                             ____  _      _
 _ __   __ ___      ____ _  |  _ \(_)___ | | __
| '_ \ / _` \ \ /\ / / _` | | |_) | / __|| |/ /
| |_) | (_| |\ V  V / (_| | |  _ <| \__ \|   <
| .__/ \__,_| \_/\_/ \__,_| |_| \_\_|___/|_|\_\
|_|
  Odds aggregation & risk monitoring pipeline
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        betpawa = %cfg.platforms.betpawa.base_url,
        sportybet = %cfg.platforms.sportybet.base_url,
        bet9ja = %cfg.platforms.bet9ja.base_url,
        "pawaRisk starting up"
    );

    // Store first: everything hangs off it.
    let database_url = AppConfig::resolve_env(&cfg.database.url_env)?;
    let store = Store::connect(&database_url, cfg.database.max_connections).await?;
    store.apply_schema().await?;
    let store: Arc<dyn PipelineStore> = Arc::new(store);

    // Shared state, created at startup, torn down in reverse order.
    let mapping = Arc::new(MappingCache::new());
    let cache = Arc::new(OddsCache::new());
    let broadcaster = Arc::new(Broadcaster::new(cfg.pipeline.broadcast_capacity));
    let shutdown = ShutdownSignal::new();

    // Warmup gates everything: no scheduler, no API until it returns.
    warmup::warm_up(&store, &mapping, &cache, cfg.pipeline.warmup_lookback_hours).await?;
    bridge_cache_updates(&cache, broadcaster.clone());

    // Platform clients.
    let clients: Vec<Arc<dyn OddsPlatform>> = vec![
        Arc::new(BetpawaClient::new(&cfg.platforms.betpawa).context("BetPawa client")?),
        Arc::new(SportybetClient::new(&cfg.platforms.sportybet).context("SportyBet client")?),
        Arc::new(Bet9jaClient::new(&cfg.platforms.bet9ja).context("Bet9ja client")?),
    ];

    // Write path: bounded queue, single handler.
    let queue = WriteQueue::new(cfg.pipeline.write_queue_capacity);
    let handler = WriteHandler::new(store.clone(), queue.clone());
    let writer_task = tokio::spawn(handler.run());

    // Coordinator, scheduler, watchdog.
    let coordinator = Arc::new(Coordinator::new(
        clients,
        mapping,
        cache,
        store.clone(),
        queue.clone(),
        broadcaster,
        shutdown.clone(),
        cfg.pipeline.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(coordinator, store.clone(), shutdown.clone()));
    let watchdog = Watchdog::new(store, shutdown.clone());

    let scheduler_task = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };
    let watchdog_task = tokio::spawn(async move { watchdog.run().await });

    info!("Pipeline running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;

    info!("Shutdown signal received, stopping pipeline...");
    shutdown.cancel();
    let _ = scheduler_task.await;
    let _ = watchdog_task.await;

    // Let the write handler drain whatever the last cycle enqueued.
    queue.close();
    let _ = writer_task.await;

    info!("pawaRisk shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
///
/// - In development (RUST_LOG set), uses human-readable format.
/// - With PAWARISK_LOG_JSON set, uses structured JSON logging.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pawarisk=info"));

    let json_logging = std::env::var("PAWARISK_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
