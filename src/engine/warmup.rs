//! Startup cache warmup.
//!
//! Before the scheduler arms and before the API collaborator is
//! served, the mapping cache is built from code plus operator entries,
//! the odds cache is rehydrated from the *current* relation (freshness
//! comes from `last_confirmed_at`, not row creation), and any RUNNING
//! runs left behind by a prior process are failed.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::cache::OddsCache;
use crate::mapping::cache::{MappingCache, MappingStats};
use crate::store::PipelineStore;

#[derive(Debug, Clone)]
pub struct WarmupReport {
    pub mapping_stats: MappingStats,
    pub snapshots_loaded: usize,
    pub markets_loaded: usize,
    pub stale_runs_failed: u64,
    pub duration_ms: u64,
}

/// Run the full warmup sequence. The caller must not serve traffic or
/// start the scheduler until this returns.
pub async fn warm_up(
    store: &Arc<dyn PipelineStore>,
    mapping: &MappingCache,
    cache: &OddsCache,
    lookback_hours: i64,
) -> Result<WarmupReport> {
    let clock = Instant::now();

    // 1. Mapping cache: code catalogue + operator overrides.
    let operator_mappings = store
        .load_operator_mappings()
        .await
        .context("Warmup failed to load operator mappings")?;
    mapping.initialize(operator_mappings);
    let mapping_stats = mapping.stats();

    // 2. Odds cache: latest current rows for events still in window.
    let cutoff = Utc::now() - Duration::hours(lookback_hours.max(0));
    let snapshots = store
        .load_current_snapshots(cutoff)
        .await
        .context("Warmup failed to load current odds")?;
    let snapshots_loaded = snapshots.len();
    let mut markets_loaded = 0usize;
    for snapshot in snapshots {
        markets_loaded += snapshot.markets.len();
        cache.load_snapshot(snapshot);
    }

    // 3. Stale-run recovery: a prior process can't still be RUNNING.
    let stale_runs_failed = store
        .fail_running_runs()
        .await
        .context("Warmup failed to recover stale runs")?;

    let duration_ms = clock.elapsed().as_millis() as u64;
    info!(
        code_mappings = mapping_stats.code_count,
        db_mappings = mapping_stats.db_count,
        snapshots = snapshots_loaded,
        markets = markets_loaded,
        stale_runs_failed,
        duration_ms,
        "Warmup complete"
    );

    Ok(WarmupReport {
        mapping_stats,
        snapshots_loaded,
        markets_loaded,
        stale_runs_failed,
        duration_ms,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
