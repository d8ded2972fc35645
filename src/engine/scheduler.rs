//! Periodic cycle trigger and stale-run watchdog.
//!
//! The scheduler arms a timer from `scrape_interval_minutes`
//! (re-read every lap so operator changes apply without restart) and
//! can be paused/resumed or triggered out of band by the scrape
//! control collaborator. The watchdog ticks independently and fails
//! RUNNING runs whose phase-log heartbeat went quiet; the transition
//! is optimistic and loses against a coordinator that finished first.

use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::{Coordinator, CycleOutcome};
use super::ShutdownSignal;
use crate::store::PipelineStore;

/// How often the watchdog looks for stuck runs.
const WATCHDOG_TICK: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    coordinator: Arc<Coordinator>,
    store: Arc<dyn PipelineStore>,
    shutdown: ShutdownSignal,
    paused: AtomicBool,
}

impl Scheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        store: Arc<dyn PipelineStore>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Scheduler {
            coordinator,
            store,
            shutdown,
            paused: AtomicBool::new(false),
        }
    }

    /// Pause the periodic trigger. One-off triggers still work.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        info!("Scheduler paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        info!("Scheduler resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Kick a one-off cycle. Refused while a run is already RUNNING,
    /// in this process or in the store.
    pub async fn trigger_now(&self) -> Result<CycleOutcome> {
        if self.coordinator.is_running() {
            anyhow::bail!("a scrape run is already in progress");
        }
        if self.store.has_running_run().await? {
            anyhow::bail!("a scrape run is already RUNNING in the store");
        }
        self.coordinator.run_cycle().await
    }

    /// Periodic loop until shutdown. The interval is re-read from
    /// settings each lap.
    pub async fn run(&self) {
        info!("Scheduler started");
        loop {
            let interval_minutes = match self.store.load_settings().await {
                Ok(settings) => settings.scrape_interval_minutes.max(1),
                Err(error) => {
                    warn!(%error, "Settings load failed, keeping default interval");
                    10
                }
            };
            let sleep = Duration::from_secs(interval_minutes as u64 * 60);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }

            if self.is_paused() {
                debug!("Scheduler paused, skipping tick");
                continue;
            }
            match self.coordinator.run_cycle().await {
                Ok(outcome) => {
                    debug!(run_id = %outcome.run_id, status = %outcome.status, "Scheduled cycle done");
                }
                Err(error) => {
                    warn!(%error, "Scheduled cycle refused or failed to start");
                }
            }
        }
        info!("Scheduler stopped");
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

pub struct Watchdog {
    store: Arc<dyn PipelineStore>,
    shutdown: ShutdownSignal,
    tick: Duration,
}

impl Watchdog {
    pub fn new(store: Arc<dyn PipelineStore>, shutdown: ShutdownSignal) -> Self {
        Watchdog {
            store,
            shutdown,
            tick: WATCHDOG_TICK,
        }
    }

    /// Override the tick period (tests).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// One sweep: fail RUNNING runs with no phase-log progress inside
    /// the staleness threshold.
    pub async fn tick_once(&self) -> Result<Vec<Uuid>> {
        let threshold_minutes = self
            .store
            .load_settings()
            .await
            .map(|s| s.staleness_threshold_minutes.max(1))
            .unwrap_or(10);
        let failed = self
            .store
            .fail_stale_runs(chrono::Duration::minutes(threshold_minutes), Utc::now())
            .await?;
        for run_id in &failed {
            warn!(%run_id, threshold_minutes, "Stale run failed by watchdog");
        }
        Ok(failed)
    }

    /// Periodic loop until shutdown.
    pub async fn run(&self) {
        info!(tick_secs = self.tick.as_secs(), "Stale-run watchdog started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
            if let Err(error) = self.tick_once().await {
                warn!(%error, "Watchdog sweep failed");
            }
        }
        info!("Stale-run watchdog stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
