//! Event coordinator — the critical loop.
//!
//! Drives one scrape cycle end to end: parallel per-platform
//! discovery joined by sportradar id, a priority queue of event
//! targets, batched per-event scraping inside per-platform
//! concurrency ceilings, change classification against the odds
//! cache, risk detection, cache update and the hand-off to the
//! asynchronous write queue. All API I/O for an event completes
//! before any state mutates (fetch-then-store); the write handler
//! owns its own store sessions.

use anyhow::Result;
use chrono::Utc;
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::change::{self, Classification};
use super::risk::{AlertThresholds, RiskDetector};
use super::ShutdownSignal;
use crate::broadcast::{Broadcaster, Topic};
use crate::cache::OddsCache;
use crate::config::{PipelineConfig, Settings};
use crate::mapping::{self, cache::MappingCache};
use crate::platforms::{OddsPlatform, PlatformEvent, RawMarkets};
use crate::store::writer::WriteQueue;
use crate::store::PipelineStore;
use crate::types::{
    Bookmaker, EventTarget, MarketCurrentWrite, PlatformEventRef, ProgressEvent, RiskAlert,
    ScrapeErrorKind, ScrapeRunStatus, WriteBatch, synthetic_event_id,
};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Summary of one completed (or failed) cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub run_id: Uuid,
    pub status: ScrapeRunStatus,
    pub event_count: usize,
    pub markets_written: usize,
    pub changed_markets: usize,
    pub alert_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug)]
struct FetchFailure {
    kind: ScrapeErrorKind,
    message: String,
}

#[derive(Default)]
struct EventOutcome {
    writes: Vec<MarketCurrentWrite>,
    alerts: Vec<RiskAlert>,
    platform_errors: usize,
}

struct DiscoveryOutcome {
    targets: Vec<EventTarget>,
    /// Market payloads that arrived with discovery listings (the
    /// reference platform ships depth in one pass).
    prefetched: HashMap<(i64, Bookmaker), RawMarkets>,
    attempted_platforms: usize,
    failed_platforms: usize,
    platform_counts: HashMap<String, usize>,
}

/// Resets the running flag even on early return.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Priority queue
// ---------------------------------------------------------------------------

/// Soonest kickoff first; more platform coverage ahead; reference
/// platform presence breaks ties.
pub(crate) fn sort_targets(targets: &mut [EventTarget]) {
    targets.sort_by_key(|t| {
        (
            t.kickoff_time,
            Reverse(t.coverage()),
            Reverse(t.has_betpawa() as u8),
        )
    });
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    clients: HashMap<Bookmaker, Arc<dyn OddsPlatform>>,
    mapping: Arc<MappingCache>,
    cache: Arc<OddsCache>,
    store: Arc<dyn PipelineStore>,
    queue: WriteQueue,
    broadcaster: Arc<Broadcaster>,
    shutdown: ShutdownSignal,
    pipeline: PipelineConfig,
    cycle_running: AtomicBool,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Vec<Arc<dyn OddsPlatform>>,
        mapping: Arc<MappingCache>,
        cache: Arc<OddsCache>,
        store: Arc<dyn PipelineStore>,
        queue: WriteQueue,
        broadcaster: Arc<Broadcaster>,
        shutdown: ShutdownSignal,
        pipeline: PipelineConfig,
    ) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.bookmaker(), client))
            .collect();
        Coordinator {
            clients,
            mapping,
            cache,
            store,
            queue,
            broadcaster,
            shutdown,
            pipeline,
            cycle_running: AtomicBool::new(false),
        }
    }

    /// Whether a cycle is currently in flight in this process.
    pub fn is_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Run one full scrape cycle. Refuses while another cycle is in
    /// flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            anyhow::bail!("a scrape run is already in progress");
        }
        let _guard = RunningGuard(&self.cycle_running);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let settings = match self.store.load_settings().await {
            Ok(settings) => settings,
            Err(error) => {
                warn!(%error, "Settings load failed, using defaults for this cycle");
                Settings::default()
            }
        };

        self.store.create_run(run_id, started_at).await?;
        self.broadcaster
            .publish_progress(&ProgressEvent::CycleStart { run_id });
        self.log_phase(run_id, "cycle_start", None).await;

        info!(%run_id, platforms = settings.enabled_platforms.len(), "Scrape cycle starting");

        // 1. Discovery.
        let discovery = self.discover(run_id, &settings).await;
        if discovery.attempted_platforms == 0
            || discovery.failed_platforms == discovery.attempted_platforms
        {
            return self
                .fail_cycle(run_id, clock, 0, "discovery failed for all enabled platforms")
                .await;
        }
        self.broadcaster
            .publish_progress(&ProgressEvent::DiscoveryComplete {
                run_id,
                event_count: discovery.targets.len(),
                platform_counts: discovery.platform_counts.clone(),
            });
        self.log_phase(run_id, "discovery_complete", None).await;

        // 2. Priority queue.
        let mut targets = discovery.targets;
        sort_targets(&mut targets);
        let event_count = targets.len();
        if event_count == 0 {
            return self.fail_cycle(run_id, clock, 0, "discovery produced zero events").await;
        }

        let semaphores: HashMap<Bookmaker, Arc<Semaphore>> = settings
            .enabled_platforms
            .iter()
            .map(|&bk| (bk, Arc::new(Semaphore::new(settings.concurrency(bk)))))
            .collect();
        let prefetched = Arc::new(discovery.prefetched);

        // 3. Batch loop.
        let batch_size = settings.batch_size.max(1);
        let batch_count = event_count.div_ceil(batch_size);
        let mut platform_errors = discovery.failed_platforms;
        let mut markets_written = 0usize;
        let mut changed_markets = 0usize;
        let mut alert_count = 0usize;
        let mut cancelled = false;

        for (batch_index, chunk) in targets.chunks(batch_size).enumerate() {
            if self.shutdown.is_cancelled() {
                cancelled = true;
                break;
            }

            self.broadcaster.publish_progress(&ProgressEvent::BatchStart {
                run_id,
                batch_index,
                batch_count,
                event_count: chunk.len(),
            });
            self.log_phase(run_id, &format!("batch_{batch_index}"), None).await;

            let outcomes: Vec<EventOutcome> = futures::stream::iter(chunk.to_vec())
                .map(|target| self.process_event(run_id, target, &settings, &semaphores, prefetched.clone()))
                .buffer_unordered(self.pipeline.event_concurrency.max(1))
                .collect()
                .await;

            // 4. Batch commit: whatever accumulated is enqueued even
            // when cancellation interrupted the batch.
            let mut batch = WriteBatch::new(run_id, Utc::now());
            for outcome in outcomes {
                platform_errors += outcome.platform_errors;
                batch.writes.extend(outcome.writes);
                batch.alerts.extend(outcome.alerts);
            }
            let batch_markets = batch.writes.len();
            markets_written += batch_markets;
            changed_markets += batch.changed_count();
            alert_count += batch.alerts.len();
            if !batch.is_empty() {
                self.queue.enqueue(batch);
            }

            self.broadcaster.publish_progress(&ProgressEvent::BatchComplete {
                run_id,
                batch_index,
                markets_written: batch_markets,
            });

            if self.shutdown.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        // 5. Finalize.
        let duration_ms = clock.elapsed().as_millis() as u64;
        if cancelled {
            self.store
                .record_error(run_id, ScrapeErrorKind::Cancelled, "cycle cancelled", None)
                .await
                .ok();
            self.broadcaster.publish_progress(&ProgressEvent::CycleFailed {
                run_id,
                reason: "cancelled".to_string(),
            });
            self.store
                .set_run_status(run_id, ScrapeRunStatus::Failed, Some(Utc::now()), true)
                .await
                .ok();
            info!(%run_id, duration_ms, "Scrape cycle cancelled");
            return Ok(CycleOutcome {
                run_id,
                status: ScrapeRunStatus::Failed,
                event_count,
                markets_written,
                changed_markets,
                alert_count,
                duration_ms,
            });
        }

        let status = if markets_written == 0 {
            ScrapeRunStatus::Failed
        } else if platform_errors > 0 {
            ScrapeRunStatus::Partial
        } else {
            ScrapeRunStatus::Completed
        };

        if status == ScrapeRunStatus::Failed {
            self.broadcaster.publish_progress(&ProgressEvent::CycleFailed {
                run_id,
                reason: "zero markets stored".to_string(),
            });
        } else {
            self.broadcaster.publish_progress(&ProgressEvent::CycleComplete {
                run_id,
                status,
                event_count,
                changed_markets,
                duration_ms,
            });
        }

        // Guarded: if the watchdog concurrently failed the run, its
        // verdict stands.
        let applied = self
            .store
            .set_run_status(run_id, status, Some(Utc::now()), true)
            .await
            .unwrap_or(false);
        if !applied {
            warn!(%run_id, "Run already transitioned (watchdog?), keeping its status");
        }
        self.log_phase(run_id, "cycle_complete", None).await;

        info!(
            %run_id,
            status = %status,
            events = event_count,
            markets = markets_written,
            changed = changed_markets,
            alerts = alert_count,
            duration_ms,
            "Scrape cycle finished"
        );

        Ok(CycleOutcome {
            run_id,
            status,
            event_count,
            markets_written,
            changed_markets,
            alert_count,
            duration_ms,
        })
    }

    // -- Discovery -------------------------------------------------------

    async fn discover(&self, run_id: Uuid, settings: &Settings) -> DiscoveryOutcome {
        let mut fetches = Vec::new();
        for (&bookmaker, client) in &self.clients {
            if !settings.is_enabled(bookmaker) {
                continue;
            }
            let client = client.clone();
            let limit = settings.concurrency(bookmaker);
            let delay = settings.request_delay(bookmaker);
            fetches.push(async move {
                (bookmaker, discover_platform(client, limit, delay).await)
            });
        }

        let results = futures::future::join_all(fetches).await;
        let attempted_platforms = results.len();
        let mut failed_platforms = 0usize;
        let mut platform_counts = HashMap::new();
        let mut per_platform: Vec<(Bookmaker, Vec<PlatformEvent>)> = Vec::new();

        for (bookmaker, result) in results {
            match result {
                Ok(events) => {
                    platform_counts.insert(bookmaker.slug().to_string(), events.len());
                    per_platform.push((bookmaker, events));
                }
                Err(failure) => {
                    warn!(%bookmaker, error = %failure.message, "Platform discovery failed");
                    failed_platforms += 1;
                    self.store
                        .record_error(run_id, failure.kind, &failure.message, Some(bookmaker))
                        .await
                        .ok();
                }
            }
        }

        // Reference platform first so joined events carry its ids.
        per_platform.sort_by_key(|(bookmaker, _)| !bookmaker.is_reference());

        let mut targets: Vec<EventTarget> = Vec::new();
        let mut by_sportradar: HashMap<String, usize> = HashMap::new();
        let mut prefetched = HashMap::new();

        for (bookmaker, events) in per_platform {
            for event in events {
                let platform_ref = PlatformEventRef {
                    bookmaker,
                    external_id: event.external_id.clone(),
                    fetch_id: event.fetch_id.clone(),
                };

                let index = match event
                    .sportradar_id
                    .as_ref()
                    .and_then(|sr| by_sportradar.get(sr))
                {
                    Some(&index) => {
                        let target = &mut targets[index];
                        if target.platform(bookmaker).is_none() {
                            target.platforms.push(platform_ref);
                        }
                        index
                    }
                    None => {
                        let event_id = match &event.sportradar_id {
                            Some(sr) => match self
                                .store
                                .resolve_event_id(
                                    sr,
                                    event.kickoff_time,
                                    &event.home_team,
                                    &event.away_team,
                                )
                                .await
                            {
                                Ok(id) => id,
                                Err(error) => {
                                    warn!(%error, sportradar_id = %sr, "Event upsert failed, using synthetic id");
                                    synthetic_event_id(bookmaker, &event.external_id)
                                }
                            },
                            // Competitor-only events keep a synthetic
                            // positive id; coverage comparison still
                            // sees them.
                            None => synthetic_event_id(bookmaker, &event.external_id),
                        };
                        targets.push(EventTarget {
                            event_id,
                            sportradar_id: event.sportradar_id.clone(),
                            kickoff_time: event.kickoff_time,
                            home_team: event.home_team.clone(),
                            away_team: event.away_team.clone(),
                            platforms: vec![platform_ref],
                        });
                        if let Some(sr) = &event.sportradar_id {
                            by_sportradar.insert(sr.clone(), targets.len() - 1);
                        }
                        targets.len() - 1
                    }
                };

                if let Some(raw) = event.raw_markets {
                    prefetched.insert((targets[index].event_id, bookmaker), raw);
                }
            }
        }

        debug!(
            targets = targets.len(),
            prefetched = prefetched.len(),
            failed_platforms,
            "Discovery joined"
        );

        DiscoveryOutcome {
            targets,
            prefetched,
            attempted_platforms,
            failed_platforms,
            platform_counts,
        }
    }

    // -- Per-event scraping ----------------------------------------------

    async fn process_event(
        &self,
        run_id: Uuid,
        target: EventTarget,
        settings: &Settings,
        semaphores: &HashMap<Bookmaker, Arc<Semaphore>>,
        prefetched: Arc<HashMap<(i64, Bookmaker), RawMarkets>>,
    ) -> EventOutcome {
        let mut outcome = EventOutcome::default();

        // Fetch phase: all platforms of this event in parallel, inside
        // their per-platform semaphores, racing the shared deadline.
        let results: Arc<Mutex<Vec<(Bookmaker, Result<RawMarkets, FetchFailure>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let mut fetches = Vec::new();

        for platform_ref in &target.platforms {
            let bookmaker = platform_ref.bookmaker;
            if !settings.is_enabled(bookmaker) {
                continue;
            }
            let Some(client) = self.clients.get(&bookmaker).cloned() else {
                continue;
            };
            let semaphore = semaphores.get(&bookmaker).cloned();
            let delay = settings.request_delay(bookmaker);
            let fetch_ref = platform_ref.fetch_ref().to_string();
            let event_id = target.event_id;
            let shutdown = self.shutdown.clone();
            let broadcaster = self.broadcaster.clone();
            let prefetched = prefetched.clone();
            let results = results.clone();

            fetches.push(async move {
                broadcaster.publish_progress(&ProgressEvent::EventScraping {
                    run_id,
                    event_id,
                    bookmaker,
                });
                let fetch_started = Instant::now();

                let result: Result<RawMarkets, FetchFailure> = async {
                    if let Some(raw) = prefetched.get(&(event_id, bookmaker)) {
                        return Ok(raw.clone());
                    }
                    if !client.requires_event_fetch() {
                        return Err(FetchFailure {
                            kind: ScrapeErrorKind::Parse,
                            message: "listing carried no market payload".to_string(),
                        });
                    }
                    let _permit = match &semaphore {
                        Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                        None => None,
                    };
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => Err(FetchFailure {
                            kind: ScrapeErrorKind::Cancelled,
                            message: "cycle cancelled".to_string(),
                        }),
                        fetched = client.fetch_event(&fetch_ref) => fetched.map_err(|error| {
                            FetchFailure { kind: error.kind(), message: error.to_string() }
                        }),
                    }
                }
                .await;

                broadcaster.publish_progress(&ProgressEvent::EventScraped {
                    run_id,
                    event_id,
                    bookmaker,
                    success: result.is_ok(),
                    duration_ms: fetch_started.elapsed().as_millis() as u64,
                    error_kind: result.as_ref().err().map(|f| f.kind),
                });
                results.lock().push((bookmaker, result));
            });
        }

        let deadline = Duration::from_secs(self.pipeline.event_deadline_secs.max(1));
        let deadline_hit =
            tokio::time::timeout(deadline, futures::future::join_all(fetches)).await.is_err();

        let fetched: Vec<(Bookmaker, Result<RawMarkets, FetchFailure>)> =
            std::mem::take(&mut *results.lock());
        let finished: HashSet<Bookmaker> = fetched.iter().map(|(bk, _)| *bk).collect();

        if deadline_hit {
            for platform_ref in &target.platforms {
                let bookmaker = platform_ref.bookmaker;
                if !settings.is_enabled(bookmaker) || finished.contains(&bookmaker) {
                    continue;
                }
                outcome.platform_errors += 1;
                self.broadcaster.publish_progress(&ProgressEvent::EventScraped {
                    run_id,
                    event_id: target.event_id,
                    bookmaker,
                    success: false,
                    duration_ms: deadline.as_millis() as u64,
                    error_kind: Some(ScrapeErrorKind::Timeout),
                });
                self.store
                    .record_error(
                        run_id,
                        ScrapeErrorKind::Timeout,
                        &format!("event {} exceeded the per-event deadline", target.event_id),
                        Some(bookmaker),
                    )
                    .await
                    .ok();
            }
        }

        // CPU phase: fetch-then-store — no HTTP from here on.
        let now = Utc::now();
        let indexes = self.mapping.snapshot();
        let mut classifications: Vec<(Bookmaker, Classification)> = Vec::new();

        for (bookmaker, result) in fetched {
            match result {
                Ok(raw) => {
                    let mapped = mapping::map_markets(&indexes, &raw);
                    if !mapped.failures.is_empty() {
                        debug!(
                            event_id = target.event_id,
                            %bookmaker,
                            skipped = mapped.failures.len(),
                            "Markets skipped by mapping"
                        );
                        if let Err(error) = self.store.log_unmapped(&mapped.failures).await {
                            warn!(%error, "Unmapped-market log write failed");
                        }
                    }
                    let cached = self.cache.get_snapshot(target.event_id, bookmaker);
                    let classification = change::classify(
                        target.event_id,
                        bookmaker,
                        &mapped.markets,
                        cached.as_deref(),
                        now,
                    );
                    classifications.push((bookmaker, classification));
                }
                Err(failure) if failure.kind == ScrapeErrorKind::Cancelled => {
                    // Control flow, not a failure.
                }
                Err(failure) => {
                    outcome.platform_errors += 1;
                    self.store
                        .record_error(run_id, failure.kind, &failure.message, Some(bookmaker))
                        .await
                        .ok();
                }
            }
        }

        // Risk detection across this event's platforms.
        let detector = RiskDetector::new(
            AlertThresholds::from_settings(settings),
            self.pipeline.imminent_window_minutes,
        );
        let per_platform: Vec<(Bookmaker, &Classification)> = classifications
            .iter()
            .map(|(bookmaker, classification)| (*bookmaker, classification))
            .collect();
        let alerts = detector.detect(target.event_id, target.kickoff_time, &per_platform, now);
        if !alerts.is_empty() {
            let severities: Vec<&str> = alerts.iter().map(|a| a.severity.as_str()).collect();
            self.broadcaster.publish(
                Topic::RiskAlerts,
                "risk_alerts",
                serde_json::json!({
                    "alert_count": alerts.len(),
                    "event_ids": [target.event_id],
                    "severities": severities,
                }),
            );
        }

        // Cache update (fires odds_updates callbacks), then writes.
        for (bookmaker, classification) in classifications {
            outcome.writes.extend(classification.writes());
            if bookmaker.is_reference() {
                self.cache.put_betpawa_snapshot(
                    target.event_id,
                    target.kickoff_time,
                    classification.cache_markets,
                    now,
                );
            } else {
                self.cache.put_competitor_snapshot(
                    target.event_id,
                    bookmaker,
                    target.kickoff_time,
                    classification.cache_markets,
                    now,
                );
            }
        }
        outcome.alerts = alerts;
        outcome
    }

    // -- Helpers ---------------------------------------------------------

    async fn fail_cycle(
        &self,
        run_id: Uuid,
        clock: Instant,
        event_count: usize,
        reason: &str,
    ) -> Result<CycleOutcome> {
        warn!(%run_id, reason, "Scrape cycle failed");
        self.broadcaster.publish_progress(&ProgressEvent::CycleFailed {
            run_id,
            reason: reason.to_string(),
        });
        self.store
            .set_run_status(run_id, ScrapeRunStatus::Failed, Some(Utc::now()), true)
            .await
            .ok();
        Ok(CycleOutcome {
            run_id,
            status: ScrapeRunStatus::Failed,
            event_count,
            markets_written: 0,
            changed_markets: 0,
            alert_count: 0,
            duration_ms: clock.elapsed().as_millis() as u64,
        })
    }

    async fn log_phase(&self, run_id: Uuid, phase: &str, platform: Option<Bookmaker>) {
        if let Err(error) = self.store.log_phase(run_id, phase, platform, Utc::now()).await {
            warn!(%error, phase, "Phase log write failed");
        }
    }
}

/// Discovery for one platform: tournament list, then events per
/// tournament under the platform's concurrency ceiling. A failing
/// tournament is skipped; a failing tournament *list* fails the
/// platform.
async fn discover_platform(
    client: Arc<dyn OddsPlatform>,
    concurrency: usize,
    delay: Option<Duration>,
) -> Result<Vec<PlatformEvent>, FetchFailure> {
    let tournaments = client.fetch_tournaments().await.map_err(|error| FetchFailure {
        kind: error.kind(),
        message: error.to_string(),
    })?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let fetches = tournaments.into_iter().map(|tournament| {
        let client = client.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match client.fetch_events_by_tournament(&tournament.external_id).await {
                Ok(events) => Some(events),
                Err(error) => {
                    warn!(
                        tournament = %tournament.external_id,
                        %error,
                        "Tournament listing failed, skipping"
                    );
                    None
                }
            }
        }
    });

    let mut seen = HashSet::new();
    let mut events = Vec::new();
    for batch in futures::future::join_all(fetches).await.into_iter().flatten() {
        for event in batch {
            if seen.insert(event.external_id.clone()) {
                events.push(event);
            }
        }
    }
    Ok(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
