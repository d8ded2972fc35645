//! Durable store access.
//!
//! Postgres-backed accessors for everything the pipeline persists:
//! events, the current/history odds relations, risk alerts, the
//! scrape-run lifecycle with its phase-log heartbeat, the
//! unmapped-market accumulator, operator mappings and the settings
//! singleton. The coordinator and its collaborators depend on the
//! [`PipelineStore`] trait, not on `Store`, so tests construct their
//! own in-memory instance.

pub mod writer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::mapping::{HandlerKind, MappingFailure, MappingSource, MarketMapping, OutcomeMapping};
use crate::types::{
    Bookmaker, CachedMarket, CachedSnapshot, ScrapeErrorKind, ScrapeRunStatus, WriteBatch,
};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The store surface the pipeline core needs. Implemented by [`Store`]
/// against Postgres and by in-memory doubles in tests.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    // -- scrape run lifecycle --

    async fn create_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<()>;

    /// Transition a run. With `guard_running` the update only applies
    /// while the run is still RUNNING (optimistic watchdog/coordinator
    /// race resolution); returns whether the transition applied.
    async fn set_run_status(
        &self,
        run_id: Uuid,
        status: ScrapeRunStatus,
        completed_at: Option<DateTime<Utc>>,
        guard_running: bool,
    ) -> Result<bool>;

    /// Append a phase-log row (the watchdog's activity heartbeat) and
    /// mirror it onto the run row.
    async fn log_phase(
        &self,
        run_id: Uuid,
        phase: &str,
        platform: Option<Bookmaker>,
        entered_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn record_error(
        &self,
        run_id: Uuid,
        kind: ScrapeErrorKind,
        message: &str,
        platform: Option<Bookmaker>,
    ) -> Result<()>;

    /// Whether any run is currently RUNNING (trigger refusal).
    async fn has_running_run(&self) -> Result<bool>;

    // -- discovery --

    /// Upsert an event by its sportradar id and return the internal id.
    async fn resolve_event_id(
        &self,
        sportradar_id: &str,
        kickoff_time: DateTime<Utc>,
        home_team: &str,
        away_team: &str,
    ) -> Result<i64>;

    // -- mapping --

    async fn load_operator_mappings(&self) -> Result<Vec<MarketMapping>>;

    /// Accumulate unmapped markets: unique on `(platform, raw_key)`,
    /// occurrence count incremented on repeats.
    async fn log_unmapped(&self, failures: &[MappingFailure]) -> Result<()>;

    // -- settings --

    async fn load_settings(&self) -> Result<Settings>;

    // -- write path --

    /// Apply one batch in its own transactional session: UPSERT
    /// current, INSERT history for changed rows, INSERT alerts.
    async fn write_batch(&self, batch: &WriteBatch) -> Result<()>;

    // -- warmup & watchdog --

    /// Latest current rows, grouped into snapshots, for events kicking
    /// off after `kickoff_after`.
    async fn load_current_snapshots(
        &self,
        kickoff_after: DateTime<Utc>,
    ) -> Result<Vec<CachedSnapshot>>;

    /// Fail every RUNNING run unconditionally (startup recovery).
    async fn fail_running_runs(&self) -> Result<u64>;

    /// Fail RUNNING runs whose last activity predates `now -
    /// threshold`. Returns the failed run ids.
    async fn fail_stale_runs(&self, threshold: Duration, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Dev-bootstrap DDL. Production partitions for `odds_history` are
/// created ahead of time by migrations; the default partition here
/// keeps a fresh database writable.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id              BIGSERIAL PRIMARY KEY,
    sportradar_id   TEXT UNIQUE,
    home_team       TEXT NOT NULL,
    away_team       TEXT NOT NULL,
    kickoff_time    TIMESTAMPTZ NOT NULL,
    tournament_id   BIGINT
);

CREATE TABLE IF NOT EXISTS settings (
    id                                    INT PRIMARY KEY DEFAULT 1,
    scrape_interval_minutes               BIGINT,
    enabled_platforms                     TEXT[],
    betpawa_concurrency                   BIGINT,
    sportybet_concurrency                 BIGINT,
    bet9ja_concurrency                    BIGINT,
    bet9ja_delay_ms                       BIGINT,
    batch_size                            BIGINT,
    odds_retention_days                   BIGINT,
    historical_retention_days             BIGINT,
    price_change_threshold_pct_warning    NUMERIC,
    price_change_threshold_pct_elevated   NUMERIC,
    price_change_threshold_pct_critical   NUMERIC,
    staleness_threshold_minutes           BIGINT
);

CREATE TABLE IF NOT EXISTS odds_current (
    event_id            BIGINT NOT NULL,
    bookmaker           TEXT NOT NULL,
    canonical_market_id TEXT NOT NULL,
    market_name         TEXT NOT NULL,
    line                NUMERIC,
    handicap            JSONB,
    outcomes            JSONB NOT NULL,
    market_groups       JSONB NOT NULL DEFAULT '[]',
    unavailable_at      TIMESTAMPTZ,
    last_updated_at     TIMESTAMPTZ NOT NULL,
    last_confirmed_at   TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS odds_current_key
    ON odds_current (event_id, bookmaker, canonical_market_id, (COALESCE(line, 0)));

CREATE TABLE IF NOT EXISTS odds_history (
    event_id            BIGINT NOT NULL,
    bookmaker           TEXT NOT NULL,
    canonical_market_id TEXT NOT NULL,
    market_name         TEXT NOT NULL,
    line                NUMERIC,
    handicap            JSONB,
    outcomes            JSONB NOT NULL,
    market_groups       JSONB NOT NULL DEFAULT '[]',
    unavailable_at      TIMESTAMPTZ,
    captured_at         TIMESTAMPTZ NOT NULL
) PARTITION BY RANGE (captured_at);

CREATE TABLE IF NOT EXISTS odds_history_default PARTITION OF odds_history DEFAULT;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               UUID PRIMARY KEY,
    status           TEXT NOT NULL,
    started_at       TIMESTAMPTZ NOT NULL,
    completed_at     TIMESTAMPTZ,
    current_phase    TEXT,
    current_platform TEXT
);

CREATE TABLE IF NOT EXISTS scrape_phase_logs (
    id            BIGSERIAL PRIMARY KEY,
    scrape_run_id UUID NOT NULL,
    phase         TEXT NOT NULL,
    platform      TEXT,
    entered_at    TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS scrape_phase_logs_run
    ON scrape_phase_logs (scrape_run_id, entered_at);

CREATE TABLE IF NOT EXISTS scrape_errors (
    id            BIGSERIAL PRIMARY KEY,
    scrape_run_id UUID,
    error_type    TEXT NOT NULL,
    error_message TEXT NOT NULL,
    platform      TEXT,
    occurred_at   TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS risk_alerts (
    id                   BIGSERIAL PRIMARY KEY,
    event_id             BIGINT NOT NULL,
    bookmaker            TEXT NOT NULL,
    canonical_market_id  TEXT NOT NULL,
    line                 NUMERIC,
    outcome_name         TEXT NOT NULL,
    alert_type           TEXT NOT NULL,
    severity             TEXT NOT NULL,
    change_percent       NUMERIC,
    old_value            NUMERIC,
    new_value            NUMERIC,
    competitor_direction TEXT,
    detected_at          TIMESTAMPTZ NOT NULL,
    status               TEXT NOT NULL DEFAULT 'new'
);

CREATE TABLE IF NOT EXISTS unmapped_market_log (
    platform             TEXT NOT NULL,
    raw_key              TEXT NOT NULL,
    first_seen_at        TIMESTAMPTZ NOT NULL,
    occurrence_count     BIGINT NOT NULL DEFAULT 1,
    status               TEXT NOT NULL DEFAULT 'new',
    example_raw_outcomes JSONB NOT NULL DEFAULT '[]',
    PRIMARY KEY (platform, raw_key)
);

CREATE TABLE IF NOT EXISTS user_market_mappings (
    id           BIGSERIAL PRIMARY KEY,
    canonical_id TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    handler      TEXT NOT NULL DEFAULT 'simple',
    betpawa_id   TEXT,
    sportybet_id TEXT,
    bet9ja_key   TEXT,
    outcomes     JSONB NOT NULL DEFAULT '[]',
    priority     INT NOT NULL DEFAULT 0,
    is_active    BOOLEAN NOT NULL DEFAULT TRUE,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS mapping_audit_log (
    id           BIGSERIAL PRIMARY KEY,
    canonical_id TEXT NOT NULL,
    action       TEXT NOT NULL,
    changed_by   TEXT,
    change       JSONB,
    changed_at   TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Postgres-backed store.
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect and verify the pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Store { pool })
    }

    /// Apply the bootstrap schema (idempotent).
    pub async fn apply_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Schema statement failed: {statement:.60}"))?;
        }
        info!("Store schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for Store {
    async fn create_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO scrape_runs (id, status, started_at) VALUES ($1, $2, $3)")
            .bind(run_id)
            .bind(ScrapeRunStatus::Running.as_str())
            .bind(started_at)
            .execute(&self.pool)
            .await
            .context("Failed to create scrape run")?;
        Ok(())
    }

    async fn set_run_status(
        &self,
        run_id: Uuid,
        status: ScrapeRunStatus,
        completed_at: Option<DateTime<Utc>>,
        guard_running: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE scrape_runs
             SET status = $2, completed_at = COALESCE($3, completed_at)
             WHERE id = $1 AND ($4 = FALSE OR status = 'running')",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(completed_at)
        .bind(guard_running)
        .execute(&self.pool)
        .await
        .context("Failed to update scrape run status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn log_phase(
        &self,
        run_id: Uuid,
        phase: &str,
        platform: Option<Bookmaker>,
        entered_at: DateTime<Utc>,
    ) -> Result<()> {
        let platform_slug = platform.map(|b| b.slug());
        sqlx::query(
            "INSERT INTO scrape_phase_logs (scrape_run_id, phase, platform, entered_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(run_id)
        .bind(phase)
        .bind(platform_slug)
        .bind(entered_at)
        .execute(&self.pool)
        .await
        .context("Failed to append phase log")?;

        sqlx::query("UPDATE scrape_runs SET current_phase = $2, current_platform = $3 WHERE id = $1")
            .bind(run_id)
            .bind(phase)
            .bind(platform_slug)
            .execute(&self.pool)
            .await
            .context("Failed to mirror phase onto run row")?;
        Ok(())
    }

    async fn record_error(
        &self,
        run_id: Uuid,
        kind: ScrapeErrorKind,
        message: &str,
        platform: Option<Bookmaker>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO scrape_errors (scrape_run_id, error_type, error_message, platform, occurred_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(run_id)
        .bind(kind.as_str())
        .bind(message)
        .bind(platform.map(|b| b.slug()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to record scrape error")?;
        Ok(())
    }

    async fn has_running_run(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM scrape_runs WHERE status = 'running' LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to probe running runs")?;
        Ok(row.is_some())
    }

    async fn resolve_event_id(
        &self,
        sportradar_id: &str,
        kickoff_time: DateTime<Utc>,
        home_team: &str,
        away_team: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO events (sportradar_id, home_team, away_team, kickoff_time)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (sportradar_id) DO UPDATE SET
                 home_team = EXCLUDED.home_team,
                 away_team = EXCLUDED.away_team,
                 kickoff_time = EXCLUDED.kickoff_time
             RETURNING id",
        )
        .bind(sportradar_id)
        .bind(home_team)
        .bind(away_team)
        .bind(kickoff_time)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert event")?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    async fn load_operator_mappings(&self) -> Result<Vec<MarketMapping>> {
        let rows = sqlx::query(
            "SELECT canonical_id, name, handler, betpawa_id, sportybet_id, bet9ja_key,
                    outcomes, priority
             FROM user_market_mappings
             WHERE is_active
             ORDER BY priority, canonical_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load operator mappings")?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let canonical_id: String = row.try_get("canonical_id")?;
            let handler_raw: String = row.try_get("handler")?;
            let handler: HandlerKind = match handler_raw.parse() {
                Ok(handler) => handler,
                Err(_) => {
                    warn!(%canonical_id, handler = %handler_raw, "Operator mapping with unknown handler, skipping");
                    continue;
                }
            };
            let outcomes_raw: serde_json::Value = row.try_get("outcomes")?;
            let outcomes: Vec<OutcomeMapping> = match serde_json::from_value(outcomes_raw) {
                Ok(outcomes) => outcomes,
                Err(error) => {
                    warn!(%canonical_id, %error, "Operator mapping with bad outcomes, skipping");
                    continue;
                }
            };
            mappings.push(MarketMapping {
                canonical_id,
                name: row.try_get("name")?,
                handler,
                betpawa_id: row.try_get("betpawa_id")?,
                sportybet_id: row.try_get("sportybet_id")?,
                bet9ja_key: row.try_get("bet9ja_key")?,
                outcomes,
                source: MappingSource::Db,
                priority: row.try_get::<i32, _>("priority")?,
            });
        }
        debug!(count = mappings.len(), "Operator mappings loaded");
        Ok(mappings)
    }

    async fn log_unmapped(&self, failures: &[MappingFailure]) -> Result<()> {
        for failure in failures {
            let example = serde_json::to_value(&failure.raw_outcomes)
                .unwrap_or(serde_json::Value::Array(Vec::new()));
            sqlx::query(
                "INSERT INTO unmapped_market_log
                     (platform, raw_key, first_seen_at, occurrence_count, status, example_raw_outcomes)
                 VALUES ($1, $2, $3, 1, 'new', $4)
                 ON CONFLICT (platform, raw_key)
                 DO UPDATE SET occurrence_count = unmapped_market_log.occurrence_count + 1",
            )
            .bind(failure.bookmaker.slug())
            .bind(&failure.raw_key)
            .bind(Utc::now())
            .bind(example)
            .execute(&self.pool)
            .await
            .context("Failed to accumulate unmapped market")?;
        }
        Ok(())
    }

    async fn load_settings(&self) -> Result<Settings> {
        let row = sqlx::query("SELECT * FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load settings")?;

        let Some(row) = row else {
            debug!("No settings row, using defaults");
            return Ok(Settings::default());
        };

        let defaults = Settings::default();
        let enabled_platforms = row
            .try_get::<Option<Vec<String>>, _>("enabled_platforms")
            .unwrap_or(None)
            .map(|slugs| {
                slugs
                    .iter()
                    .filter_map(|slug| slug.parse::<Bookmaker>().ok())
                    .collect::<Vec<_>>()
            })
            .filter(|platforms: &Vec<Bookmaker>| !platforms.is_empty())
            .unwrap_or(defaults.enabled_platforms.clone());

        macro_rules! col {
            ($name:literal, $default:expr) => {
                row.try_get::<Option<_>, _>($name).ok().flatten().unwrap_or($default)
            };
        }

        Ok(Settings {
            scrape_interval_minutes: col!("scrape_interval_minutes", defaults.scrape_interval_minutes),
            enabled_platforms,
            betpawa_concurrency: col!("betpawa_concurrency", defaults.betpawa_concurrency as i64)
                as usize,
            sportybet_concurrency: col!(
                "sportybet_concurrency",
                defaults.sportybet_concurrency as i64
            ) as usize,
            bet9ja_concurrency: col!("bet9ja_concurrency", defaults.bet9ja_concurrency as i64)
                as usize,
            bet9ja_delay_ms: col!("bet9ja_delay_ms", defaults.bet9ja_delay_ms as i64) as u64,
            batch_size: col!("batch_size", defaults.batch_size as i64) as usize,
            odds_retention_days: col!("odds_retention_days", defaults.odds_retention_days),
            historical_retention_days: col!(
                "historical_retention_days",
                defaults.historical_retention_days
            ),
            price_change_threshold_pct_warning: col!(
                "price_change_threshold_pct_warning",
                defaults.price_change_threshold_pct_warning
            ),
            price_change_threshold_pct_elevated: col!(
                "price_change_threshold_pct_elevated",
                defaults.price_change_threshold_pct_elevated
            ),
            price_change_threshold_pct_critical: col!(
                "price_change_threshold_pct_critical",
                defaults.price_change_threshold_pct_critical
            ),
            staleness_threshold_minutes: col!(
                "staleness_threshold_minutes",
                defaults.staleness_threshold_minutes
            ),
        })
    }

    async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to open write session")?;

        // 1. UPSERT current.
        for write in &batch.writes {
            let handicap = serde_json::to_value(write.handicap)?;
            let outcomes = serde_json::to_value(&write.outcomes)?;
            let groups = serde_json::to_value(&write.groups)?;
            sqlx::query(
                "INSERT INTO odds_current
                     (event_id, bookmaker, canonical_market_id, market_name, line, handicap,
                      outcomes, market_groups, unavailable_at, last_updated_at, last_confirmed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
                 ON CONFLICT (event_id, bookmaker, canonical_market_id, (COALESCE(line, 0)))
                 DO UPDATE SET
                     market_name = EXCLUDED.market_name,
                     handicap = EXCLUDED.handicap,
                     outcomes = EXCLUDED.outcomes,
                     market_groups = EXCLUDED.market_groups,
                     unavailable_at = EXCLUDED.unavailable_at,
                     last_confirmed_at = EXCLUDED.last_confirmed_at,
                     last_updated_at = CASE WHEN $11 THEN EXCLUDED.last_confirmed_at
                                            ELSE odds_current.last_updated_at END",
            )
            .bind(write.event_id)
            .bind(write.bookmaker.slug())
            .bind(&write.canonical_market_id)
            .bind(&write.market_name)
            .bind(write.line)
            .bind(handicap)
            .bind(&outcomes)
            .bind(&groups)
            .bind(write.unavailable_at)
            .bind(batch.captured_at)
            .bind(write.changed)
            .execute(&mut *tx)
            .await
            .context("Current upsert failed")?;

            // 2. History rows only for changed markets.
            if write.changed {
                sqlx::query(
                    "INSERT INTO odds_history
                         (event_id, bookmaker, canonical_market_id, market_name, line, handicap,
                          outcomes, market_groups, unavailable_at, captured_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(write.event_id)
                .bind(write.bookmaker.slug())
                .bind(&write.canonical_market_id)
                .bind(&write.market_name)
                .bind(write.line)
                .bind(serde_json::to_value(write.handicap)?)
                .bind(&outcomes)
                .bind(&groups)
                .bind(write.unavailable_at)
                .bind(batch.captured_at)
                .execute(&mut *tx)
                .await
                .context("History insert failed")?;
            }
        }

        // 3. Alerts.
        for alert in &batch.alerts {
            sqlx::query(
                "INSERT INTO risk_alerts
                     (event_id, bookmaker, canonical_market_id, line, outcome_name, alert_type,
                      severity, change_percent, old_value, new_value, competitor_direction,
                      detected_at, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'new')",
            )
            .bind(alert.event_id)
            .bind(alert.bookmaker.slug())
            .bind(&alert.canonical_market_id)
            .bind(alert.line)
            .bind(&alert.outcome_name)
            .bind(alert.alert_type.as_str())
            .bind(alert.severity.as_str())
            .bind(alert.change_percent)
            .bind(alert.old_value)
            .bind(alert.new_value)
            .bind(alert.competitor_direction.map(|d| d.to_string()))
            .bind(alert.detected_at)
            .execute(&mut *tx)
            .await
            .context("Alert insert failed")?;
        }

        tx.commit().await.context("Write batch commit failed")?;
        Ok(())
    }

    async fn load_current_snapshots(
        &self,
        kickoff_after: DateTime<Utc>,
    ) -> Result<Vec<CachedSnapshot>> {
        let rows = sqlx::query(
            "SELECT c.event_id, c.bookmaker, c.canonical_market_id, c.market_name, c.line,
                    c.handicap, c.outcomes, c.market_groups, c.unavailable_at,
                    c.last_confirmed_at, e.kickoff_time
             FROM odds_current c
             JOIN events e ON e.id = c.event_id
             WHERE e.kickoff_time > $1
             ORDER BY c.event_id, c.bookmaker, c.canonical_market_id, COALESCE(c.line, 0)",
        )
        .bind(kickoff_after)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load current rows for warmup")?;

        let mut grouped: HashMap<(i64, Bookmaker), CachedSnapshot> = HashMap::new();
        for row in rows {
            let event_id: i64 = row.try_get("event_id")?;
            let bookmaker: Bookmaker = row.try_get::<String, _>("bookmaker")?.parse()?;
            let kickoff_time: DateTime<Utc> = row.try_get("kickoff_time")?;
            let last_confirmed_at: DateTime<Utc> = row.try_get("last_confirmed_at")?;

            let market = CachedMarket {
                canonical_id: row.try_get("canonical_market_id")?,
                name: row.try_get("market_name")?,
                line: row.try_get("line")?,
                handicap: row
                    .try_get::<Option<serde_json::Value>, _>("handicap")?
                    .and_then(|value| serde_json::from_value(value).ok()),
                outcomes: serde_json::from_value(row.try_get::<serde_json::Value, _>("outcomes")?)
                    .unwrap_or_default(),
                groups: serde_json::from_value(row.try_get::<serde_json::Value, _>("market_groups")?)
                    .unwrap_or_default(),
                unavailable_at: row.try_get("unavailable_at")?,
            };

            let snapshot = grouped.entry((event_id, bookmaker)).or_insert_with(|| CachedSnapshot {
                event_id,
                bookmaker,
                kickoff_time,
                captured_at: last_confirmed_at,
                last_confirmed_at,
                markets: Vec::new(),
            });
            // Freshness comes from the newest row in the group.
            if last_confirmed_at > snapshot.last_confirmed_at {
                snapshot.last_confirmed_at = last_confirmed_at;
                snapshot.captured_at = last_confirmed_at;
            }
            snapshot.markets.push(market);
        }

        Ok(grouped.into_values().collect())
    }

    async fn fail_running_runs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE scrape_runs SET status = 'failed', completed_at = $1 WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to fail running runs")?;
        Ok(result.rows_affected())
    }

    async fn fail_stale_runs(&self, threshold: Duration, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let cutoff = now - threshold;
        let rows = sqlx::query(
            "UPDATE scrape_runs r
             SET status = 'failed', completed_at = $2
             WHERE r.status = 'running'
               AND COALESCE(
                     (SELECT MAX(p.entered_at) FROM scrape_phase_logs p WHERE p.scrape_run_id = r.id),
                     r.started_at) < $1
             RETURNING r.id, r.current_phase, r.current_platform",
        )
        .bind(cutoff)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fail stale runs")?;

        let mut failed = Vec::with_capacity(rows.len());
        for row in rows {
            let run_id: Uuid = row.try_get("id")?;
            let phase: Option<String> = row.try_get("current_phase")?;
            let platform: Option<String> = row.try_get("current_platform")?;
            let message = format!(
                "no phase-log progress since {cutoff}; last phase {}, platform {}",
                phase.as_deref().unwrap_or("unknown"),
                platform.as_deref().unwrap_or("none"),
            );
            self.record_error(
                run_id,
                ScrapeErrorKind::Stale,
                &message,
                platform.as_deref().and_then(|p| p.parse().ok()),
            )
            .await?;
            failed.push(run_id);
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// In-memory test double
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory `PipelineStore` used by engine and writer tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

    pub struct MemoryStore {
        pub runs: Mutex<HashMap<Uuid, ScrapeRunStatus>>,
        pub run_started: Mutex<HashMap<Uuid, DateTime<Utc>>>,
        pub phases: Mutex<Vec<(Uuid, String, Option<Bookmaker>, DateTime<Utc>)>>,
        pub errors: Mutex<Vec<(Uuid, ScrapeErrorKind, String, Option<Bookmaker>)>>,
        pub batches: Mutex<Vec<WriteBatch>>,
        pub unmapped: Mutex<HashMap<(String, String), u64>>,
        pub settings: Mutex<Settings>,
        pub operator_mappings: Mutex<Vec<MarketMapping>>,
        pub warmup_snapshots: Mutex<Vec<CachedSnapshot>>,
        pub event_ids: Mutex<HashMap<String, i64>>,
        next_event_id: AtomicI64,
        pub fail_writes: AtomicBool,
        pub write_attempts: AtomicU64,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            MemoryStore {
                runs: Mutex::new(HashMap::new()),
                run_started: Mutex::new(HashMap::new()),
                phases: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                batches: Mutex::new(Vec::new()),
                unmapped: Mutex::new(HashMap::new()),
                settings: Mutex::new(Settings::default()),
                operator_mappings: Mutex::new(Vec::new()),
                warmup_snapshots: Mutex::new(Vec::new()),
                event_ids: Mutex::new(HashMap::new()),
                next_event_id: AtomicI64::new(1),
                fail_writes: AtomicBool::new(false),
                write_attempts: AtomicU64::new(0),
            }
        }

        pub fn run_status(&self, run_id: Uuid) -> Option<ScrapeRunStatus> {
            self.runs.lock().get(&run_id).copied()
        }

        pub fn phase_names(&self, run_id: Uuid) -> Vec<String> {
            self.phases
                .lock()
                .iter()
                .filter(|(id, ..)| *id == run_id)
                .map(|(_, phase, ..)| phase.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PipelineStore for MemoryStore {
        async fn create_run(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<()> {
            self.runs.lock().insert(run_id, ScrapeRunStatus::Running);
            self.run_started.lock().insert(run_id, started_at);
            Ok(())
        }

        async fn set_run_status(
            &self,
            run_id: Uuid,
            status: ScrapeRunStatus,
            _completed_at: Option<DateTime<Utc>>,
            guard_running: bool,
        ) -> Result<bool> {
            let mut runs = self.runs.lock();
            match runs.get_mut(&run_id) {
                Some(current) => {
                    if guard_running && *current != ScrapeRunStatus::Running {
                        return Ok(false);
                    }
                    *current = status;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn log_phase(
            &self,
            run_id: Uuid,
            phase: &str,
            platform: Option<Bookmaker>,
            entered_at: DateTime<Utc>,
        ) -> Result<()> {
            self.phases
                .lock()
                .push((run_id, phase.to_string(), platform, entered_at));
            Ok(())
        }

        async fn record_error(
            &self,
            run_id: Uuid,
            kind: ScrapeErrorKind,
            message: &str,
            platform: Option<Bookmaker>,
        ) -> Result<()> {
            self.errors
                .lock()
                .push((run_id, kind, message.to_string(), platform));
            Ok(())
        }

        async fn has_running_run(&self) -> Result<bool> {
            Ok(self
                .runs
                .lock()
                .values()
                .any(|s| *s == ScrapeRunStatus::Running))
        }

        async fn resolve_event_id(
            &self,
            sportradar_id: &str,
            _kickoff_time: DateTime<Utc>,
            _home_team: &str,
            _away_team: &str,
        ) -> Result<i64> {
            let mut ids = self.event_ids.lock();
            let id = ids.entry(sportradar_id.to_string()).or_insert_with(|| {
                self.next_event_id.fetch_add(1, Ordering::Relaxed)
            });
            Ok(*id)
        }

        async fn load_operator_mappings(&self) -> Result<Vec<MarketMapping>> {
            Ok(self.operator_mappings.lock().clone())
        }

        async fn log_unmapped(&self, failures: &[MappingFailure]) -> Result<()> {
            let mut unmapped = self.unmapped.lock();
            for failure in failures {
                *unmapped
                    .entry((failure.bookmaker.slug().to_string(), failure.raw_key.clone()))
                    .or_insert(0) += 1;
            }
            Ok(())
        }

        async fn load_settings(&self) -> Result<Settings> {
            Ok(self.settings.lock().clone())
        }

        async fn write_batch(&self, batch: &WriteBatch) -> Result<()> {
            self.write_attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                anyhow::bail!("simulated store failure");
            }
            self.batches.lock().push(batch.clone());
            Ok(())
        }

        async fn load_current_snapshots(
            &self,
            kickoff_after: DateTime<Utc>,
        ) -> Result<Vec<CachedSnapshot>> {
            Ok(self
                .warmup_snapshots
                .lock()
                .iter()
                .filter(|snap| snap.kickoff_time > kickoff_after)
                .cloned()
                .collect())
        }

        async fn fail_running_runs(&self) -> Result<u64> {
            let mut runs = self.runs.lock();
            let mut failed = 0;
            for status in runs.values_mut() {
                if *status == ScrapeRunStatus::Running {
                    *status = ScrapeRunStatus::Failed;
                    failed += 1;
                }
            }
            Ok(failed)
        }

        async fn fail_stale_runs(
            &self,
            threshold: Duration,
            now: DateTime<Utc>,
        ) -> Result<Vec<Uuid>> {
            let cutoff = now - threshold;
            let phases = self.phases.lock();
            let started = self.run_started.lock();
            let mut runs = self.runs.lock();

            let mut failed = Vec::new();
            for (run_id, status) in runs.iter_mut() {
                if *status != ScrapeRunStatus::Running {
                    continue;
                }
                let last_activity = phases
                    .iter()
                    .filter(|(id, ..)| id == run_id)
                    .map(|(.., entered_at)| *entered_at)
                    .max()
                    .or_else(|| started.get(run_id).copied());
                if last_activity.is_some_and(|t| t < cutoff) {
                    *status = ScrapeRunStatus::Failed;
                    failed.push(*run_id);
                }
            }
            drop(runs);
            drop(started);
            drop(phases);
            for run_id in &failed {
                self.errors.lock().push((
                    *run_id,
                    ScrapeErrorKind::Stale,
                    "no phase-log progress".to_string(),
                    None,
                ));
            }
            Ok(failed)
        }
    }
}
