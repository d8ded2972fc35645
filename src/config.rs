//! Configuration loading from TOML with environment variable resolution.
//!
//! Two layers of configuration exist:
//! - [`AppConfig`] — bootstrap settings read once from `config.toml`
//!   (database env-var name, platform base URLs, pipeline tunables that
//!   don't change at runtime). Secrets are referenced by env-var name
//!   in the config and resolved at runtime via `std::env::var`.
//! - [`Settings`] — the operational tuning row loaded from the durable
//!   `settings` table at warmup and re-read at the start of every
//!   cycle, so operator changes apply without a restart.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

use crate::types::Bookmaker;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub platforms: PlatformsConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Name of the environment variable holding the Postgres URL.
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformsConfig {
    pub betpawa: PlatformConfig,
    pub sportybet: PlatformConfig,
    pub bet9ja: PlatformConfig,
}

impl PlatformsConfig {
    pub fn get(&self, bookmaker: Bookmaker) -> &PlatformConfig {
        match bookmaker {
            Bookmaker::Betpawa => &self.betpawa,
            Bookmaker::Sportybet => &self.sportybet,
            Bookmaker::Bet9ja => &self.bet9ja,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Bounded retry attempts for transient failures.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Total deadline for all platform fetches of one event.
    #[serde(default = "default_event_deadline_secs")]
    pub event_deadline_secs: u64,
    /// Events processed concurrently within a batch.
    #[serde(default = "default_event_concurrency")]
    pub event_concurrency: usize,
    /// Capacity of the bounded write queue (batches).
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// How far back warmup rehydrates events (hours before now).
    #[serde(default = "default_warmup_lookback_hours")]
    pub warmup_lookback_hours: i64,
    /// Kickoff window inside which availability alerts are emitted.
    #[serde(default = "default_imminent_window_minutes")]
    pub imminent_window_minutes: i64,
    /// Per-subscriber broadcast queue capacity.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_max_connections() -> u32 {
    8
}
fn default_http_timeout_secs() -> u64 {
    5
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_event_deadline_secs() -> u64 {
    30
}
fn default_event_concurrency() -> usize {
    10
}
fn default_write_queue_capacity() -> usize {
    64
}
fn default_warmup_lookback_hours() -> i64 {
    2
}
fn default_imminent_window_minutes() -> i64 {
    120
}
fn default_broadcast_capacity() -> usize {
    256
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Durable settings (singleton row)
// ---------------------------------------------------------------------------

/// Operational tuning loaded from the `settings` table. Defaults match
/// the values a fresh deployment ships with; a missing row yields
/// `Settings::default()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub scrape_interval_minutes: i64,
    pub enabled_platforms: Vec<Bookmaker>,
    pub betpawa_concurrency: usize,
    pub sportybet_concurrency: usize,
    pub bet9ja_concurrency: usize,
    /// Inter-request delay for Bet9ja, in milliseconds.
    pub bet9ja_delay_ms: u64,
    pub batch_size: usize,
    pub odds_retention_days: i64,
    pub historical_retention_days: i64,
    /// Price-change severity bands T1/T2/T3, in percent.
    pub price_change_threshold_pct_warning: Decimal,
    pub price_change_threshold_pct_elevated: Decimal,
    pub price_change_threshold_pct_critical: Decimal,
    pub staleness_threshold_minutes: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            scrape_interval_minutes: 10,
            enabled_platforms: Bookmaker::ALL.to_vec(),
            betpawa_concurrency: 50,
            sportybet_concurrency: 50,
            bet9ja_concurrency: 15,
            bet9ja_delay_ms: 0,
            batch_size: 50,
            odds_retention_days: 30,
            historical_retention_days: 90,
            price_change_threshold_pct_warning: dec!(10),
            price_change_threshold_pct_elevated: dec!(20),
            price_change_threshold_pct_critical: dec!(35),
            staleness_threshold_minutes: 10,
        }
    }
}

impl Settings {
    pub fn is_enabled(&self, bookmaker: Bookmaker) -> bool {
        self.enabled_platforms.contains(&bookmaker)
    }

    pub fn concurrency(&self, bookmaker: Bookmaker) -> usize {
        let limit = match bookmaker {
            Bookmaker::Betpawa => self.betpawa_concurrency,
            Bookmaker::Sportybet => self.sportybet_concurrency,
            Bookmaker::Bet9ja => self.bet9ja_concurrency,
        };
        limit.max(1)
    }

    /// Inter-request delay for a platform, if any.
    pub fn request_delay(&self, bookmaker: Bookmaker) -> Option<std::time::Duration> {
        match bookmaker {
            Bookmaker::Bet9ja if self.bet9ja_delay_ms > 0 => {
                Some(std::time::Duration::from_millis(self.bet9ja_delay_ms))
            }
            _ => None,
        }
    }
}
