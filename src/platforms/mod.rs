//! Bookmaker platform clients.
//!
//! Defines the `OddsPlatform` trait and provides implementations for:
//! - BetPawa — reference platform; events and full market depth arrive
//!   in one listing pass
//! - SportyBet — listing is market-shallow; per-event fetch for depth
//! - Bet9ja — flat key/odds payloads with a success-code envelope
//!
//! Each client owns its own `reqwest::Client` (keep-alive pool,
//! timeout, platform-specific headers) and is safe to call from many
//! tasks; per-platform concurrency ceilings are enforced by the
//! coordinator's semaphores, not here.

pub mod bet9ja;
pub mod betpawa;
pub mod sportybet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Bookmaker, ScrapeErrorKind};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure modes of a platform fetch. Only `Network` (transport and
/// 5xx-equivalent) failures are retried; an API envelope that
/// explicitly rejects the request is surfaced immediately.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api rejected request (code {code}): {message}")]
    Api { code: String, message: String },

    #[error("unexpected response shape: {0}")]
    Parse(String),
}

impl FetchError {
    pub fn kind(&self) -> ScrapeErrorKind {
        match self {
            FetchError::Network(_) => ScrapeErrorKind::Network,
            FetchError::Api { .. } => ScrapeErrorKind::Api,
            FetchError::Parse(_) => ScrapeErrorKind::Parse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Common fetch shapes
// ---------------------------------------------------------------------------

/// A tournament (league) as listed by one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTournament {
    pub external_id: String,
    pub name: String,
    pub country: Option<String>,
    /// Cross-platform id when the platform exposes one at this level.
    pub sportradar_id: Option<String>,
}

/// An event as listed by one platform.
#[derive(Debug, Clone)]
pub struct PlatformEvent {
    /// The id used by listing endpoints.
    pub external_id: String,
    /// The id the single-event endpoint wants, when it differs from
    /// `external_id` (Bet9ja's `EID`).
    pub fetch_id: Option<String>,
    pub sportradar_id: Option<String>,
    pub kickoff_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    /// Present when the listing already carries full market depth
    /// (BetPawa); `None` when a per-event fetch is required.
    pub raw_markets: Option<RawMarkets>,
}

/// Bet9ja's market payload: a flat map of selection keys to odds.
pub type Bet9jaOddsMap = HashMap<String, Decimal>;

/// Raw, parsed-but-unmapped market data for one event, tagged by
/// platform so the mapper can dispatch.
#[derive(Debug, Clone)]
pub enum RawMarkets {
    Betpawa(Vec<betpawa::BetpawaRawMarket>),
    Sportybet(Vec<sportybet::SportybetRawMarket>),
    Bet9ja(Bet9jaOddsMap),
}

impl RawMarkets {
    pub fn bookmaker(&self) -> Bookmaker {
        match self {
            RawMarkets::Betpawa(_) => Bookmaker::Betpawa,
            RawMarkets::Sportybet(_) => Bookmaker::Sportybet,
            RawMarkets::Bet9ja(_) => Bookmaker::Bet9ja,
        }
    }

    /// Number of raw market entries (selections for Bet9ja).
    pub fn len(&self) -> usize {
        match self {
            RawMarkets::Betpawa(markets) => markets.len(),
            RawMarkets::Sportybet(markets) => markets.len(),
            RawMarkets::Bet9ja(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Platform trait
// ---------------------------------------------------------------------------

/// Abstraction over bookmaker odds APIs.
///
/// Implementors return fully-parsed response values or fail with a
/// [`FetchError`]. A client instance is safe to share across tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OddsPlatform: Send + Sync {
    /// Which bookmaker this client talks to.
    fn bookmaker(&self) -> Bookmaker;

    /// Whether full market depth needs a per-event fetch. The
    /// reference platform ships markets with its listings, so the
    /// coordinator skips `fetch_event` for it.
    fn requires_event_fetch(&self) -> bool;

    /// Fetch the football tournament list.
    async fn fetch_tournaments(&self) -> Result<Vec<PlatformTournament>, FetchError>;

    /// Fetch the events of one tournament.
    async fn fetch_events_by_tournament(
        &self,
        tournament_external_id: &str,
    ) -> Result<Vec<PlatformEvent>, FetchError>;

    /// Fetch full market depth for one event. `fetch_ref` is
    /// [`crate::types::PlatformEventRef::fetch_ref`] — the id field the
    /// platform's single-event endpoint expects.
    async fn fetch_event(&self, fetch_ref: &str) -> Result<RawMarkets, FetchError>;
}

// ---------------------------------------------------------------------------
// Shared request plumbing
// ---------------------------------------------------------------------------

/// Base delay of the exponential backoff schedule.
const BACKOFF_BASE_MS: u64 = 250;

/// GET `url` and parse the JSON body into `T`, retrying transient
/// failures (transport errors and HTTP 5xx) with bounded exponential
/// backoff. 4xx statuses and body-level rejections are the caller's
/// concern: the former surfaces here as `Api`, the latter after the
/// caller inspects its envelope.
pub(crate) async fn get_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    attempts: u32,
) -> Result<T, FetchError> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1));
            debug!(url, attempt, delay_ms = delay.as_millis() as u64, "Retrying fetch");
            tokio::time::sleep(delay).await;
        }

        let result = http.get(url).send().await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                let fetch_err = FetchError::from(err);
                if fetch_err.is_retryable() && attempt + 1 < attempts {
                    last_error = Some(fetch_err);
                    continue;
                }
                return Err(fetch_err);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            // 5xx-equivalent: retryable.
            let err = FetchError::Network(format!("HTTP {status} from {url}"));
            if attempt + 1 < attempts {
                last_error = Some(err);
                continue;
            }
            return Err(err);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Api {
                code: status.as_u16().to_string(),
                message: truncate_sample(&body),
            });
        }

        return response
            .json::<T>()
            .await
            .map_err(|err| FetchError::Parse(err.to_string()));
    }

    let err = last_error.unwrap_or_else(|| FetchError::Network(format!("no attempts made for {url}")));
    warn!(url, error = %err, "Fetch exhausted retries");
    Err(err)
}

/// Truncate a raw body sample for logging; keeps error rows bounded.
pub(crate) fn truncate_sample(raw: &str) -> String {
    const MAX: usize = 400;
    if raw.len() <= MAX {
        raw.to_string()
    } else {
        let mut end = MAX;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &raw[..end])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(
            FetchError::Network("timeout".into()).kind(),
            ScrapeErrorKind::Network
        );
        assert_eq!(
            FetchError::Api {
                code: "ERR".into(),
                message: "rejected".into()
            }
            .kind(),
            ScrapeErrorKind::Api
        );
        assert_eq!(
            FetchError::Parse("bad shape".into()).kind(),
            ScrapeErrorKind::Parse
        );
    }

    #[test]
    fn test_only_network_is_retryable() {
        assert!(FetchError::Network("reset".into()).is_retryable());
        assert!(!FetchError::Api {
            code: "ERR".into(),
            message: String::new()
        }
        .is_retryable());
        assert!(!FetchError::Parse("x".into()).is_retryable());
    }

    #[test]
    fn test_truncate_sample_short_passthrough() {
        assert_eq!(truncate_sample("{}"), "{}");
    }

    #[test]
    fn test_truncate_sample_long() {
        let long = "x".repeat(1000);
        let truncated = truncate_sample(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_truncate_sample_char_boundary() {
        // Multi-byte characters straddling the cap must not panic.
        let long = "é".repeat(400);
        let truncated = truncate_sample(&long);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn test_raw_markets_len() {
        let raw = RawMarkets::Bet9ja(HashMap::from([(
            "S_1X2_1".to_string(),
            rust_decimal_macros::dec!(2.1),
        )]));
        assert_eq!(raw.len(), 1);
        assert!(!raw.is_empty());
        assert_eq!(raw.bookmaker(), Bookmaker::Bet9ja);
    }
}
