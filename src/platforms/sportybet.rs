//! SportyBet competitor integration.
//!
//! SportyBet speaks a `bizCode` envelope: `10000` is success, anything
//! else is a rejection that must not be retried. Event ids are
//! Sportradar-prefixed (`sr:match:<n>`) — only the numeric suffix is
//! stored as the cross-platform id. Tournament listings are
//! market-shallow, so full depth comes from the per-event endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{get_json, FetchError, OddsPlatform, PlatformEvent, PlatformTournament, RawMarkets};
use crate::config::PlatformConfig;
use crate::types::Bookmaker;

const USER_AGENT: &str = "pawarisk/0.1.0";
const PLATFORM_HEADER: &str = "clientid";
const PLATFORM: &str = "web";

/// The success code of the SportyBet envelope.
const BIZ_OK: i64 = 10_000;

/// Sportradar match-id prefix used by SportyBet event ids.
const SR_MATCH_PREFIX: &str = "sr:match:";

// ---------------------------------------------------------------------------
// API response types (SportyBet JSON → Rust)
// ---------------------------------------------------------------------------

/// Every SportyBet response is wrapped in this envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "bizCode")]
    biz_code: i64,
    #[serde(default)]
    message: String,
    #[serde(default = "Option::default")]
    data: Option<T>,
}

/// Unwrap an envelope: `bizCode != 10000` is an API rejection and is
/// never retried.
fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, FetchError> {
    if envelope.biz_code != BIZ_OK {
        return Err(FetchError::Api {
            code: envelope.biz_code.to_string(),
            message: envelope.message,
        });
    }
    envelope.data.ok_or_else(|| {
        FetchError::Parse("SportyBet success envelope with missing data".to_string())
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTournament {
    id: String,
    name: String,
    #[serde(default)]
    category_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListedEvent {
    event_id: String,
    /// Epoch milliseconds.
    #[serde(default)]
    estimate_start_time: i64,
    #[serde(default)]
    home_team_name: String,
    #[serde(default)]
    away_team_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventDetail {
    #[serde(default)]
    markets: Vec<SportybetRawMarket>,
}

/// One raw SportyBet market. The `specifier` string parameterises
/// over/under and handicap markets (`total=2.5`, `hcp=0:1`, …).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportybetRawMarket {
    pub id: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub specifier: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub outcomes: Vec<SportybetRawOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SportybetRawOutcome {
    #[serde(default)]
    pub id: String,
    pub desc: String,
    pub odds: Decimal,
    /// 1 = active, 0 = suspended.
    #[serde(default = "default_active")]
    pub is_active: i32,
}

fn default_active() -> i32 {
    1
}

impl SportybetRawOutcome {
    pub fn active(&self) -> bool {
        self.is_active != 0
    }
}

/// Extract the numeric suffix from a Sportradar-prefixed id. A bare
/// numeric id passes through unchanged.
pub fn sportradar_numeric(raw: &str) -> Option<String> {
    let candidate = raw.strip_prefix(SR_MATCH_PREFIX).unwrap_or(raw);
    (!candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()))
        .then(|| candidate.to_string())
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// SportyBet platform client.
pub struct SportybetClient {
    http: Client,
    base_url: String,
    retry_attempts: u32,
}

impl SportybetClient {
    pub fn new(cfg: &PlatformConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(PLATFORM_HEADER, HeaderValue::from_static(PLATFORM));

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client for SportyBet")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            retry_attempts: cfg.retry_attempts,
        })
    }

    async fn get_enveloped<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let envelope: Envelope<T> = get_json(&self.http, url, self.retry_attempts).await?;
        unwrap_envelope(envelope)
    }

    fn convert_event(raw: RawListedEvent) -> Option<PlatformEvent> {
        let kickoff_time = ms_to_datetime(raw.estimate_start_time)?;
        let sportradar_id = sportradar_numeric(&raw.event_id);
        Some(PlatformEvent {
            external_id: raw.event_id,
            fetch_id: None,
            sportradar_id,
            kickoff_time,
            home_team: raw.home_team_name,
            away_team: raw.away_team_name,
            raw_markets: None,
        })
    }
}

/// Convert an epoch-millisecond timestamp; zero and negatives are
/// treated as missing.
fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

// ---------------------------------------------------------------------------
// OddsPlatform trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OddsPlatform for SportybetClient {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::Sportybet
    }

    /// Listings are market-shallow; full depth needs the per-event call.
    fn requires_event_fetch(&self) -> bool {
        true
    }

    async fn fetch_tournaments(&self) -> Result<Vec<PlatformTournament>, FetchError> {
        let url = format!("{}/factsCenter/tournaments?sportId=sr%3Asport%3A1", self.base_url);
        let tournaments: Vec<RawTournament> = self.get_enveloped(&url).await?;

        debug!(count = tournaments.len(), "SportyBet tournaments fetched");

        Ok(tournaments
            .into_iter()
            .map(|t| PlatformTournament {
                sportradar_id: sportradar_numeric(&t.id),
                external_id: t.id,
                name: t.name,
                country: t.category_name,
            })
            .collect())
    }

    async fn fetch_events_by_tournament(
        &self,
        tournament_external_id: &str,
    ) -> Result<Vec<PlatformEvent>, FetchError> {
        let url = format!(
            "{}/factsCenter/events?tournamentId={}",
            self.base_url,
            urlencoding::encode(tournament_external_id),
        );
        let events: Vec<RawListedEvent> = self.get_enveloped(&url).await?;

        Ok(events.into_iter().filter_map(SportybetClient::convert_event).collect())
    }

    async fn fetch_event(&self, fetch_ref: &str) -> Result<RawMarkets, FetchError> {
        let url = format!(
            "{}/factsCenter/event?eventId={}",
            self.base_url,
            urlencoding::encode(fetch_ref),
        );
        let detail: RawEventDetail = self.get_enveloped(&url).await?;
        Ok(RawMarkets::Sportybet(detail.markets))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sportradar_numeric_prefixed() {
        assert_eq!(sportradar_numeric("sr:match:5551234").as_deref(), Some("5551234"));
    }

    #[test]
    fn test_sportradar_numeric_bare() {
        assert_eq!(sportradar_numeric("5551234").as_deref(), Some("5551234"));
    }

    #[test]
    fn test_sportradar_numeric_rejects_non_numeric() {
        assert!(sportradar_numeric("sr:match:").is_none());
        assert!(sportradar_numeric("sr:tournament:abc").is_none());
        assert!(sportradar_numeric("").is_none());
    }

    #[test]
    fn test_envelope_success() {
        let json = r#"{"bizCode": 10000, "message": "0000", "data": [1, 2, 3]}"#;
        let envelope: Envelope<Vec<i32>> = serde_json::from_str(json).unwrap();
        assert_eq!(unwrap_envelope(envelope).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_envelope_rejection_is_api_error() {
        let json = r#"{"bizCode": 19999, "message": "system busy"}"#;
        let envelope: Envelope<Vec<i32>> = serde_json::from_str(json).unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        match err {
            FetchError::Api { code, message } => {
                assert_eq!(code, "19999");
                assert_eq!(message, "system busy");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        // And the rejection is not retryable.
        let json = r#"{"bizCode": 19999, "message": "system busy"}"#;
        let envelope: Envelope<Vec<i32>> = serde_json::from_str(json).unwrap();
        assert!(!unwrap_envelope(envelope).unwrap_err().is_retryable());
    }

    #[test]
    fn test_envelope_success_without_data() {
        let json = r#"{"bizCode": 10000, "message": "0000"}"#;
        let envelope: Envelope<Vec<i32>> = serde_json::from_str(json).unwrap();
        assert!(matches!(unwrap_envelope(envelope), Err(FetchError::Parse(_))));
    }

    #[test]
    fn test_parse_raw_market_with_specifier() {
        let json = r#"{
            "id": "18",
            "desc": "Over/Under",
            "specifier": "total=2.5",
            "group": "Main",
            "outcomes": [
                {"id": "12", "desc": "Over", "odds": 1.85, "isActive": 1},
                {"id": "13", "desc": "Under", "odds": 1.95, "isActive": 0}
            ]
        }"#;
        let market: SportybetRawMarket = serde_json::from_str(json).unwrap();
        assert_eq!(market.specifier.as_deref(), Some("total=2.5"));
        assert_eq!(market.outcomes[0].odds, dec!(1.85));
        assert!(market.outcomes[0].active());
        assert!(!market.outcomes[1].active());
    }

    #[test]
    fn test_convert_event_strips_sr_prefix() {
        let raw = RawListedEvent {
            event_id: "sr:match:424242".to_string(),
            estimate_start_time: 1_780_000_000_000,
            home_team_name: "Gor Mahia".to_string(),
            away_team_name: "AFC Leopards".to_string(),
        };
        let event = SportybetClient::convert_event(raw).unwrap();
        assert_eq!(event.external_id, "sr:match:424242");
        assert_eq!(event.sportradar_id.as_deref(), Some("424242"));
        assert!(event.raw_markets.is_none());
    }

    #[test]
    fn test_convert_event_missing_start_time() {
        let raw = RawListedEvent {
            event_id: "sr:match:1".to_string(),
            estimate_start_time: 0,
            home_team_name: String::new(),
            away_team_name: String::new(),
        };
        assert!(SportybetClient::convert_event(raw).is_none());
    }

    #[test]
    fn test_ms_to_datetime() {
        use chrono::Datelike;
        let dt = ms_to_datetime(1_700_000_000_000).unwrap();
        assert_eq!(dt.year(), 2023);
        assert!(ms_to_datetime(0).is_none());
        assert!(ms_to_datetime(-5).is_none());
    }
}
