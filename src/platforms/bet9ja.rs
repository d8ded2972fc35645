//! Bet9ja competitor integration.
//!
//! Bet9ja wraps responses in a success-code envelope where the listing
//! endpoints answer `R: "OK"` and the single-event endpoint answers
//! `R: "D"` — both codes are accepted on both endpoints. Market data
//! is a flat map of selection keys (`S_OU@2.5_O`) to odds. The
//! single-event endpoint takes the `EID` field, not the listing `ID`;
//! listings carry both so the coordinator can pass the right one.
//! There is no cross-platform id at tournament level.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{
    get_json, Bet9jaOddsMap, FetchError, OddsPlatform, PlatformEvent, PlatformTournament,
    RawMarkets,
};
use crate::config::PlatformConfig;
use crate::types::Bookmaker;

const USER_AGENT: &str = "pawarisk/0.1.0";
const SITE: &str = "https://sports.bet9ja.com/";

/// Success codes of the Bet9ja envelope: listings answer `OK`, the
/// single-event endpoint answers `D`.
const SUCCESS_CODES: &[&str] = &["OK", "D"];

// ---------------------------------------------------------------------------
// API response types (Bet9ja JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "R")]
    r: String,
    #[serde(rename = "D", default = "Option::default")]
    d: Option<T>,
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, FetchError> {
    if !SUCCESS_CODES.contains(&envelope.r.as_str()) {
        return Err(FetchError::Api {
            code: envelope.r,
            message: "Bet9ja envelope rejected the request".to_string(),
        });
    }
    envelope
        .d
        .ok_or_else(|| FetchError::Parse("Bet9ja success envelope with missing D".to_string()))
}

#[derive(Debug, Deserialize)]
struct RawTournament {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "NAME")]
    name: String,
    #[serde(rename = "AREANAME", default)]
    area_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawListedEvent {
    /// Listing id.
    #[serde(rename = "ID")]
    id: i64,
    /// Id required by the single-event endpoint.
    #[serde(rename = "EID")]
    eid: i64,
    #[serde(rename = "START", default)]
    start: Option<DateTime<Utc>>,
    #[serde(rename = "HOME", default)]
    home: String,
    #[serde(rename = "AWAY", default)]
    away: String,
    #[serde(rename = "BETRADARID", default)]
    betradar_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawEventDetail {
    #[serde(rename = "O", default)]
    odds: Bet9jaOddsMap,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Bet9ja platform client.
pub struct Bet9jaClient {
    http: Client,
    base_url: String,
    retry_attempts: u32,
}

impl Bet9jaClient {
    pub fn new(cfg: &PlatformConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(REFERER, HeaderValue::from_static(SITE));

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client for Bet9ja")?;

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
        let kickoff_time = raw.start?;
        Some(PlatformEvent {
            external_id: raw.id.to_string(),
            fetch_id: Some(raw.eid.to_string()),
            sportradar_id: raw.betradar_id.map(|id| id.to_string()),
            kickoff_time,
            home_team: raw.home,
            away_team: raw.away,
            raw_markets: None,
        })
    }
}

// ---------------------------------------------------------------------------
// OddsPlatform trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OddsPlatform for Bet9jaClient {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::Bet9ja
    }

    fn requires_event_fetch(&self) -> bool {
        true
    }

    async fn fetch_tournaments(&self) -> Result<Vec<PlatformTournament>, FetchError> {
        let url = format!("{}/sportsbook/groups?sport=1", self.base_url);
        let tournaments: Vec<RawTournament> = self.get_enveloped(&url).await?;

        debug!(count = tournaments.len(), "Bet9ja tournaments fetched");

        Ok(tournaments
            .into_iter()
            .map(|t| PlatformTournament {
                external_id: t.id.to_string(),
                name: t.name,
                country: t.area_name,
                // No cross-platform id at tournament level.
                sportradar_id: None,
            })
            .collect())
    }

    async fn fetch_events_by_tournament(
        &self,
        tournament_external_id: &str,
    ) -> Result<Vec<PlatformEvent>, FetchError> {
        let url = format!(
            "{}/sportsbook/events?group={}",
            self.base_url,
            urlencoding::encode(tournament_external_id),
        );
        let events: Vec<RawListedEvent> = self.get_enveloped(&url).await?;

        Ok(events.into_iter().filter_map(Bet9jaClient::convert_event).collect())
    }

    async fn fetch_event(&self, fetch_ref: &str) -> Result<RawMarkets, FetchError> {
        let url = format!(
            "{}/sportsbook/event?EID={}",
            self.base_url,
            urlencoding::encode(fetch_ref),
        );
        let detail: RawEventDetail = self.get_enveloped(&url).await?;
        Ok(RawMarkets::Bet9ja(detail.odds))
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
    fn test_envelope_accepts_ok() {
        let json = r#"{"R": "OK", "D": [1, 2]}"#;
        let envelope: Envelope<Vec<i32>> = serde_json::from_str(json).unwrap();
        assert_eq!(unwrap_envelope(envelope).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_envelope_accepts_d() {
        // The single-event endpoint uses a different success code.
        let json = r#"{"R": "D", "D": {"O": {"S_1X2_1": 2.10}}}"#;
        let envelope: Envelope<RawEventDetail> = serde_json::from_str(json).unwrap();
        let detail = unwrap_envelope(envelope).unwrap();
        assert_eq!(detail.odds.get("S_1X2_1"), Some(&dec!(2.10)));
    }

    #[test]
    fn test_envelope_rejects_err() {
        let json = r#"{"R": "ERR"}"#;
        let envelope: Envelope<RawEventDetail> = serde_json::from_str(json).unwrap();
        let err = unwrap_envelope(envelope).unwrap_err();
        match err {
            FetchError::Api { code, .. } => assert_eq!(code, "ERR"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_convert_event_uses_eid_for_fetch() {
        let raw = RawListedEvent {
            id: 445_120,
            eid: 900_112,
            start: Some("2026-08-02T15:00:00Z".parse().unwrap()),
            home: "Enyimba FC".to_string(),
            away: "Kano Pillars".to_string(),
            betradar_id: Some(5_551_234),
        };
        let event = Bet9jaClient::convert_event(raw).unwrap();
        assert_eq!(event.external_id, "445120");
        assert_eq!(event.fetch_id.as_deref(), Some("900112"));
        assert_eq!(event.sportradar_id.as_deref(), Some("5551234"));
    }

    #[test]
    fn test_convert_event_without_betradar_id() {
        let raw = RawListedEvent {
            id: 1,
            eid: 2,
            start: Some(Utc::now()),
            home: String::new(),
            away: String::new(),
            betradar_id: None,
        };
        let event = Bet9jaClient::convert_event(raw).unwrap();
        assert!(event.sportradar_id.is_none());
    }

    #[test]
    fn test_convert_event_missing_start() {
        let raw = RawListedEvent {
            id: 1,
            eid: 2,
            start: None,
            home: String::new(),
            away: String::new(),
            betradar_id: None,
        };
        assert!(Bet9jaClient::convert_event(raw).is_none());
    }

    #[test]
    fn test_parse_listing_payload() {
        let json = r#"{
            "R": "OK",
            "D": [
                {
                    "ID": 445120,
                    "EID": 900112,
                    "START": "2026-08-02T15:00:00Z",
                    "HOME": "Rivers United",
                    "AWAY": "Remo Stars",
                    "BETRADARID": 5551234
                }
            ]
        }"#;
        let envelope: Envelope<Vec<RawListedEvent>> = serde_json::from_str(json).unwrap();
        let events = unwrap_envelope(envelope).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].eid, 900_112);
    }
}
