//! BetPawa reference-platform integration.
//!
//! BetPawa is the canonical catalogue source. Tournament listings are
//! fetched first; the per-tournament event listing already carries the
//! full market depth, so there is no single-event endpoint. The
//! cross-platform id lives under a nested `SPORTRADAR` widget on each
//! event — only the numeric id is kept.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{get_json, FetchError, OddsPlatform, PlatformEvent, PlatformTournament, RawMarkets};
use crate::config::PlatformConfig;
use crate::types::Bookmaker;

const USER_AGENT: &str = "pawarisk/0.1.0";
const BRAND_HEADER: &str = "x-pawa-brand";
const BRAND: &str = "betpawa-nigeria";

/// Widget type carrying the cross-platform id.
const SPORTRADAR_WIDGET: &str = "SPORTRADAR";

// ---------------------------------------------------------------------------
// API response types (BetPawa JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CompetitionsResponse {
    #[serde(default)]
    competitions: Vec<RawCompetition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompetition {
    id: String,
    name: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    sportradar_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<BetpawaRawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaRawEvent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<BetpawaParticipant>,
    #[serde(default)]
    pub widgets: Vec<BetpawaWidget>,
    #[serde(default)]
    pub markets: Vec<BetpawaRawMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaParticipant {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BetpawaWidget {
    #[serde(rename = "type")]
    pub widget_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One market row as BetPawa ships it: already structured, with the
/// platform market id and an optional formatted handicap ("2.5",
/// "-1.5") that becomes the canonical `line`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaRawMarket {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub formatted_handicap: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<BetpawaRawOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetpawaRawOutcome {
    pub name: String,
    pub odds: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl BetpawaRawEvent {
    /// Extract the numeric sportradar id from the nested widget, when
    /// present. Both `{"id": 5551234}` and `{"id": "5551234"}` shapes
    /// occur in the wild.
    pub fn sportradar_id(&self) -> Option<String> {
        let widget = self
            .widgets
            .iter()
            .find(|w| w.widget_type == SPORTRADAR_WIDGET)?;
        let id = widget.data.get("id").or_else(|| widget.data.get("matchId"))?;
        match id {
            serde_json::Value::Number(n) => n.as_i64().map(|v| v.to_string()),
            serde_json::Value::String(s) => {
                let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
                (!digits.is_empty()).then_some(digits)
            }
            _ => None,
        }
    }

    /// Home/away team names: participants when available, otherwise
    /// the event name split on " - ".
    pub fn teams(&self) -> (String, String) {
        if self.participants.len() >= 2 {
            return (
                self.participants[0].name.clone(),
                self.participants[1].name.clone(),
            );
        }
        match self.name.split_once(" - ") {
            Some((home, away)) => (home.trim().to_string(), away.trim().to_string()),
            None => (self.name.clone(), String::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// BetPawa platform client.
pub struct BetpawaClient {
    http: Client,
    base_url: String,
    retry_attempts: u32,
}

impl BetpawaClient {
    pub fn new(cfg: &PlatformConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(BRAND_HEADER, HeaderValue::from_static(BRAND));

        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client for BetPawa")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            retry_attempts: cfg.retry_attempts,
        })
    }

    fn convert_event(raw: BetpawaRawEvent) -> Option<PlatformEvent> {
        let kickoff_time = match raw.start_time {
            Some(t) => t,
            None => {
                warn!(event_id = %raw.id, "BetPawa event without start time, skipping");
                return None;
            }
        };
        let sportradar_id = raw.sportradar_id();
        let (home_team, away_team) = raw.teams();
        Some(PlatformEvent {
            external_id: raw.id,
            fetch_id: None,
            sportradar_id,
            kickoff_time,
            home_team,
            away_team,
            raw_markets: Some(RawMarkets::Betpawa(raw.markets)),
        })
    }
}

// ---------------------------------------------------------------------------
// OddsPlatform trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl OddsPlatform for BetpawaClient {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::Betpawa
    }

    /// Markets arrive with the event listings.
    fn requires_event_fetch(&self) -> bool {
        false
    }

    async fn fetch_tournaments(&self) -> Result<Vec<PlatformTournament>, FetchError> {
        let url = format!("{}/sportsbook/competitions/football", self.base_url);
        let response: CompetitionsResponse =
            get_json(&self.http, &url, self.retry_attempts).await?;

        debug!(count = response.competitions.len(), "BetPawa tournaments fetched");

        Ok(response
            .competitions
            .into_iter()
            .map(|c| PlatformTournament {
                external_id: c.id,
                name: c.name,
                country: c.country,
                sportradar_id: c.sportradar_id,
            })
            .collect())
    }

    async fn fetch_events_by_tournament(
        &self,
        tournament_external_id: &str,
    ) -> Result<Vec<PlatformEvent>, FetchError> {
        let url = format!(
            "{}/sportsbook/events?competitionId={}&includeMarkets=ALL",
            self.base_url,
            urlencoding::encode(tournament_external_id),
        );
        let response: EventsResponse = get_json(&self.http, &url, self.retry_attempts).await?;

        Ok(response
            .events
            .into_iter()
            .filter_map(Self::convert_event)
            .collect())
    }

    async fn fetch_event(&self, fetch_ref: &str) -> Result<RawMarkets, FetchError> {
        Err(FetchError::Api {
            code: "unsupported".to_string(),
            message: format!("BetPawa has no single-event endpoint (ref {fetch_ref})"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
