//! Market mapping engine.
//!
//! Translates each platform's market identifiers and outcome
//! descriptors into the canonical catalogue form. The catalogue is
//! merged from two sources — code-shipped entries and operator entries
//! from the store — and indexed per platform by [`cache::MappingCache`].
//! Correct mapping is a precondition for cross-platform comparison and
//! change detection, so mapping failures are logged-and-skipped per
//! market, never fatal for an event.

pub mod bet9ja;
pub mod betpawa;
pub mod cache;
pub mod catalogue;
pub mod sportybet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::platforms::RawMarkets;
use crate::types::{Bookmaker, MappedMarket};

// ---------------------------------------------------------------------------
// Catalogue entry types
// ---------------------------------------------------------------------------

/// How a canonical market's outcomes are matched and parameterised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Simple,
    OverUnder,
    Handicap,
    /// The market exists in the catalogue but is intentionally not
    /// comparable across platforms.
    Unsupported,
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::Simple => "simple",
            HandlerKind::OverUnder => "over_under",
            HandlerKind::Handicap => "handicap",
            HandlerKind::Unsupported => "unsupported",
        }
    }
}

impl std::str::FromStr for HandlerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(HandlerKind::Simple),
            "over_under" => Ok(HandlerKind::OverUnder),
            "handicap" => Ok(HandlerKind::Handicap),
            "unsupported" => Ok(HandlerKind::Unsupported),
            _ => Err(anyhow::anyhow!("Unknown handler kind: {s}")),
        }
    }
}

/// Where a catalogue entry came from. Operator (`Db`) entries win over
/// code entries for the same canonical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Code,
    Db,
}

/// Maps one canonical outcome to its per-platform descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMapping {
    /// Canonical outcome name, e.g. `"1"`, `"Over"`.
    pub name: String,
    pub betpawa_name: Option<String>,
    pub sportybet_desc: Option<String>,
    pub bet9ja_suffix: Option<String>,
    pub position: u16,
}

/// One canonical market and its per-platform identifiers. Immutable
/// once built; the merged catalogue is the single source of truth for
/// canonical ids across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMapping {
    pub canonical_id: String,
    pub name: String,
    pub handler: HandlerKind,
    pub betpawa_id: Option<String>,
    pub sportybet_id: Option<String>,
    pub bet9ja_key: Option<String>,
    pub outcomes: Vec<OutcomeMapping>,
    pub source: MappingSource,
    pub priority: i32,
}

impl MarketMapping {
    pub fn outcome_by_betpawa(&self, name: &str) -> Option<&OutcomeMapping> {
        self.outcomes
            .iter()
            .find(|o| o.betpawa_name.as_deref() == Some(name))
    }

    pub fn outcome_by_sportybet(&self, desc: &str) -> Option<&OutcomeMapping> {
        self.outcomes
            .iter()
            .find(|o| o.sportybet_desc.as_deref() == Some(desc))
    }

    /// Bet9ja suffix matching is case-sensitive.
    pub fn outcome_by_bet9ja(&self, suffix: &str) -> Option<&OutcomeMapping> {
        self.outcomes
            .iter()
            .find(|o| o.bet9ja_suffix.as_deref() == Some(suffix))
    }
}

// ---------------------------------------------------------------------------
// Mapping failures
// ---------------------------------------------------------------------------

/// Per-market mapping failure modes. A failed market is omitted from
/// the event's mapped list and accumulated in the unmapped-market log.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MappingError {
    #[error("no catalogue entry for raw market {raw_key}")]
    UnknownMarket { raw_key: String },

    #[error("catalogue entry for {raw_key} rejects this parameterisation: {detail}")]
    UnknownParamMarket { raw_key: String, detail: String },

    #[error("no outcome descriptors aligned for raw market {raw_key}")]
    NoMatchingOutcomes { raw_key: String },

    #[error("raw market {raw_key} is intentionally not mappable to the reference platform")]
    UnsupportedPlatform { raw_key: String },
}

impl MappingError {
    pub fn code(&self) -> &'static str {
        match self {
            MappingError::UnknownMarket { .. } => "UNKNOWN_MARKET",
            MappingError::UnknownParamMarket { .. } => "UNKNOWN_PARAM_MARKET",
            MappingError::NoMatchingOutcomes { .. } => "NO_MATCHING_OUTCOMES",
            MappingError::UnsupportedPlatform { .. } => "UNSUPPORTED_PLATFORM",
        }
    }

    pub fn raw_key(&self) -> &str {
        match self {
            MappingError::UnknownMarket { raw_key }
            | MappingError::UnknownParamMarket { raw_key, .. }
            | MappingError::NoMatchingOutcomes { raw_key }
            | MappingError::UnsupportedPlatform { raw_key } => raw_key,
        }
    }
}

/// One skipped market, with enough context for the unmapped log.
#[derive(Debug, Clone)]
pub struct MappingFailure {
    pub bookmaker: Bookmaker,
    pub raw_key: String,
    pub error: MappingError,
    /// Raw outcome descriptors, for diagnosis.
    pub raw_outcomes: Vec<String>,
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.bookmaker, self.error.code(), self.raw_key)
    }
}

/// Output of mapping one platform's raw market set for one event.
#[derive(Debug, Default)]
pub struct MapResult {
    pub markets: Vec<MappedMarket>,
    pub failures: Vec<MappingFailure>,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Map one event's raw markets through the catalogue snapshot,
/// dispatching to the platform-specific mapper. Output is emitted in
/// catalogue order per market and position order per outcome, so a
/// fixed catalogue and identical raw input always produce identical
/// output.
pub fn map_markets(indexes: &cache::MappingIndexes, raw: &RawMarkets) -> MapResult {
    let mut result = match raw {
        RawMarkets::Betpawa(markets) => betpawa::map(indexes, markets),
        RawMarkets::Sportybet(markets) => sportybet::map(indexes, markets),
        RawMarkets::Bet9ja(odds) => bet9ja::map(indexes, odds),
    };
    sort_catalogue_order(indexes, &mut result.markets);
    result
}

/// Stable output ordering: catalogue ordinal first, then line, then
/// canonical id as a tiebreak for entries the snapshot doesn't know.
fn sort_catalogue_order(indexes: &cache::MappingIndexes, markets: &mut [MappedMarket]) {
    markets.sort_by(|a, b| {
        let ord_a = indexes.ordinal(&a.canonical_id).unwrap_or(usize::MAX);
        let ord_b = indexes.ordinal(&b.canonical_id).unwrap_or(usize::MAX);
        ord_a
            .cmp(&ord_b)
            .then_with(|| {
                crate::types::line_or_zero(a.line).cmp(&crate::types::line_or_zero(b.line))
            })
            .then_with(|| a.canonical_id.cmp(&b.canonical_id))
    });
}

/// Parse a decimal market parameter (a line), rejecting NaN-ish junk.
pub(crate) fn parse_line(raw: &str) -> Option<Decimal> {
    raw.trim().parse::<Decimal>().ok()
}

/// Parse a handicap value in either platform notation:
/// European `"0:1"` (home starts 0, away starts 1 → `home=-1, away=+1`)
/// or Asian `"-0.5"` (→ `home=-0.5, away=+0.5`). Always `away == -home`.
pub(crate) fn parse_handicap(raw: &str) -> Option<crate::types::Handicap> {
    use crate::types::{Handicap, HandicapKind};

    let raw = raw.trim();
    if let Some((home_part, away_part)) = raw.split_once(':') {
        let home_start: Decimal = home_part.trim().parse().ok()?;
        let away_start: Decimal = away_part.trim().parse().ok()?;
        Some(Handicap {
            kind: HandicapKind::European,
            home: home_start - away_start,
            away: away_start - home_start,
        })
    } else {
        let line: Decimal = raw.parse().ok()?;
        Some(Handicap {
            kind: HandicapKind::Asian,
            home: line,
            away: -line,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
