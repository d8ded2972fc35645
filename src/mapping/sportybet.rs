//! SportyBet mapper.
//!
//! SportyBet parameterises markets through a semicolon-delimited
//! `specifier` string (`total=2.5`, `hcp=0:1;variant=sr:exact`). The
//! handicap value is either European (`"0:1"`) or Asian (`"-0.5"`).
//! Routing follows the catalogue entry's handler kind.

use std::collections::HashMap;
use tracing::debug;

use super::cache::MappingIndexes;
use super::{
    parse_handicap, parse_line, HandlerKind, MapResult, MappingError, MappingFailure,
    MarketMapping,
};
use crate::platforms::sportybet::SportybetRawMarket;
use crate::types::{Bookmaker, MappedMarket, MappedOutcome};

// ---------------------------------------------------------------------------
// Specifier grammar
// ---------------------------------------------------------------------------

/// Parsed `specifier` string: semicolon-delimited `key=value` pairs.
/// Known keys include `total`, `hcp`, `variant`, `goalnr`, `score`.
#[derive(Debug, Default)]
pub(crate) struct Specifier {
    pairs: HashMap<String, String>,
}

impl Specifier {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut pairs = HashMap::new();
        if let Some(raw) = raw {
            for part in raw.split(';') {
                if let Some((key, value)) = part.split_once('=') {
                    pairs.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
        }
        Specifier { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn total(&self) -> Option<&str> {
        self.get("total")
    }

    pub fn hcp(&self) -> Option<&str> {
        self.get("hcp")
    }
}

/// Canonicalise an over/under outcome descriptor. SportyBet feeds use
/// a handful of spellings for the two sides.
fn normalize_ou_desc(desc: &str) -> Option<&'static str> {
    match desc.trim().to_lowercase().as_str() {
        "over" | "o" => Some("Over"),
        "under" | "u" => Some("Under"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Map one event's SportyBet markets.
pub fn map(indexes: &MappingIndexes, markets: &[SportybetRawMarket]) -> MapResult {
    let mut result = MapResult::default();

    for raw in markets {
        match map_one(indexes, raw) {
            Ok(market) => result.markets.push(market),
            Err(error) => {
                debug!(raw_key = %raw.id, code = error.code(), "SportyBet market skipped");
                result.failures.push(MappingFailure {
                    bookmaker: Bookmaker::Sportybet,
                    raw_key: raw_key(raw),
                    error,
                    raw_outcomes: raw.outcomes.iter().map(|o| o.desc.clone()).collect(),
                });
            }
        }
    }

    result
}

/// Unmapped-log key: market id plus specifier, so parameter trouble is
/// visible in the accumulator.
fn raw_key(raw: &SportybetRawMarket) -> String {
    match raw.specifier.as_deref() {
        Some(spec) if !spec.is_empty() => format!("{}|{}", raw.id, spec),
        _ => raw.id.clone(),
    }
}

fn map_one(indexes: &MappingIndexes, raw: &SportybetRawMarket) -> Result<MappedMarket, MappingError> {
    let key = raw_key(raw);
    let mapping = indexes
        .find_by_sportybet(&raw.id)
        .ok_or_else(|| MappingError::UnknownMarket { raw_key: key.clone() })?;

    if mapping.handler == HandlerKind::Unsupported || mapping.betpawa_id.is_none() {
        return Err(MappingError::UnsupportedPlatform { raw_key: key });
    }

    let specifier = Specifier::parse(raw.specifier.as_deref());

    let (line, handicap, outcomes) = match mapping.handler {
        HandlerKind::Simple => (None, None, match_simple(&mapping, raw)),
        HandlerKind::OverUnder => {
            let total = specifier.total().ok_or_else(|| MappingError::UnknownParamMarket {
                raw_key: key.clone(),
                detail: "over/under market without specifier.total".to_string(),
            })?;
            let line = parse_line(total).ok_or_else(|| MappingError::UnknownParamMarket {
                raw_key: key.clone(),
                detail: format!("unparseable total {total:?}"),
            })?;
            (Some(line), None, match_over_under(&mapping, raw))
        }
        HandlerKind::Handicap => {
            let hcp = specifier.hcp().ok_or_else(|| MappingError::UnknownParamMarket {
                raw_key: key.clone(),
                detail: "handicap market without specifier.hcp".to_string(),
            })?;
            let handicap = parse_handicap(hcp).ok_or_else(|| MappingError::UnknownParamMarket {
                raw_key: key.clone(),
                detail: format!("unparseable hcp {hcp:?}"),
            })?;
            (Some(handicap.home), Some(handicap), match_handicap(&mapping, raw))
        }
        HandlerKind::Unsupported => unreachable!("rejected above"),
    };

    if outcomes.is_empty() {
        return Err(MappingError::NoMatchingOutcomes { raw_key: key });
    }

    Ok(MappedMarket {
        canonical_id: mapping.canonical_id.clone(),
        name: mapping.name.clone(),
        line,
        handicap,
        outcomes,
        groups: raw.group.clone().into_iter().collect(),
    })
}

fn ordered_outcomes(mapping: &MarketMapping) -> Vec<&super::OutcomeMapping> {
    let mut ordered: Vec<_> = mapping.outcomes.iter().collect();
    ordered.sort_by_key(|o| o.position);
    ordered
}

/// Simple markets match by raw `desc` against `sportybet_desc`.
fn match_simple(mapping: &MarketMapping, raw: &SportybetRawMarket) -> Vec<MappedOutcome> {
    ordered_outcomes(mapping)
        .into_iter()
        .filter_map(|om| {
            let desc = om.sportybet_desc.as_deref()?;
            let raw_outcome = raw.outcomes.iter().find(|o| o.desc == desc)?;
            Some(MappedOutcome {
                name: om.name.clone(),
                odds: raw_outcome.odds,
                is_active: raw_outcome.active(),
            })
        })
        .collect()
}

/// Over/under markets match by exact descriptor first (combo markets
/// carry full descriptors), then by the Over/Under alias spellings.
fn match_over_under(mapping: &MarketMapping, raw: &SportybetRawMarket) -> Vec<MappedOutcome> {
    let by_desc = match_simple(mapping, raw);
    if !by_desc.is_empty() {
        return by_desc;
    }

    ordered_outcomes(mapping)
        .into_iter()
        .filter_map(|om| {
            let desc = om.sportybet_desc.as_deref()?;
            let raw_outcome = raw
                .outcomes
                .iter()
                .find(|o| normalize_ou_desc(&o.desc) == Some(desc))?;
            Some(MappedOutcome {
                name: om.name.clone(),
                odds: raw_outcome.odds,
                is_active: raw_outcome.active(),
            })
        })
        .collect()
}

/// Handicap markets match by descriptor first; if no descriptor
/// aligns, fall back to position order.
fn match_handicap(mapping: &MarketMapping, raw: &SportybetRawMarket) -> Vec<MappedOutcome> {
    let by_desc = match_simple(mapping, raw);
    if !by_desc.is_empty() {
        return by_desc;
    }

    ordered_outcomes(mapping)
        .into_iter()
        .zip(raw.outcomes.iter())
        .map(|(om, raw_outcome)| MappedOutcome {
            name: om.name.clone(),
            odds: raw_outcome.odds,
            is_active: raw_outcome.active(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
