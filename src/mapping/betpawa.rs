//! Reference-platform mapper.
//!
//! BetPawa markets arrive already structured, so mapping is mostly a
//! catalogue lookup to attach the canonical id, plus copying the
//! formatted handicap into `line` so the cross-platform join key
//! `(canonical_id, line)` works.

use tracing::debug;

use super::cache::MappingIndexes;
use super::{
    parse_handicap, parse_line, HandlerKind, MapResult, MappingError, MappingFailure,
    MarketMapping,
};
use crate::platforms::betpawa::BetpawaRawMarket;
use crate::types::{Bookmaker, MappedMarket, MappedOutcome};

/// Map one event's BetPawa markets.
pub fn map(indexes: &MappingIndexes, markets: &[BetpawaRawMarket]) -> MapResult {
    let mut result = MapResult::default();

    for raw in markets {
        match map_one(indexes, raw) {
            Ok(market) => result.markets.push(market),
            Err(error) => {
                debug!(raw_key = %raw.id, code = error.code(), "BetPawa market skipped");
                result.failures.push(MappingFailure {
                    bookmaker: Bookmaker::Betpawa,
                    raw_key: raw.id.clone(),
                    error,
                    raw_outcomes: raw.outcomes.iter().map(|o| o.name.clone()).collect(),
                });
            }
        }
    }

    result
}

fn map_one(indexes: &MappingIndexes, raw: &BetpawaRawMarket) -> Result<MappedMarket, MappingError> {
    let mapping = indexes
        .find_by_betpawa(&raw.id)
        .ok_or_else(|| MappingError::UnknownMarket { raw_key: raw.id.clone() })?;

    if mapping.handler == HandlerKind::Unsupported {
        return Err(MappingError::UnsupportedPlatform { raw_key: raw.id.clone() });
    }

    let (line, handicap) = match mapping.handler {
        HandlerKind::Simple => (None, None),
        HandlerKind::OverUnder => {
            let param = raw.formatted_handicap.as_deref().ok_or_else(|| {
                MappingError::UnknownParamMarket {
                    raw_key: raw.id.clone(),
                    detail: "over/under market without formatted handicap".to_string(),
                }
            })?;
            let line = parse_line(param).ok_or_else(|| MappingError::UnknownParamMarket {
                raw_key: raw.id.clone(),
                detail: format!("unparseable total {param:?}"),
            })?;
            (Some(line), None)
        }
        HandlerKind::Handicap => {
            let param = raw.formatted_handicap.as_deref().ok_or_else(|| {
                MappingError::UnknownParamMarket {
                    raw_key: raw.id.clone(),
                    detail: "handicap market without formatted handicap".to_string(),
                }
            })?;
            let handicap = parse_handicap(param).ok_or_else(|| {
                MappingError::UnknownParamMarket {
                    raw_key: raw.id.clone(),
                    detail: format!("unparseable handicap {param:?}"),
                }
            })?;
            (Some(handicap.home), Some(handicap))
        }
        HandlerKind::Unsupported => unreachable!("rejected above"),
    };

    let outcomes = match_outcomes(&mapping, raw);
    if outcomes.is_empty() {
        return Err(MappingError::NoMatchingOutcomes { raw_key: raw.id.clone() });
    }

    Ok(MappedMarket {
        canonical_id: mapping.canonical_id.clone(),
        name: mapping.name.clone(),
        line,
        handicap,
        outcomes,
        groups: raw.groups.clone(),
    })
}

/// Emit outcomes in catalogue position order, matched by the BetPawa
/// display name.
fn match_outcomes(mapping: &MarketMapping, raw: &BetpawaRawMarket) -> Vec<MappedOutcome> {
    let mut ordered: Vec<_> = mapping.outcomes.iter().collect();
    ordered.sort_by_key(|o| o.position);

    ordered
        .into_iter()
        .filter_map(|om| {
            let name = om.betpawa_name.as_deref()?;
            let raw_outcome = raw.outcomes.iter().find(|o| o.name == name)?;
            Some(MappedOutcome {
                name: om.name.clone(),
                odds: raw_outcome.odds,
                is_active: raw_outcome.is_active,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
