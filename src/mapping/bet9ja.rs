//! Bet9ja mapper.
//!
//! Bet9ja ships an event's markets as a flat map of selection keys to
//! odds, with market, line and outcome all packed into the key:
//! `S_OU@2.5_O` is "Over/Under, total 2.5, Over". Keys are parsed,
//! grouped by `(market_key, param)`, looked up with longest-prefix
//! matching and routed through the over/under and handicap key sets.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

use super::cache::MappingIndexes;
use super::{
    parse_handicap, parse_line, HandlerKind, MapResult, MappingError, MappingFailure,
    MarketMapping,
};
use crate::platforms::Bet9jaOddsMap;
use crate::types::{Bookmaker, MappedMarket, MappedOutcome};
use rust_decimal::Decimal;

/// Selection key grammar: `S_<market>[@<param>]_<outcome>`.
fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^S_([A-Z0-9_\-]+?)(?:@([^_]+))?_(.+)$").expect("bet9ja key regex is valid")
    })
}

/// Market keys that are over/under shaped (the param is a total).
const OVER_UNDER_KEYS: &[&str] = &[
    "OU", "OU1T", "OU2T", "OUHOME", "OUAWAY", "OUHOME1T", "OUAWAY1T", "CROU", "CROU1T",
    "1X2OU", "GGOU",
];

/// Market keys that are handicap shaped (the param is a line).
const HANDICAP_KEYS: &[&str] = &["HND", "HND1T", "AHND", "CRHND"];

fn is_over_under_key(market_key: &str) -> bool {
    OVER_UNDER_KEYS.contains(&market_key)
}

fn is_handicap_key(market_key: &str) -> bool {
    HANDICAP_KEYS.contains(&market_key)
}

/// One parsed selection key.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedKey {
    market_key: String,
    param: Option<String>,
    suffix: String,
}

fn parse_key(raw: &str) -> Option<ParsedKey> {
    let captures = key_regex().captures(raw)?;
    Some(ParsedKey {
        market_key: captures.get(1)?.as_str().to_string(),
        param: captures.get(2).map(|m| m.as_str().to_string()),
        suffix: captures.get(3)?.as_str().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Map one event's Bet9ja odds map.
pub fn map(indexes: &MappingIndexes, odds: &Bet9jaOddsMap) -> MapResult {
    let mut result = MapResult::default();

    // Group selections by (market_key, param). BTreeMap keeps the
    // grouping order deterministic regardless of map iteration order.
    let mut groups: BTreeMap<(String, Option<String>), Vec<(String, String, Decimal)>> =
        BTreeMap::new();
    for (raw_key, &price) in odds {
        match parse_key(raw_key) {
            Some(parsed) => {
                groups
                    .entry((parsed.market_key, parsed.param))
                    .or_default()
                    .push((parsed.suffix, raw_key.clone(), price));
            }
            None => {
                debug!(raw_key = %raw_key, "Bet9ja key failed grammar, skipping");
                result.failures.push(MappingFailure {
                    bookmaker: Bookmaker::Bet9ja,
                    raw_key: raw_key.clone(),
                    error: MappingError::UnknownMarket { raw_key: raw_key.clone() },
                    raw_outcomes: Vec::new(),
                });
            }
        }
    }

    for ((market_key, param), mut selections) in groups {
        selections.sort_by(|a, b| a.0.cmp(&b.0));
        match map_group(indexes, &market_key, param.as_deref(), &selections) {
            Ok(market) => result.markets.push(market),
            Err(error) => {
                debug!(market_key = %market_key, code = error.code(), "Bet9ja market skipped");
                result.failures.push(MappingFailure {
                    bookmaker: Bookmaker::Bet9ja,
                    raw_key: group_key(&market_key, param.as_deref()),
                    error,
                    raw_outcomes: selections.iter().map(|(suffix, _, _)| suffix.clone()).collect(),
                });
            }
        }
    }

    result
}

fn group_key(market_key: &str, param: Option<&str>) -> String {
    match param {
        Some(param) => format!("{market_key}@{param}"),
        None => market_key.to_string(),
    }
}

fn map_group(
    indexes: &MappingIndexes,
    market_key: &str,
    param: Option<&str>,
    selections: &[(String, String, Decimal)],
) -> Result<MappedMarket, MappingError> {
    let key = group_key(market_key, param);
    let mapping = indexes
        .find_by_bet9ja(market_key)
        .ok_or_else(|| MappingError::UnknownMarket { raw_key: key.clone() })?;

    if mapping.handler == HandlerKind::Unsupported || mapping.betpawa_id.is_none() {
        return Err(MappingError::UnsupportedPlatform { raw_key: key });
    }

    let (line, handicap) = if is_over_under_key(market_key) {
        let param = param.ok_or_else(|| MappingError::UnknownParamMarket {
            raw_key: key.clone(),
            detail: "over/under key without embedded total".to_string(),
        })?;
        let line = parse_line(param).ok_or_else(|| MappingError::UnknownParamMarket {
            raw_key: key.clone(),
            detail: format!("unparseable total {param:?}"),
        })?;
        (Some(line), None)
    } else if is_handicap_key(market_key) {
        let param = param.ok_or_else(|| MappingError::UnknownParamMarket {
            raw_key: key.clone(),
            detail: "handicap key without embedded line".to_string(),
        })?;
        let handicap = parse_handicap(param).ok_or_else(|| MappingError::UnknownParamMarket {
            raw_key: key.clone(),
            detail: format!("unparseable handicap {param:?}"),
        })?;
        (Some(handicap.home), Some(handicap))
    } else {
        (None, None)
    };

    let outcomes = match_outcomes(&mapping, selections);
    if outcomes.is_empty() {
        return Err(MappingError::NoMatchingOutcomes { raw_key: key });
    }

    Ok(MappedMarket {
        canonical_id: mapping.canonical_id.clone(),
        name: mapping.name.clone(),
        line,
        handicap,
        outcomes,
        groups: Vec::new(),
    })
}

/// Suffix-matched outcomes, case-sensitive, in catalogue position
/// order. A zero price marks a pulled selection.
fn match_outcomes(
    mapping: &MarketMapping,
    selections: &[(String, String, Decimal)],
) -> Vec<MappedOutcome> {
    let mut ordered: Vec<_> = mapping.outcomes.iter().collect();
    ordered.sort_by_key(|o| o.position);

    ordered
        .into_iter()
        .filter_map(|om| {
            let suffix = om.bet9ja_suffix.as_deref()?;
            let (_, _, odds) = selections.iter().find(|(s, _, _)| s == suffix)?;
            Some(MappedOutcome {
                name: om.name.clone(),
                odds: *odds,
                is_active: *odds > Decimal::ZERO,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{MappingSource, OutcomeMapping};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn om(name: &str, suffix: &str, position: u16) -> OutcomeMapping {
        OutcomeMapping {
            name: name.to_string(),
            betpawa_name: Some(name.to_string()),
            sportybet_desc: None,
            bet9ja_suffix: Some(suffix.to_string()),
            position,
        }
    }

    fn entry(
        canonical_id: &str,
        handler: HandlerKind,
        bet9ja_key: &str,
        outcomes: Vec<OutcomeMapping>,
        priority: i32,
    ) -> MarketMapping {
        MarketMapping {
            canonical_id: canonical_id.to_string(),
            name: canonical_id.to_string(),
            handler,
            betpawa_id: Some(format!("bp-{canonical_id}")),
            sportybet_id: None,
            bet9ja_key: Some(bet9ja_key.to_string()),
            outcomes,
            source: MappingSource::Code,
            priority,
        }
    }

    fn indexes() -> MappingIndexes {
        MappingIndexes::build(
            vec![
                entry(
                    "1X2_FT",
                    HandlerKind::Simple,
                    "1X2",
                    vec![om("1", "1", 0), om("X", "X", 1), om("2", "2", 2)],
                    0,
                ),
                entry(
                    "OU_FT",
                    HandlerKind::OverUnder,
                    "OU",
                    vec![om("Over", "O", 0), om("Under", "U", 1)],
                    1,
                ),
                entry(
                    "OU_1H",
                    HandlerKind::OverUnder,
                    "OU1T",
                    vec![om("Over", "O", 0), om("Under", "U", 1)],
                    2,
                ),
                entry(
                    "AH_FT",
                    HandlerKind::Handicap,
                    "HND",
                    vec![om("Home", "1", 0), om("Away", "2", 1)],
                    3,
                ),
            ],
            vec![],
        )
    }

    fn odds(pairs: &[(&str, f64)]) -> Bet9jaOddsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Decimal::try_from(*v).unwrap()))
            .collect()
    }

    // -- Key grammar tests --

    #[test]
    fn test_parse_key_with_param() {
        let parsed = parse_key("S_OU@2.5_O").unwrap();
        assert_eq!(parsed.market_key, "OU");
        assert_eq!(parsed.param.as_deref(), Some("2.5"));
        assert_eq!(parsed.suffix, "O");
    }

    #[test]
    fn test_parse_key_without_param() {
        let parsed = parse_key("S_1X2_1").unwrap();
        assert_eq!(parsed.market_key, "1X2");
        assert!(parsed.param.is_none());
        assert_eq!(parsed.suffix, "1");
    }

    #[test]
    fn test_parse_key_multichar_suffix() {
        let parsed = parse_key("S_DC_1X").unwrap();
        assert_eq!(parsed.market_key, "DC");
        assert_eq!(parsed.suffix, "1X");
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(parse_key("OU@2.5_O").is_none());
        assert!(parse_key("S_lowercase_x").is_none());
        assert!(parse_key("S_OU").is_none());
    }

    // -- Mapping tests --

    #[test]
    fn test_simple_group_maps() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_1X2_1", 2.10), ("S_1X2_X", 3.20), ("S_1X2_2", 3.40)]));
        assert!(result.failures.is_empty());
        assert_eq!(result.markets.len(), 1);

        let market = &result.markets[0];
        assert_eq!(market.canonical_id, "1X2_FT");
        let names: Vec<_> = market.outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["1", "X", "2"]);
        assert_eq!(market.outcomes[0].odds, dec!(2.10));
    }

    #[test]
    fn test_over_under_lines_split_into_markets() {
        let idx = indexes();
        let result = map(
            &idx,
            &odds(&[
                ("S_OU@2.5_O", 1.85),
                ("S_OU@2.5_U", 1.95),
                ("S_OU@3.5_O", 2.90),
                ("S_OU@3.5_U", 1.38),
            ]),
        );
        assert_eq!(result.markets.len(), 2);
        let lines: Vec<_> = result.markets.iter().map(|m| m.line.unwrap()).collect();
        assert!(lines.contains(&dec!(2.5)));
        assert!(lines.contains(&dec!(3.5)));
    }

    #[test]
    fn test_prefix_lookup_prefers_longer_key() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_OU1T@1.5_O", 2.10), ("S_OU1T@1.5_U", 1.65)]));
        assert_eq!(result.markets.len(), 1);
        assert_eq!(result.markets[0].canonical_id, "OU_1H");
    }

    #[test]
    fn test_handicap_group() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_HND@-1_1", 2.60), ("S_HND@-1_2", 1.48)]));
        assert_eq!(result.markets.len(), 1);
        let market = &result.markets[0];
        assert_eq!(market.line, Some(dec!(-1)));
        let handicap = market.handicap.unwrap();
        assert_eq!(handicap.home, dec!(-1));
        assert_eq!(handicap.away, dec!(1));
    }

    #[test]
    fn test_over_under_without_param_is_error() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_OU_O", 1.85)]));
        assert!(result.markets.is_empty());
        assert_eq!(result.failures[0].error.code(), "UNKNOWN_PARAM_MARKET");
    }

    #[test]
    fn test_unknown_market_key() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_ZZTOP_1", 1.5)]));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].error.code(), "UNKNOWN_MARKET");
    }

    #[test]
    fn test_garbage_key_is_failure_not_crash() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("TOTALLY_WRONG", 1.5), ("S_1X2_1", 2.0), ("S_1X2_X", 3.0), ("S_1X2_2", 3.5)]));
        assert_eq!(result.markets.len(), 1);
        assert_eq!(result.failures.len(), 1);
    }

    #[test]
    fn test_suffix_match_case_sensitive() {
        let idx = indexes();
        // "o"/"u" suffixes don't match the stored "O"/"U".
        let result = map(&idx, &odds(&[("S_OU@2.5_o", 1.85), ("S_OU@2.5_u", 1.95)]));
        assert!(result.markets.is_empty());
        assert_eq!(result.failures[0].error.code(), "NO_MATCHING_OUTCOMES");
    }

    #[test]
    fn test_zero_price_marks_inactive() {
        let idx = indexes();
        let result = map(&idx, &odds(&[("S_1X2_1", 0.0), ("S_1X2_X", 3.20), ("S_1X2_2", 3.40)]));
        let market = &result.markets[0];
        assert!(!market.outcomes[0].is_active);
        assert!(market.outcomes[1].is_active);
    }

    #[test]
    fn test_mapping_determinism_over_hashmap_order() {
        let idx = indexes();
        // Build the same logical payload twice with different insertion
        // orders; output must be identical.
        let mut a = HashMap::new();
        for (k, v) in [("S_1X2_1", 2.1), ("S_OU@2.5_O", 1.85), ("S_OU@2.5_U", 1.95), ("S_1X2_X", 3.2), ("S_1X2_2", 3.4)] {
            a.insert(k.to_string(), Decimal::try_from(v).unwrap());
        }
        let mut b = HashMap::new();
        for (k, v) in [("S_OU@2.5_U", 1.95), ("S_1X2_2", 3.4), ("S_1X2_X", 3.2), ("S_OU@2.5_O", 1.85), ("S_1X2_1", 2.1)] {
            b.insert(k.to_string(), Decimal::try_from(v).unwrap());
        }
        let result_a = map(&idx, &a);
        let result_b = map(&idx, &b);
        assert_eq!(result_a.markets, result_b.markets);
    }
}
