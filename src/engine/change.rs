//! Per-market change detection.
//!
//! Compares one cycle's mapped markets for an `(event, bookmaker)`
//! against the cached snapshot and classifies each market: new,
//! returned, changed, unchanged, or disappeared. Disappearances are
//! emitted once as a phantom write carrying the cached content with
//! `unavailable_at` set; after that the market stays quiet until it
//! returns. A market whose every outcome is suspended counts as
//! unavailable too.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::types::{
    Bookmaker, CachedMarket, CachedSnapshot, MappedMarket, MappedOutcome, MarketCurrentWrite,
};

// ---------------------------------------------------------------------------
// Classification output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// No cache entry for this key.
    New,
    /// Cache entry existed but was marked unavailable.
    Returned,
    /// Canonicalised outcomes differ from the cache.
    Changed,
    /// Byte-equal to the cache; confirm only.
    Unchanged,
    /// Present in the cache, absent (or fully suspended) this cycle.
    Disappeared,
}

/// One market's classification, with the previous cached content kept
/// for the risk detector.
#[derive(Debug, Clone)]
pub struct MarketDelta {
    pub kind: DeltaKind,
    pub write: MarketCurrentWrite,
    pub previous: Option<CachedMarket>,
}

/// Result of classifying one `(event, bookmaker)` pair for one cycle.
#[derive(Debug, Default)]
pub struct Classification {
    pub deltas: Vec<MarketDelta>,
    /// The full market set the cache should hold after this cycle,
    /// including retained phantoms.
    pub cache_markets: Vec<CachedMarket>,
}

impl Classification {
    pub fn changed_count(&self) -> usize {
        self.deltas.iter().filter(|d| d.write.changed).count()
    }

    pub fn unchanged_count(&self) -> usize {
        self.deltas.iter().filter(|d| !d.write.changed).count()
    }

    /// Markets that just became unavailable this cycle.
    pub fn disappeared(&self) -> impl Iterator<Item = &MarketDelta> {
        self.deltas.iter().filter(|d| d.kind == DeltaKind::Disappeared)
    }

    pub fn writes(&self) -> Vec<MarketCurrentWrite> {
        self.deltas.iter().map(|d| d.write.clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Canonicalisation
// ---------------------------------------------------------------------------

/// Canonical outcome ordering for comparison: sorted `(name, odds,
/// is_active)` tuples. Two outcome lists are "the same" iff their
/// canonical forms are equal.
pub fn canonical_outcomes(outcomes: &[MappedOutcome]) -> Vec<(String, Decimal, bool)> {
    let mut canonical: Vec<(String, Decimal, bool)> = outcomes
        .iter()
        .map(|o| (o.name.clone(), o.odds, o.is_active))
        .collect();
    canonical.sort();
    canonical
}

fn outcomes_equal(a: &[MappedOutcome], b: &[MappedOutcome]) -> bool {
    canonical_outcomes(a) == canonical_outcomes(b)
}

fn all_suspended(market: &MappedMarket) -> bool {
    !market.outcomes.is_empty() && market.outcomes.iter().all(|o| !o.is_active)
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classify one cycle's mapped markets against the cached snapshot.
pub fn classify(
    event_id: i64,
    bookmaker: Bookmaker,
    new_markets: &[MappedMarket],
    cached: Option<&CachedSnapshot>,
    now: DateTime<Utc>,
) -> Classification {
    let mut result = Classification::default();
    let mut seen: HashSet<(String, Decimal)> = HashSet::new();

    for market in new_markets {
        // First occurrence wins on duplicate join keys in one payload.
        if !seen.insert(market.join_key()) {
            continue;
        }
        let previous = cached.and_then(|c| c.market(&market.canonical_id, market.line));
        classify_present(event_id, bookmaker, market, previous, now, &mut result);
    }

    // Disappearance pass: cached keys the payload omitted.
    if let Some(cached) = cached {
        for previous in &cached.markets {
            if seen.contains(&previous.join_key()) {
                continue;
            }
            if previous.unavailable_at.is_none() {
                let mut phantom = previous.clone();
                phantom.unavailable_at = Some(now);
                result.deltas.push(MarketDelta {
                    kind: DeltaKind::Disappeared,
                    write: write_from(event_id, bookmaker, &phantom, true),
                    previous: Some(previous.clone()),
                });
                result.cache_markets.push(phantom);
            } else {
                // Already marked; stays quiet until it returns.
                result.cache_markets.push(previous.clone());
            }
        }
    }

    result
}

fn classify_present(
    event_id: i64,
    bookmaker: Bookmaker,
    market: &MappedMarket,
    previous: Option<&CachedMarket>,
    now: DateTime<Utc>,
    result: &mut Classification,
) {
    let suspended = all_suspended(market);

    match previous {
        None => {
            let mut entry = CachedMarket::from_mapped(market);
            entry.unavailable_at = suspended.then_some(now);
            let kind = if suspended { DeltaKind::Disappeared } else { DeltaKind::New };
            result.deltas.push(MarketDelta {
                kind,
                write: write_from(event_id, bookmaker, &entry, true),
                previous: None,
            });
            result.cache_markets.push(entry);
        }
        Some(prev) if prev.unavailable_at.is_some() => {
            if suspended {
                // Still unavailable: no write, original timestamp kept.
                result.cache_markets.push(prev.clone());
            } else {
                let entry = CachedMarket::from_mapped(market);
                result.deltas.push(MarketDelta {
                    kind: DeltaKind::Returned,
                    write: write_from(event_id, bookmaker, &entry, true),
                    previous: Some(prev.clone()),
                });
                result.cache_markets.push(entry);
            }
        }
        Some(prev) => {
            if suspended {
                let mut entry = CachedMarket::from_mapped(market);
                entry.unavailable_at = Some(now);
                result.deltas.push(MarketDelta {
                    kind: DeltaKind::Disappeared,
                    write: write_from(event_id, bookmaker, &entry, true),
                    previous: Some(prev.clone()),
                });
                result.cache_markets.push(entry);
            } else if outcomes_equal(&market.outcomes, &prev.outcomes) {
                let entry = CachedMarket::from_mapped(market);
                result.deltas.push(MarketDelta {
                    kind: DeltaKind::Unchanged,
                    write: write_from(event_id, bookmaker, &entry, false),
                    previous: Some(prev.clone()),
                });
                result.cache_markets.push(entry);
            } else {
                let entry = CachedMarket::from_mapped(market);
                result.deltas.push(MarketDelta {
                    kind: DeltaKind::Changed,
                    write: write_from(event_id, bookmaker, &entry, true),
                    previous: Some(prev.clone()),
                });
                result.cache_markets.push(entry);
            }
        }
    }
}

fn write_from(
    event_id: i64,
    bookmaker: Bookmaker,
    market: &CachedMarket,
    changed: bool,
) -> MarketCurrentWrite {
    MarketCurrentWrite {
        event_id,
        bookmaker,
        canonical_market_id: market.canonical_id.clone(),
        market_name: market.name.clone(),
        line: market.line,
        handicap: market.handicap,
        outcomes: market.outcomes.clone(),
        groups: market.groups.clone(),
        changed,
        unavailable_at: market.unavailable_at,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn outcome(name: &str, odds: Decimal) -> MappedOutcome {
        MappedOutcome { name: name.to_string(), odds, is_active: true }
    }

    fn market(canonical_id: &str, line: Option<Decimal>, outcomes: Vec<MappedOutcome>) -> MappedMarket {
        MappedMarket {
            canonical_id: canonical_id.to_string(),
            name: canonical_id.to_string(),
            line,
            handicap: None,
            outcomes,
            groups: vec![],
        }
    }

    fn snapshot(markets: Vec<CachedMarket>) -> CachedSnapshot {
        CachedSnapshot {
            event_id: 42,
            bookmaker: Bookmaker::Betpawa,
            kickoff_time: Utc::now() + Duration::hours(2),
            captured_at: Utc::now() - Duration::minutes(10),
            last_confirmed_at: Utc::now() - Duration::minutes(10),
            markets,
        }
    }

    fn cached(m: &MappedMarket) -> CachedMarket {
        CachedMarket::from_mapped(m)
    }

    #[test]
    fn test_identical_payload_all_unchanged() {
        let markets = vec![
            market("1X2_FT", None, vec![outcome("1", dec!(2.10)), outcome("X", dec!(3.20))]),
            market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85))]),
        ];
        let snap = snapshot(markets.iter().map(cached).collect());

        let result = classify(42, Bookmaker::Betpawa, &markets, Some(&snap), Utc::now());
        assert_eq!(result.changed_count(), 0);
        assert_eq!(result.unchanged_count(), 2);
        assert!(result.deltas.iter().all(|d| d.kind == DeltaKind::Unchanged));
    }

    #[test]
    fn test_changed_only_for_differing_keys() {
        let cached_markets = vec![
            market("1X2_FT", None, vec![outcome("1", dec!(2.05)), outcome("X", dec!(3.20))]),
            market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85))]),
        ];
        let new_markets = vec![
            market("1X2_FT", None, vec![outcome("1", dec!(2.10)), outcome("X", dec!(3.20))]),
            market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85))]),
        ];
        let snap = snapshot(cached_markets.iter().map(cached).collect());

        let result = classify(42, Bookmaker::Betpawa, &new_markets, Some(&snap), Utc::now());
        assert_eq!(result.changed_count(), 1);
        let changed: Vec<_> = result
            .deltas
            .iter()
            .filter(|d| d.write.changed)
            .map(|d| d.write.canonical_market_id.as_str())
            .collect();
        assert_eq!(changed, vec!["1X2_FT"]);
    }

    #[test]
    fn test_outcome_order_does_not_matter() {
        let cached_market = market(
            "1X2_FT",
            None,
            vec![outcome("1", dec!(2.10)), outcome("X", dec!(3.20)), outcome("2", dec!(3.40))],
        );
        let reordered = market(
            "1X2_FT",
            None,
            vec![outcome("2", dec!(3.40)), outcome("1", dec!(2.10)), outcome("X", dec!(3.20))],
        );
        let snap = snapshot(vec![cached(&cached_market)]);

        let result = classify(42, Bookmaker::Betpawa, &[reordered], Some(&snap), Utc::now());
        assert_eq!(result.changed_count(), 0);
    }

    #[test]
    fn test_new_market_without_cache() {
        let markets = vec![market("1X2_FT", None, vec![outcome("1", dec!(2.10))])];
        let result = classify(42, Bookmaker::Betpawa, &markets, None, Utc::now());

        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].kind, DeltaKind::New);
        assert!(result.deltas[0].write.changed);
        assert!(result.deltas[0].write.unavailable_at.is_none());
    }

    #[test]
    fn test_disappearance_emits_phantom_once() {
        let now = Utc::now();
        let ou = market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85)), outcome("Under", dec!(1.95))]);
        let snap = snapshot(vec![cached(&ou)]);

        // Cycle 1: payload omits the market entirely.
        let result = classify(42, Bookmaker::Sportybet, &[], Some(&snap), now);
        assert_eq!(result.deltas.len(), 1);
        let delta = &result.deltas[0];
        assert_eq!(delta.kind, DeltaKind::Disappeared);
        assert!(delta.write.changed);
        assert_eq!(delta.write.unavailable_at, Some(now));
        // The phantom carries the cached content.
        assert_eq!(delta.write.outcomes.len(), 2);
        // The cache retains the entry, marked unavailable.
        assert_eq!(result.cache_markets.len(), 1);
        assert_eq!(result.cache_markets[0].unavailable_at, Some(now));

        // Cycle 2: still absent — no further writes.
        let snap2 = snapshot(result.cache_markets);
        let later = now + Duration::minutes(10);
        let result2 = classify(42, Bookmaker::Sportybet, &[], Some(&snap2), later);
        assert!(result2.deltas.is_empty());
        // Original unavailable_at timestamp retained.
        assert_eq!(result2.cache_markets[0].unavailable_at, Some(now));
    }

    #[test]
    fn test_returned_market_is_changed() {
        let now = Utc::now();
        let ou = market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85))]);
        let mut gone = cached(&ou);
        gone.unavailable_at = Some(now - Duration::minutes(10));
        let snap = snapshot(vec![gone]);

        let result = classify(42, Bookmaker::Sportybet, &[ou], Some(&snap), now);
        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].kind, DeltaKind::Returned);
        assert!(result.deltas[0].write.changed);
        assert!(result.deltas[0].write.unavailable_at.is_none());
    }

    #[test]
    fn test_all_suspended_counts_as_unavailable_once() {
        let now = Utc::now();
        let live = market("1X2_FT", None, vec![outcome("1", dec!(2.10))]);
        let snap = snapshot(vec![cached(&live)]);

        let mut suspended = live.clone();
        suspended.outcomes[0].is_active = false;

        // First suspension: one unavailability write.
        let result = classify(42, Bookmaker::Betpawa, &[suspended.clone()], Some(&snap), now);
        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].kind, DeltaKind::Disappeared);
        assert_eq!(result.deltas[0].write.unavailable_at, Some(now));

        // Second cycle, still suspended: silent.
        let snap2 = snapshot(result.cache_markets);
        let result2 = classify(42, Bookmaker::Betpawa, &[suspended], Some(&snap2), now + Duration::minutes(5));
        assert!(result2.deltas.is_empty());

        // Reactivation: returns as changed.
        let snap3 = snapshot(result2.cache_markets);
        let result3 = classify(42, Bookmaker::Betpawa, &[live], Some(&snap3), now + Duration::minutes(10));
        assert_eq!(result3.deltas.len(), 1);
        assert_eq!(result3.deltas[0].kind, DeltaKind::Returned);
    }

    #[test]
    fn test_lines_are_distinct_keys() {
        let ou25 = market("OU_FT", Some(dec!(2.5)), vec![outcome("Over", dec!(1.85))]);
        let ou35 = market("OU_FT", Some(dec!(3.5)), vec![outcome("Over", dec!(2.90))]);
        let snap = snapshot(vec![cached(&ou25)]);

        let result = classify(42, Bookmaker::Betpawa, &[ou25, ou35], Some(&snap), Utc::now());
        let kinds: Vec<_> = result.deltas.iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DeltaKind::Unchanged));
        assert!(kinds.contains(&DeltaKind::New));
    }

    #[test]
    fn test_canonical_outcomes_sorted() {
        let outcomes = vec![
            MappedOutcome { name: "X".into(), odds: dec!(3.2), is_active: true },
            MappedOutcome { name: "1".into(), odds: dec!(2.1), is_active: true },
        ];
        let canonical = canonical_outcomes(&outcomes);
        assert_eq!(canonical[0].0, "1");
        assert_eq!(canonical[1].0, "X");
    }

    #[test]
    fn test_duplicate_keys_first_wins() {
        let a = market("1X2_FT", None, vec![outcome("1", dec!(2.10))]);
        let b = market("1X2_FT", None, vec![outcome("1", dec!(9.99))]);
        let result = classify(42, Bookmaker::Betpawa, &[a, b], None, Utc::now());
        assert_eq!(result.deltas.len(), 1);
        assert_eq!(result.deltas[0].write.outcomes[0].odds, dec!(2.10));
    }
}
