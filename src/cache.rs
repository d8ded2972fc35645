//! In-memory odds cache.
//!
//! Holds the latest [`CachedSnapshot`] per `(event_id, bookmaker)` —
//! never more than one; history lives only in the durable store.
//! Writes serialize through the map lock and fire registered update
//! callbacks synchronously; callbacks are panic-isolated so one bad
//! listener cannot starve the rest. Reads clone an `Arc`, so a reader
//! never observes a torn snapshot.
//!
//! Reference-platform snapshots are keyed by the internal event id;
//! competitor snapshots share that id when a sportradar join exists,
//! otherwise they use [`crate::types::synthetic_event_id`].

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{Bookmaker, CachedMarket, CachedSnapshot};

/// Callback invoked synchronously after every snapshot put.
/// Must not block; delivery to slow consumers belongs to the
/// broadcaster's bounded queues, not here.
pub type UpdateListener = Box<dyn Fn(i64, Bookmaker) + Send + Sync>;

/// Counters exposed by `stats()`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub snapshots: usize,
    pub markets: usize,
    pub per_bookmaker: HashMap<String, usize>,
    pub listeners: usize,
}

/// Process-wide current-odds cache.
pub struct OddsCache {
    snapshots: RwLock<HashMap<(i64, Bookmaker), Arc<CachedSnapshot>>>,
    listeners: Mutex<Vec<UpdateListener>>,
}

impl Default for OddsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OddsCache {
    pub fn new() -> Self {
        OddsCache {
            snapshots: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    // -- Writes ----------------------------------------------------------

    /// Replace the reference-platform snapshot for an event.
    pub fn put_betpawa_snapshot(
        &self,
        event_id: i64,
        kickoff_time: DateTime<Utc>,
        markets: Vec<CachedMarket>,
        now: DateTime<Utc>,
    ) {
        self.put(event_id, Bookmaker::Betpawa, kickoff_time, markets, now);
    }

    /// Replace a competitor snapshot for an event.
    pub fn put_competitor_snapshot(
        &self,
        event_id: i64,
        bookmaker: Bookmaker,
        kickoff_time: DateTime<Utc>,
        markets: Vec<CachedMarket>,
        now: DateTime<Utc>,
    ) {
        self.put(event_id, bookmaker, kickoff_time, markets, now);
    }

    fn put(
        &self,
        event_id: i64,
        bookmaker: Bookmaker,
        kickoff_time: DateTime<Utc>,
        markets: Vec<CachedMarket>,
        now: DateTime<Utc>,
    ) {
        let snapshot = Arc::new(CachedSnapshot {
            event_id,
            bookmaker,
            kickoff_time,
            // Both timestamps move on every put: this is scrape time,
            // not change time.
            captured_at: now,
            last_confirmed_at: now,
            markets,
        });

        self.snapshots.write().insert((event_id, bookmaker), snapshot);
        self.notify(event_id, bookmaker);
    }

    /// Warmup insertion: preserves the stored timestamps and does not
    /// fire update callbacks.
    pub fn load_snapshot(&self, snapshot: CachedSnapshot) {
        let key = (snapshot.event_id, snapshot.bookmaker);
        self.snapshots.write().insert(key, Arc::new(snapshot));
    }

    fn notify(&self, event_id: i64, bookmaker: Bookmaker) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            // One failing callback must not prevent the others.
            if catch_unwind(AssertUnwindSafe(|| listener(event_id, bookmaker))).is_err() {
                warn!(event_id, %bookmaker, "Odds cache update listener panicked");
            }
        }
    }

    // -- Reads -----------------------------------------------------------

    pub fn get_snapshot(&self, event_id: i64, bookmaker: Bookmaker) -> Option<Arc<CachedSnapshot>> {
        self.snapshots.read().get(&(event_id, bookmaker)).cloned()
    }

    /// Bulk read of reference-platform snapshots for the read API.
    pub fn get_betpawa_snapshots(&self, event_ids: &[i64]) -> HashMap<i64, Arc<CachedSnapshot>> {
        let snapshots = self.snapshots.read();
        event_ids
            .iter()
            .filter_map(|&id| {
                snapshots
                    .get(&(id, Bookmaker::Betpawa))
                    .map(|snap| (id, snap.clone()))
            })
            .collect()
    }

    // -- Maintenance -----------------------------------------------------

    /// Register an update callback. Fired synchronously on every put.
    pub fn on_update(&self, listener: impl Fn(i64, Bookmaker) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Out-of-band cleanup: drop snapshots for events that kicked off
    /// before `cutoff`. Returns the number removed.
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut snapshots = self.snapshots.write();
        let before = snapshots.len();
        snapshots.retain(|_, snap| snap.kickoff_time >= cutoff);
        let removed = before - snapshots.len();
        if removed > 0 {
            debug!(removed, "Evicted stale odds cache snapshots");
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let snapshots = self.snapshots.read();
        let mut per_bookmaker: HashMap<String, usize> = HashMap::new();
        let mut markets = 0usize;
        for ((_, bookmaker), snap) in snapshots.iter() {
            *per_bookmaker.entry(bookmaker.slug().to_string()).or_default() += 1;
            markets += snap.markets.len();
        }
        CacheStats {
            snapshots: snapshots.len(),
            markets,
            per_bookmaker,
            listeners: self.listeners.lock().len(),
        }
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn market(canonical_id: &str) -> CachedMarket {
        CachedMarket {
            canonical_id: canonical_id.to_string(),
            name: canonical_id.to_string(),
            line: None,
            handicap: None,
            outcomes: vec![crate::types::MappedOutcome {
                name: "1".to_string(),
                odds: dec!(2.0),
                is_active: true,
            }],
            groups: vec![],
            unavailable_at: None,
        }
    }

    #[test]
    fn test_put_and_get_roundtrip() {
        let cache = OddsCache::new();
        let now = Utc::now();
        cache.put_betpawa_snapshot(42, now + Duration::hours(3), vec![market("1X2_FT")], now);

        let snap = cache.get_snapshot(42, Bookmaker::Betpawa).unwrap();
        assert_eq!(snap.event_id, 42);
        assert_eq!(snap.markets.len(), 1);
        assert_eq!(snap.captured_at, now);
        assert_eq!(snap.last_confirmed_at, now);
        assert!(cache.get_snapshot(42, Bookmaker::Sportybet).is_none());
    }

    #[test]
    fn test_put_replaces_latest_only() {
        let cache = OddsCache::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::minutes(5);
        let kickoff = t0 + Duration::hours(3);

        cache.put_betpawa_snapshot(42, kickoff, vec![market("1X2_FT")], t0);
        cache.put_betpawa_snapshot(42, kickoff, vec![market("1X2_FT"), market("OU_FT")], t1);

        assert_eq!(cache.stats().snapshots, 1);
        let snap = cache.get_snapshot(42, Bookmaker::Betpawa).unwrap();
        assert_eq!(snap.markets.len(), 2);
        assert_eq!(snap.last_confirmed_at, t1);
    }

    #[test]
    fn test_same_event_different_bookmakers_coexist() {
        let cache = OddsCache::new();
        let now = Utc::now();
        let kickoff = now + Duration::hours(1);
        cache.put_betpawa_snapshot(42, kickoff, vec![market("1X2_FT")], now);
        cache.put_competitor_snapshot(42, Bookmaker::Sportybet, kickoff, vec![market("1X2_FT")], now);
        cache.put_competitor_snapshot(42, Bookmaker::Bet9ja, kickoff, vec![market("1X2_FT")], now);

        assert_eq!(cache.stats().snapshots, 3);
        assert_eq!(cache.stats().per_bookmaker.get("sportybet"), Some(&1));
    }

    #[test]
    fn test_callbacks_fire_with_key() {
        let cache = OddsCache::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        cache.on_update(move |event_id, bookmaker| {
            fired_clone.lock().push((event_id, bookmaker));
        });

        let now = Utc::now();
        cache.put_betpawa_snapshot(7, now, vec![], now);
        cache.put_competitor_snapshot(8, Bookmaker::Bet9ja, now, vec![], now);

        let calls = fired.lock();
        assert_eq!(*calls, vec![(7, Bookmaker::Betpawa), (8, Bookmaker::Bet9ja)]);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let cache = OddsCache::new();
        let counter = Arc::new(AtomicUsize::new(0));

        cache.on_update(|_, _| panic!("bad listener"));
        let counter_clone = counter.clone();
        cache.on_update(move |_, _| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        let now = Utc::now();
        cache.put_betpawa_snapshot(1, now, vec![], now);
        // The second listener still ran.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_snapshot_preserves_timestamps_and_is_silent() {
        let cache = OddsCache::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        cache.on_update(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        let confirmed = Utc::now() - Duration::minutes(7);
        cache.load_snapshot(CachedSnapshot {
            event_id: 9,
            bookmaker: Bookmaker::Sportybet,
            kickoff_time: Utc::now() + Duration::hours(2),
            captured_at: confirmed,
            last_confirmed_at: confirmed,
            markets: vec![market("OU_FT")],
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        let snap = cache.get_snapshot(9, Bookmaker::Sportybet).unwrap();
        assert_eq!(snap.last_confirmed_at, confirmed);
    }

    #[test]
    fn test_bulk_betpawa_read() {
        let cache = OddsCache::new();
        let now = Utc::now();
        cache.put_betpawa_snapshot(1, now, vec![], now);
        cache.put_betpawa_snapshot(2, now, vec![], now);
        cache.put_competitor_snapshot(3, Bookmaker::Sportybet, now, vec![], now);

        let snaps = cache.get_betpawa_snapshots(&[1, 2, 3, 4]);
        assert_eq!(snaps.len(), 2);
        assert!(snaps.contains_key(&1));
        assert!(snaps.contains_key(&2));
        // Competitor snapshot under a different bookmaker is not returned.
        assert!(!snaps.contains_key(&3));
    }

    #[test]
    fn test_evict_before_kickoff_cutoff() {
        let cache = OddsCache::new();
        let now = Utc::now();
        cache.put_betpawa_snapshot(1, now - Duration::hours(5), vec![], now);
        cache.put_betpawa_snapshot(2, now + Duration::hours(1), vec![], now);

        let removed = cache.evict_before(now - Duration::hours(2));
        assert_eq!(removed, 1);
        assert!(cache.get_snapshot(1, Bookmaker::Betpawa).is_none());
        assert!(cache.get_snapshot(2, Bookmaker::Betpawa).is_some());
    }

    #[test]
    fn test_stats_counts_markets() {
        let cache = OddsCache::new();
        let now = Utc::now();
        cache.put_betpawa_snapshot(1, now, vec![market("A"), market("B")], now);
        cache.on_update(|_, _| {});

        let stats = cache.stats();
        assert_eq!(stats.snapshots, 1);
        assert_eq!(stats.markets, 2);
        assert_eq!(stats.listeners, 1);
    }
}
