//! Merged mapping catalogue cache.
//!
//! Merges code-shipped and operator-defined mappings (operator wins per
//! canonical id) and indexes the result into per-platform lookup
//! tables. Readers take an `Arc` snapshot of the frozen index set, so
//! a `refresh` never invalidates in-flight reads and never exposes a
//! partially built index.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::catalogue;
use super::{MarketMapping, MappingSource};

// ---------------------------------------------------------------------------
// Frozen index set
// ---------------------------------------------------------------------------

/// Immutable, fully built lookup tables over the merged catalogue.
#[derive(Debug)]
pub struct MappingIndexes {
    /// Merged entries in catalogue order; the position is the ordinal
    /// used for stable mapper output.
    entries: Vec<Arc<MarketMapping>>,
    by_canonical: HashMap<String, usize>,
    by_betpawa: HashMap<String, usize>,
    by_sportybet: HashMap<String, usize>,
    by_bet9ja: HashMap<String, usize>,
    /// Bet9ja keys sorted by length descending for longest-prefix
    /// lookups.
    bet9ja_prefixes: Vec<(String, usize)>,
    code_count: usize,
    db_count: usize,
}

/// Counters exposed by `stats()`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MappingStats {
    pub code_count: usize,
    pub db_count: usize,
    pub total: usize,
    pub betpawa_keys: usize,
    pub sportybet_keys: usize,
    pub bet9ja_keys: usize,
}

impl MappingIndexes {
    /// Build the merged index set. For each canonical id an operator
    /// entry replaces the code entry in place (keeping the code
    /// entry's catalogue position); operator-only entries are appended
    /// in priority order.
    pub fn build(code: Vec<MarketMapping>, db: Vec<MarketMapping>) -> Self {
        let code_count = code.len();

        let mut entries: Vec<MarketMapping> = code;
        let mut position: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, m)| (m.canonical_id.clone(), i))
            .collect();

        let mut db_overrides = 0usize;
        let mut db_new: Vec<MarketMapping> = Vec::new();
        for mapping in db {
            match position.get(&mapping.canonical_id) {
                Some(&idx) => {
                    entries[idx] = mapping;
                    db_overrides += 1;
                }
                None => db_new.push(mapping),
            }
        }
        db_new.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        });
        for mapping in db_new {
            position.insert(mapping.canonical_id.clone(), entries.len());
            entries.push(mapping);
        }

        let entries: Vec<Arc<MarketMapping>> = entries.into_iter().map(Arc::new).collect();
        let db_count = entries
            .iter()
            .filter(|m| m.source == MappingSource::Db)
            .count();
        debug_assert_eq!(db_count, db_overrides + (entries.len() - code_count));

        let mut by_betpawa = HashMap::new();
        let mut by_sportybet = HashMap::new();
        let mut by_bet9ja = HashMap::new();
        for (idx, mapping) in entries.iter().enumerate() {
            if let Some(key) = &mapping.betpawa_id {
                by_betpawa.entry(key.clone()).or_insert(idx);
            }
            if let Some(key) = &mapping.sportybet_id {
                by_sportybet.entry(key.clone()).or_insert(idx);
            }
            if let Some(key) = &mapping.bet9ja_key {
                by_bet9ja.entry(key.clone()).or_insert(idx);
            }
        }

        let mut bet9ja_prefixes: Vec<(String, usize)> = by_bet9ja
            .iter()
            .map(|(k, &v)| (k.clone(), v))
            .collect();
        bet9ja_prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        MappingIndexes {
            by_canonical: position,
            entries,
            by_betpawa,
            by_sportybet,
            by_bet9ja,
            bet9ja_prefixes,
            code_count,
            db_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Catalogue position of a canonical id, used for stable output
    /// ordering.
    pub fn ordinal(&self, canonical_id: &str) -> Option<usize> {
        self.by_canonical.get(canonical_id).copied()
    }

    pub fn get(&self, canonical_id: &str) -> Option<&Arc<MarketMapping>> {
        self.by_canonical
            .get(canonical_id)
            .map(|&idx| &self.entries[idx])
    }

    pub fn find_by_betpawa(&self, key: &str) -> Option<&Arc<MarketMapping>> {
        self.by_betpawa.get(key).map(|&idx| &self.entries[idx])
    }

    pub fn find_by_sportybet(&self, key: &str) -> Option<&Arc<MarketMapping>> {
        self.by_sportybet.get(key).map(|&idx| &self.entries[idx])
    }

    /// Bet9ja lookup is prefix-matched: the raw key embeds outcome and
    /// line, so the longest stored key that the raw key starts with
    /// wins. An exact hit short-circuits.
    pub fn find_by_bet9ja(&self, raw_key: &str) -> Option<&Arc<MarketMapping>> {
        if let Some(&idx) = self.by_bet9ja.get(raw_key) {
            return Some(&self.entries[idx]);
        }
        self.bet9ja_prefixes
            .iter()
            .find(|(prefix, _)| raw_key.starts_with(prefix.as_str()))
            .map(|&(_, idx)| &self.entries[idx])
    }

    pub fn stats(&self) -> MappingStats {
        MappingStats {
            code_count: self.code_count,
            db_count: self.db_count,
            total: self.entries.len(),
            betpawa_keys: self.by_betpawa.len(),
            sportybet_keys: self.by_sportybet.len(),
            bet9ja_keys: self.by_bet9ja.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Process-wide mapping cache. Multi-reader, single-writer on
/// `refresh`: readers clone the `Arc` to the current index set and
/// keep using it for the remainder of their cycle.
pub struct MappingCache {
    current: RwLock<Arc<MappingIndexes>>,
}

impl Default for MappingCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingCache {
    /// An empty cache. `initialize` must run before the coordinator
    /// starts.
    pub fn new() -> Self {
        MappingCache {
            current: RwLock::new(Arc::new(MappingIndexes::build(Vec::new(), Vec::new()))),
        }
    }

    /// Build all indexes from the code catalogue plus operator rows.
    pub fn initialize(&self, db_mappings: Vec<MarketMapping>) {
        let indexes = MappingIndexes::build(catalogue::code_mappings(), db_mappings);
        let stats = indexes.stats();
        info!(
            code = stats.code_count,
            db = stats.db_count,
            total = stats.total,
            "Mapping cache initialized"
        );
        *self.current.write() = Arc::new(indexes);
    }

    /// Atomic replace with a freshly merged catalogue. Readers holding
    /// the previous snapshot never observe a partial index.
    pub fn refresh(&self, db_mappings: Vec<MarketMapping>) {
        self.initialize(db_mappings);
    }

    /// Take a frozen snapshot for the duration of a mapping pass.
    pub fn snapshot(&self) -> Arc<MappingIndexes> {
        self.current.read().clone()
    }

    pub fn find_by_betpawa(&self, key: &str) -> Option<Arc<MarketMapping>> {
        self.snapshot().find_by_betpawa(key).cloned()
    }

    pub fn find_by_sportybet(&self, key: &str) -> Option<Arc<MarketMapping>> {
        self.snapshot().find_by_sportybet(key).cloned()
    }

    pub fn find_by_bet9ja(&self, key: &str) -> Option<Arc<MarketMapping>> {
        self.snapshot().find_by_bet9ja(key).cloned()
    }

    pub fn stats(&self) -> MappingStats {
        self.snapshot().stats()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
