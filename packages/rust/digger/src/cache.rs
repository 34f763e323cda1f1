//! Investigation cache: prior enrichment results keyed by
//! `(origin, enrichment_id, cache_key)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cached result, in the shape it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedInvestigation {
    pub origin: String,
    pub enrichment_id: String,
    pub cache_key: String,
    pub value: Value,
}

/// Best-effort store of enrichment results. Lookups are synchronous so a hit
/// can be applied within the same dig pass.
pub trait InvestigationCache: Send {
    fn sync_lookup(&self, origin: &str, enrichment_id: &str, cache_key: &str) -> Option<Value>;

    fn store_result(&mut self, origin: &str, enrichment_id: &str, cache_key: &str, value: Value);

    /// Entries stored since the last drain, for write-behind persistence.
    fn drain_dirty(&mut self) -> Vec<CachedInvestigation> {
        Vec::new()
    }
}

type DirtyKey = (String, String, String);

/// In-memory cache with dirty tracking.
#[derive(Debug, Default)]
pub struct MemoryInvestigationCache {
    /// origin → enrichment id → cache key → value
    entries: BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>,
    dirty: BTreeSet<DirtyKey>,
}

impl MemoryInvestigationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted entries. Loaded entries are not dirty.
    pub fn load(entries: impl IntoIterator<Item = CachedInvestigation>) -> Self {
        let mut cache = Self::new();
        for e in entries {
            cache.insert(e.origin, e.enrichment_id, e.cache_key, e.value);
        }
        cache
    }

    fn insert(&mut self, origin: String, enrichment_id: String, cache_key: String, value: Value) {
        self.entries
            .entry(origin)
            .or_default()
            .entry(enrichment_id)
            .or_default()
            .insert(cache_key, value);
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

impl InvestigationCache for MemoryInvestigationCache {
    fn sync_lookup(&self, origin: &str, enrichment_id: &str, cache_key: &str) -> Option<Value> {
        self.entries
            .get(origin)?
            .get(enrichment_id)?
            .get(cache_key)
            .cloned()
    }

    fn store_result(&mut self, origin: &str, enrichment_id: &str, cache_key: &str, value: Value) {
        self.insert(
            origin.to_string(),
            enrichment_id.to_string(),
            cache_key.to_string(),
            value,
        );
        self.dirty.insert((
            origin.to_string(),
            enrichment_id.to_string(),
            cache_key.to_string(),
        ));
    }

    fn drain_dirty(&mut self) -> Vec<CachedInvestigation> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|(origin, enrichment_id, cache_key)| {
                let value = self.sync_lookup(&origin, &enrichment_id, &cache_key)?;
                Some(CachedInvestigation {
                    origin,
                    enrichment_id,
                    cache_key,
                    value,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_after_store() {
        let mut cache = MemoryInvestigationCache::new();
        assert!(cache.sync_lookup("https://a.example", "crumbs", "k").is_none());

        cache.store_result("https://a.example", "crumbs", "k", json!([1]));
        assert_eq!(cache.sync_lookup("https://a.example", "crumbs", "k"), Some(json!([1])));
        assert!(cache.sync_lookup("https://a.example", "other", "k").is_none());
        assert!(cache.sync_lookup("https://b.example", "crumbs", "k").is_none());
    }

    #[test]
    fn drain_reports_each_entry_once() {
        let mut cache = MemoryInvestigationCache::new();
        cache.store_result("o", "e", "k1", json!(1));
        cache.store_result("o", "e", "k1", json!(2));
        cache.store_result("o", "e", "k2", json!(3));

        let drained = cache.drain_dirty();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].value, json!(2));
        assert!(!cache.has_dirty());
        assert!(cache.drain_dirty().is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn loaded_entries_are_clean() {
        let cache = MemoryInvestigationCache::load([CachedInvestigation {
            origin: "o".into(),
            enrichment_id: "e".into(),
            cache_key: "k".into(),
            value: json!("v"),
        }]);
        assert_eq!(cache.sync_lookup("o", "e", "k"), Some(json!("v")));
        assert!(!cache.has_dirty());
    }
}
