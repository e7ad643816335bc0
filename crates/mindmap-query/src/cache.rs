//! Adaptive query cache.
//!
//! Entries are keyed by the exact query key and matched on context by
//! token Jaccard similarity, so a follow-up query from a slightly
//! different task context can still hit. An entry is only served while
//! it is younger than the TTL and was computed against the current
//! graph version. Size is bounded both by entry count and by the
//! serialized size of the cached results.

use chrono::Duration;
use mindmap_core::text::jaccard;
use mindmap_core::types::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached queries (default: 1000).
    pub max_entries: usize,
    /// Upper bound on the summed result size in bytes (default: 50 MiB).
    pub max_memory_bytes: usize,
    /// Entry lifetime in seconds (default: 300).
    pub ttl_secs: i64,
    /// Minimum context-token Jaccard for a hit (default: 0.8).
    pub similarity_threshold: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: 50 * 1024 * 1024,
            ttl_secs: 300,
            similarity_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub query: String,
    pub context_tokens: BTreeSet<String>,
    pub context_hash: String,
    pub value: V,
    /// Nodes the cached result depends on.
    pub dependencies: BTreeSet<NodeId>,
    pub timestamp: Timestamp,
    pub hit_count: u64,
    pub last_accessed: Timestamp,
    pub result_size: usize,
    pub graph_version: u64,
}

/// Counters reported by `get_cache_stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub entries: usize,
    pub bytes: usize,
    pub evictions: u64,
    pub invalidations: u64,
}

/// What to store alongside a cached value.
#[derive(Debug, Clone)]
pub struct CacheKey<'a> {
    pub query: &'a str,
    pub context_tokens: &'a BTreeSet<String>,
    pub context_hash: &'a str,
}

#[derive(Debug, Clone)]
pub struct QueryCache<V> {
    config: CacheConfig,
    entries: BTreeMap<u64, CacheEntry<V>>,
    next_id: u64,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl<V: Clone + Serialize> Default for QueryCache<V> {
    fn default() -> Self {
        Self::with_config(CacheConfig::default())
    }
}

impl<V: Clone + Serialize> QueryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            next_id: 0,
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            invalidations: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drop_entry(&mut self, id: u64) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(&id)?;
        self.bytes = self.bytes.saturating_sub(entry.result_size);
        Some(entry)
    }

    /// Look up a cached value. Expired or stale entries for the same query
    /// are dropped on the way.
    pub fn get(&mut self, key: &CacheKey<'_>, version: u64, now: Timestamp) -> Option<V> {
        let ttl = Duration::seconds(self.config.ttl_secs);
        let mut stale = Vec::new();
        let mut best: Option<(u64, f64, Timestamp)> = None;

        for (id, entry) in &self.entries {
            if entry.query != key.query {
                continue;
            }
            if now - entry.timestamp > ttl || entry.graph_version != version {
                stale.push(*id);
                continue;
            }
            let similarity = jaccard(&entry.context_tokens, key.context_tokens);
            if similarity < self.config.similarity_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, s, t)) => similarity > s || (similarity == s && entry.timestamp > t),
            };
            if better {
                best = Some((*id, similarity, entry.timestamp));
            }
        }

        for id in stale {
            self.drop_entry(id);
            self.invalidations += 1;
        }

        match best.and_then(|(id, _, _)| self.entries.get_mut(&id)) {
            Some(entry) => {
                entry.hit_count += 1;
                entry.last_accessed = now;
                self.hits += 1;
                debug!(query = %key.query, hits = entry.hit_count, "cache hit");
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a value, replacing an entry with the same query and context.
    /// Returns false when the value alone exceeds the memory bound.
    pub fn insert(
        &mut self,
        key: &CacheKey<'_>,
        value: V,
        dependencies: BTreeSet<NodeId>,
        version: u64,
        now: Timestamp,
    ) -> bool {
        let size = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        if size > self.config.max_memory_bytes {
            return false;
        }

        let same: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.query == key.query && e.context_hash == key.context_hash)
            .map(|(id, _)| *id)
            .collect();
        for id in same {
            self.drop_entry(id);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.bytes += size;
        self.entries.insert(
            id,
            CacheEntry {
                query: key.query.to_string(),
                context_tokens: key.context_tokens.clone(),
                context_hash: key.context_hash.to_string(),
                value,
                dependencies,
                timestamp: now,
                hit_count: 0,
                last_accessed: now,
                result_size: size,
                graph_version: version,
            },
        );
        self.evict(id, key.context_tokens);
        true
    }

    /// Evict until both bounds hold. The entry just inserted is kept.
    fn evict(&mut self, keep: u64, inserting: &BTreeSet<String>) {
        while self.entries.len() > self.config.max_entries || self.bytes > self.config.max_memory_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(id, _)| **id != keep)
                .min_by(|(ia, a), (ib, b)| {
                    a.last_accessed
                        .cmp(&b.last_accessed)
                        .then_with(|| {
                            jaccard(&a.context_tokens, inserting).total_cmp(&jaccard(&b.context_tokens, inserting))
                        })
                        .then_with(|| a.hit_count.cmp(&b.hit_count))
                        .then_with(|| ia.cmp(ib))
                })
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    self.drop_entry(id);
                    self.evictions += 1;
                }
                None => break,
            }
        }
    }

    /// Drop entries whose results depend on any of `changed`.
    pub fn invalidate(&mut self, changed: &BTreeSet<NodeId>) -> usize {
        if changed.is_empty() {
            return 0;
        }
        let hit: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.dependencies.is_disjoint(changed))
            .map(|(id, _)| *id)
            .collect();
        for id in &hit {
            self.drop_entry(*id);
        }
        self.invalidations += hit.len() as u64;
        hit.len()
    }

    pub fn invalidate_all(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.bytes = 0;
        self.invalidations += n as u64;
        n
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 { 0.0 } else { self.hits as f64 / lookups as f64 },
            entries: self.entries.len(),
            bytes: self.bytes,
            evictions: self.evictions,
            invalidations: self.invalidations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mindmap_core::text::token_set;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
    }

    fn deps(ids: &[&str]) -> BTreeSet<NodeId> {
        ids.iter().map(|s| NodeId::from(*s)).collect()
    }

    #[test]
    fn similar_context_hits() {
        let mut cache: QueryCache<Vec<String>> = QueryCache::new();
        let tokens = token_set("fix login handler session token refresh");
        let key = CacheKey { query: "login", context_tokens: &tokens, context_hash: "h1" };
        cache.insert(&key, vec!["auth.rs".into()], deps(&["auth.rs"]), 1, t0());

        let close = token_set("fix login handler session token refresh expiry");
        let close_key = CacheKey { query: "login", context_tokens: &close, context_hash: "h2" };
        assert_eq!(cache.get(&close_key, 1, t0()), Some(vec!["auth.rs".to_string()]));

        let far = token_set("render chart");
        let far_key = CacheKey { query: "login", context_tokens: &far, context_hash: "h3" };
        assert_eq!(cache.get(&far_key, 1, t0()), None);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn version_and_ttl_make_misses() {
        let mut cache: QueryCache<u32> = QueryCache::new();
        let tokens = token_set("parser");
        let key = CacheKey { query: "q", context_tokens: &tokens, context_hash: "h" };
        cache.insert(&key, 1, deps(&["a"]), 5, t0());

        assert_eq!(cache.get(&key, 6, t0()), None);
        assert!(cache.is_empty(), "stale entry dropped on lookup");

        cache.insert(&key, 1, deps(&["a"]), 5, t0());
        assert_eq!(cache.get(&key, 5, t0() + Duration::seconds(301)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_eviction_with_entry_bound() {
        let mut cache: QueryCache<u32> = QueryCache::with_config(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        let tokens = BTreeSet::new();
        for (i, q) in ["a", "b"].iter().enumerate() {
            let key = CacheKey { query: *q, context_tokens: &tokens, context_hash: "" };
            cache.insert(&key, i as u32, BTreeSet::new(), 1, t0() + Duration::seconds(i as i64));
        }
        // touch "a" so "b" becomes least recently used
        let a = CacheKey { query: "a", context_tokens: &tokens, context_hash: "" };
        assert!(cache.get(&a, 1, t0() + Duration::seconds(5)).is_some());

        let c = CacheKey { query: "c", context_tokens: &tokens, context_hash: "" };
        cache.insert(&c, 9, BTreeSet::new(), 1, t0() + Duration::seconds(6));
        let b = CacheKey { query: "b", context_tokens: &tokens, context_hash: "" };
        assert!(cache.get(&b, 1, t0() + Duration::seconds(7)).is_none());
        assert!(cache.get(&a, 1, t0() + Duration::seconds(7)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn memory_bound_holds() {
        let mut cache: QueryCache<String> = QueryCache::with_config(CacheConfig {
            max_memory_bytes: 64,
            ..CacheConfig::default()
        });
        let tokens = BTreeSet::new();
        for i in 0..10 {
            let q = format!("query{}", i);
            let key = CacheKey { query: &q, context_tokens: &tokens, context_hash: "" };
            cache.insert(&key, "x".repeat(20), BTreeSet::new(), 1, t0() + Duration::seconds(i));
            assert!(cache.stats().bytes <= 64);
        }
        let key = CacheKey { query: "huge", context_tokens: &tokens, context_hash: "" };
        assert!(!cache.insert(&key, "x".repeat(100), BTreeSet::new(), 1, t0()));
    }

    #[test]
    fn invalidation_by_dependency() {
        let mut cache: QueryCache<u32> = QueryCache::new();
        let tokens = BTreeSet::new();
        let k1 = CacheKey { query: "one", context_tokens: &tokens, context_hash: "" };
        let k2 = CacheKey { query: "two", context_tokens: &tokens, context_hash: "" };
        cache.insert(&k1, 1, deps(&["a.rs", "b.rs"]), 1, t0());
        cache.insert(&k2, 2, deps(&["c.rs"]), 1, t0());

        assert_eq!(cache.invalidate(&deps(&["b.rs"])), 1);
        assert!(cache.get(&k1, 1, t0()).is_none());
        assert!(cache.get(&k2, 1, t0()).is_some());
        assert_eq!(cache.invalidate_all(), 1);
        assert_eq!(cache.stats().bytes, 0);
    }
}
