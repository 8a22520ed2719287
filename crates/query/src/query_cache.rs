//! Per-process result cache keyed by `(state hash, query, model, mode)`.
//!
//! Capacity 50; a hit returns a clone with `performance.cached = true` so
//! the original entry keeps its first-computation metadata.

use std::num::NonZeroUsize;

use lru::LruCache;
use serde::Serialize;

use crate::modes::QueryMode;
use crate::result::QueryResult;

const CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub state_hash: String,
    pub query: String,
    pub model: String,
    pub mode: QueryMode,
}

/// Hit/miss counters, reported through query metadata diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct QueryCache {
    entries: LruCache<CacheKey, QueryResult>,
    stats: QueryCacheStats,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            entries: LruCache::new(
                NonZeroUsize::new(CAPACITY).expect("capacity is non-zero"),
            ),
            stats: QueryCacheStats::default(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<QueryResult> {
        match self.entries.get(key) {
            Some(result) => {
                self.stats.hits += 1;
                let mut cloned = result.clone();
                cloned.metadata["performance"]["cached"] = serde_json::json!(true);
                Some(cloned)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert after a successful LLM response. Error envelopes are the
    /// caller's responsibility to keep out.
    pub fn insert(&mut self, key: CacheKey, result: QueryResult) {
        self.entries.put(key, result);
    }

    pub fn stats(&self) -> QueryCacheStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key(query: &str) -> CacheKey {
        CacheKey {
            state_hash: "solo:1:1".to_string(),
            query: query.to_string(),
            model: "default-model".to_string(),
            mode: QueryMode::Full,
        }
    }

    fn result(answer: &str) -> QueryResult {
        QueryResult {
            answer: answer.to_string(),
            metadata: serde_json::json!({"performance": {"cached": false}}),
            had_error: false,
        }
    }

    #[test]
    fn hit_returns_clone_marked_cached() {
        let mut cache = QueryCache::new();
        cache.insert(key("q"), result("a"));

        let hit = cache.get(&key("q")).unwrap();
        assert_eq!(hit.metadata["performance"]["cached"], true);
        // The stored entry is untouched.
        let second = cache.get(&key("q")).unwrap();
        assert_eq!(second.answer, "a");
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn distinct_modes_do_not_collide() {
        let mut cache = QueryCache::new();
        cache.insert(key("q"), result("full answer"));
        let mut quick_key = key("q");
        quick_key.mode = QueryMode::Quick;
        assert!(cache.get(&quick_key).is_none());
    }

    #[test]
    fn capacity_is_bounded_at_fifty() {
        let mut cache = QueryCache::new();
        for i in 0..60 {
            cache.insert(key(&format!("q{i}")), result("a"));
        }
        assert_eq!(cache.len(), 50);
        // Oldest entries evicted first.
        assert!(cache.get(&key("q0")).is_none());
        assert!(cache.get(&key("q59")).is_some());
    }
}
