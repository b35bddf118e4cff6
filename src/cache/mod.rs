//! Short-TTL recommendation response cache.
//!
//! Keyed by (session, canonical filters, count, current history length); the
//! history length inside the key means any action that grows the history
//! implicitly invalidates every relevant entry. The explicit per-session
//! invalidation on feedback is a second line of defense. The cache may be
//! disabled globally; correctness never depends on it.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

static CACHE_HITS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_cache_hits_total",
        "Recommendation cache hits"
    )
    .expect("register recommendation_cache_hits_total")
});

static CACHE_MISSES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_cache_misses_total",
        "Recommendation cache misses"
    )
    .expect("register recommendation_cache_misses_total")
});

static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "recommendation_cache_evictions_total",
        "Recommendation cache evictions (TTL or capacity)"
    )
    .expect("register recommendation_cache_evictions_total")
});

#[derive(Debug, Clone)]
struct CacheEntry {
    response: serde_json::Value,
    history_length: i64,
    size_bytes: usize,
    stored_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub max_entries: usize,
    pub estimated_size_bytes: usize,
    pub ttl_ms: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct RecommendationCache {
    store: DashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
    enabled: bool,
}

impl RecommendationCache {
    pub fn new(enabled: bool, max_entries: usize, ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            max_entries,
            ttl,
            enabled,
        }
    }

    /// Cache key: the session id prefixes a SHA-256 digest of the canonical
    /// request shape, so per-session invalidation is a prefix scan.
    pub fn key<F: Serialize>(
        session_id: Uuid,
        filters: &F,
        count: usize,
        history_length: i64,
    ) -> String {
        let filters_json =
            serde_json::to_string(filters).unwrap_or_else(|_| "unserializable".to_string());
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(filters_json.as_bytes());
        hasher.update(count.to_le_bytes());
        hasher.update(history_length.to_le_bytes());
        format!("{}:{:x}", session_id, hasher.finalize())
    }

    /// Look up a cached response. A hit is only served when the stored entry
    /// was built against the same history length.
    pub fn get(&self, key: &str, current_history_length: i64) -> Option<serde_json::Value> {
        if !self.enabled {
            return None;
        }
        if let Some(entry) = self.store.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.store.remove(key);
                CACHE_EVICTIONS.inc();
            } else if entry.history_length != current_history_length {
                // Stale against the session's history; treat as a miss.
                warn!(key = %key, "cache entry history length out of date");
            } else {
                CACHE_HITS.inc();
                debug!(key = %key, "recommendation cache hit");
                return Some(entry.response.clone());
            }
        }
        CACHE_MISSES.inc();
        None
    }

    pub fn insert(&self, key: String, response: serde_json::Value, history_length: i64) {
        if !self.enabled {
            return;
        }
        self.enforce_capacity();
        let now = Instant::now();
        // Rough footprint estimate; reported, not enforced.
        let size_bytes = response.to_string().len();
        self.store.insert(
            key,
            CacheEntry {
                response,
                history_length,
                size_bytes,
                stored_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Evict oldest entries when at capacity. Approximate LRU: eviction is by
    /// insertion age, one tenth of the table at a time.
    fn enforce_capacity(&self) {
        if self.store.len() < self.max_entries {
            return;
        }
        let evict_count = (self.max_entries / 10).max(1);
        let mut entries: Vec<(String, Instant)> = self
            .store
            .iter()
            .map(|e| (e.key().clone(), e.value().stored_at))
            .collect();
        entries.sort_by_key(|(_, stored_at)| *stored_at);
        for (key, _) in entries.into_iter().take(evict_count) {
            self.store.remove(&key);
            CACHE_EVICTIONS.inc();
        }
        debug!(evicted = evict_count, "recommendation cache capacity sweep");
    }

    /// Drop every entry belonging to a session.
    pub fn invalidate_session(&self, session_id: Uuid) -> usize {
        let prefix = format!("{}:", session_id);
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.key().clone())
            .collect();
        let removed = keys.len();
        for key in keys {
            self.store.remove(&key);
        }
        if removed > 0 {
            debug!(session_id = %session_id, removed, "invalidated session cache entries");
        }
        removed
    }

    pub fn clear(&self) -> usize {
        let count = self.store.len();
        self.store.clear();
        count
    }

    /// Remove expired entries; called by the maintenance task.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        let removed = before - self.store.len();
        for _ in 0..removed {
            CACHE_EVICTIONS.inc();
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let estimated_size_bytes = self.store.iter().map(|e| e.value().size_bytes).sum();
        CacheStats {
            enabled: self.enabled,
            entries: self.store.len(),
            max_entries: self.max_entries,
            estimated_size_bytes,
            ttl_ms: self.ttl.as_millis() as u64,
            hits: CACHE_HITS.get(),
            misses: CACHE_MISSES.get(),
            evictions: CACHE_EVICTIONS.get(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> RecommendationCache {
        RecommendationCache::new(true, 10, Duration::from_millis(200))
    }

    #[test]
    fn key_changes_with_history_length() {
        let session = Uuid::new_v4();
        let filters = json!({"category": "tops"});
        let a = RecommendationCache::key(session, &filters, 1, 5);
        let b = RecommendationCache::key(session, &filters, 1, 6);
        assert_ne!(a, b);
        let c = RecommendationCache::key(session, &filters, 2, 5);
        assert_ne!(a, c);
    }

    #[test]
    fn hit_requires_matching_history_length() {
        let cache = cache();
        let session = Uuid::new_v4();
        let key = RecommendationCache::key(session, &json!({}), 1, 3);
        cache.insert(key.clone(), json!({"ok": true}), 3);

        assert!(cache.get(&key, 3).is_some());
        // Same key but the session history moved on: not served.
        assert!(cache.get(&key, 4).is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache();
        let session = Uuid::new_v4();
        let key = RecommendationCache::key(session, &json!({}), 1, 0);
        cache.insert(key.clone(), json!({"ok": true}), 0);
        assert!(cache.get(&key, 0).is_some());

        std::thread::sleep(Duration::from_millis(250));
        assert!(cache.get(&key, 0).is_none());
    }

    #[test]
    fn session_invalidation_only_touches_that_session() {
        let cache = cache();
        let s1 = Uuid::new_v4();
        let s2 = Uuid::new_v4();
        let k1 = RecommendationCache::key(s1, &json!({}), 1, 0);
        let k2 = RecommendationCache::key(s2, &json!({}), 1, 0);
        cache.insert(k1.clone(), json!(1), 0);
        cache.insert(k2.clone(), json!(2), 0);

        assert_eq!(cache.invalidate_session(s1), 1);
        assert!(cache.get(&k1, 0).is_none());
        assert!(cache.get(&k2, 0).is_some());
    }

    #[test]
    fn capacity_sweep_evicts_oldest_first() {
        let cache = RecommendationCache::new(true, 5, Duration::from_secs(60));
        let session = Uuid::new_v4();
        let first = RecommendationCache::key(session, &json!({"i": 0}), 1, 0);
        cache.insert(first.clone(), json!(0), 0);
        std::thread::sleep(Duration::from_millis(5));
        for i in 1..6 {
            let key = RecommendationCache::key(session, &json!({ "i": i }), 1, 0);
            cache.insert(key, json!(i), 0);
        }
        // Oldest entry was swept to make room.
        assert!(cache.get(&first, 0).is_none());
        assert!(cache.stats().entries <= 5);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = RecommendationCache::new(false, 10, Duration::from_secs(60));
        let key = RecommendationCache::key(Uuid::new_v4(), &json!({}), 1, 0);
        cache.insert(key.clone(), json!(1), 0);
        assert!(cache.get(&key, 0).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
