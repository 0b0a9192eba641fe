//! Bounded result caching.
//!
//! Two tiers share one policy: finished walks keyed by directory, and
//! finished scan results keyed by directory and strategy. Both remember the
//! depth limit they were produced with and only answer lookups for the same
//! limit. Entries expire after a TTL and the least recently used ones go
//! first when a tier is over its entry or byte budget.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::Glob;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use pairscan_core::{CacheConfig, EstimateSize, MatchStrategy, ScanResult, normalize_directory};

use crate::walker::WalkOutcome;

/// Cache errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A glob passed to `remove_matching` did not parse.
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
}

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub last_access_seq: u64,
    bytes: usize,
}

/// Counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub estimated_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// A single TTL + LRU bounded map. Not synchronized; wrap it in a lock.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    max_bytes: usize,
    total_bytes: usize,
    seq: u64,
    stats: CacheStats,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + EstimateSize,
{
    pub fn new(ttl: Duration, max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            max_bytes,
            total_bytes: 0,
            seq: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_if(key, |_| true)
    }

    /// Like [`get`](Self::get), but a live entry rejected by `accept` counts
    /// as a miss and is left in place for the next insert to replace.
    pub fn get_if(&mut self, key: &K, accept: impl FnOnce(&V) -> bool) -> Option<V> {
        let (expired, accepted) = match self.entries.get(key) {
            Some(entry) => (entry.created_at.elapsed() >= self.ttl, accept(&entry.value)),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };
        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }
        if !accepted {
            self.stats.misses += 1;
            return None;
        }

        let seq = self.next_seq();
        let entry = self.entries.get_mut(key)?;
        entry.last_access_seq = seq;
        self.stats.hits += 1;
        Some(entry.value.clone())
    }

    /// Store a value, replacing any previous one (last writer wins).
    pub fn insert(&mut self, key: K, value: V) {
        let bytes = value.estimated_bytes();
        let seq = self.next_seq();
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            last_access_seq: seq,
            bytes,
        };
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes -= old.bytes;
        }
        self.total_bytes += bytes;

        if self.entries.len() > self.max_entries || self.total_bytes > self.max_bytes {
            self.cleanup();
        }
    }

    /// Remove one entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.bytes;
        Some(entry.value)
    }

    /// Remove every entry whose key fails `keep`. Returns how many went.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let before = self.entries.len();
        let mut freed = 0;
        self.entries.retain(|k, e| {
            let kept = keep(k);
            if !kept {
                freed += e.bytes;
            }
            kept
        });
        self.total_bytes -= freed;
        before - self.entries.len()
    }

    /// Expire old entries, then evict least recently used ones until the
    /// tier fits its budgets. Linear in the number of entries unless the
    /// byte budget is exceeded. Returns how many entries were removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.entries.len();

        let ttl = self.ttl;
        let now = Instant::now();
        let mut freed = 0;
        self.entries.retain(|_, e| {
            let live = now.duration_since(e.created_at) < ttl;
            if !live {
                freed += e.bytes;
            }
            live
        });
        self.total_bytes -= freed;
        let expired = before - self.entries.len();
        self.stats.expirations += expired as u64;

        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.evict_oldest(excess);
        }

        if self.total_bytes > self.max_bytes {
            // Over the byte budget: go to 75% so the next insert does not
            // immediately trigger another pass.
            self.evict_to_bytes(self.max_bytes / 4 * 3);
        }

        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, expired, remaining = self.entries.len(), "Cache cleanup");
        }
        removed
    }

    fn evict_oldest(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let mut order: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.last_access_seq, k.clone()))
            .collect();
        if count < order.len() {
            order.select_nth_unstable_by_key(count - 1, |(seq, _)| *seq);
            order.truncate(count);
        }
        for (_, key) in order {
            if self.remove(&key).is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    fn evict_to_bytes(&mut self, target: usize) {
        let mut order: Vec<(u64, K)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.last_access_seq, k.clone()))
            .collect();
        order.sort_unstable_by_key(|(seq, _)| *seq);
        for (_, key) in order {
            if self.total_bytes <= target {
                break;
            }
            if self.remove(&key).is_some() {
                self.stats.evictions += 1;
            }
        }
    }

    /// Change the entry cap. Takes effect on the next cleanup.
    pub fn set_max_entries(&mut self, max_entries: usize) {
        self.max_entries = max_entries.max(1);
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Evict least recently used entries until at most `target` remain.
    pub fn trim_to(&mut self, target: usize) -> usize {
        let excess = self.entries.len().saturating_sub(target);
        self.evict_oldest(excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            estimated_bytes: self.total_bytes,
            ..self.stats
        }
    }
}

type ResultKey = (PathBuf, MatchStrategy);

/// A cached value and the depth limit it was produced with.
#[derive(Debug, Clone)]
struct DepthTagged<V> {
    value: V,
    max_depth: Option<u32>,
}

impl<V: EstimateSize> EstimateSize for DepthTagged<V> {
    fn estimated_bytes(&self) -> usize {
        self.value.estimated_bytes()
    }
}

/// Two-tier scan cache, safe to share between threads.
///
/// Directory arguments are normalized, so `lib/../lib` and `lib` hit the
/// same entry. A directory holds one entry per tier (and per strategy for
/// results); storing under a different depth limit replaces it.
#[derive(Debug)]
pub struct ScanCache {
    walks: Mutex<BoundedCache<PathBuf, DepthTagged<Arc<WalkOutcome>>>>,
    results: Mutex<BoundedCache<ResultKey, DepthTagged<Arc<ScanResult>>>>,
}

impl ScanCache {
    /// Create a cache with the given bounds.
    pub fn new(config: &CacheConfig) -> Self {
        let ttl = Duration::from_secs(config.ttl_secs);
        Self {
            walks: Mutex::new(BoundedCache::new(ttl, config.max_entries, config.max_bytes)),
            results: Mutex::new(BoundedCache::new(ttl, config.max_entries, config.max_bytes)),
        }
    }

    /// Create a cache with an explicit TTL, mostly for tests.
    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            walks: Mutex::new(BoundedCache::new(ttl, max_entries, usize::MAX)),
            results: Mutex::new(BoundedCache::new(ttl, max_entries, usize::MAX)),
        }
    }

    /// A finished walk of `dir` made with the same depth limit.
    pub fn get_walk(&self, dir: &Path, max_depth: Option<u32>) -> Option<Arc<WalkOutcome>> {
        self.walks
            .lock()
            .get_if(&normalize_directory(dir), |entry| entry.max_depth == max_depth)
            .map(|entry| entry.value)
    }

    pub fn store_walk(&self, dir: &Path, max_depth: Option<u32>, walk: Arc<WalkOutcome>) {
        self.walks.lock().insert(
            normalize_directory(dir),
            DepthTagged {
                value: walk,
                max_depth,
            },
        );
    }

    pub fn get_result(
        &self,
        dir: &Path,
        strategy: MatchStrategy,
        max_depth: Option<u32>,
    ) -> Option<Arc<ScanResult>> {
        self.results
            .lock()
            .get_if(&(normalize_directory(dir), strategy), |entry| {
                entry.max_depth == max_depth
            })
            .map(|entry| entry.value)
    }

    pub fn store_result(
        &self,
        dir: &Path,
        strategy: MatchStrategy,
        max_depth: Option<u32>,
        result: Arc<ScanResult>,
    ) {
        self.results.lock().insert(
            (normalize_directory(dir), strategy),
            DepthTagged {
                value: result,
                max_depth,
            },
        );
    }

    /// Invalidate everything cached for a directory, under every strategy.
    pub fn remove(&self, dir: &Path) -> usize {
        let dir = normalize_directory(dir);
        let maps = usize::from(self.walks.lock().remove(&dir).is_some());
        let results = self.results.lock().retain(|(d, _)| *d != dir);
        maps + results
    }

    /// Invalidate every directory matching a glob pattern.
    pub fn remove_matching(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher = Glob::new(pattern)
            .map_err(|source| CacheError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();
        let maps = self.walks.lock().retain(|d| !matcher.is_match(d));
        let results = self.results.lock().retain(|(d, _)| !matcher.is_match(d));
        debug!(pattern, removed = maps + results, "Cache invalidated by pattern");
        Ok(maps + results)
    }

    /// Run expiry and eviction on both tiers.
    pub fn cleanup(&self) -> usize {
        self.walks.lock().cleanup() + self.results.lock().cleanup()
    }

    /// Change the entry cap of both tiers and enforce it now.
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut maps = self.walks.lock();
        maps.set_max_entries(max_entries);
        maps.cleanup();
        drop(maps);

        let mut results = self.results.lock();
        results.set_max_entries(max_entries);
        results.cleanup();
    }

    /// Evict the oldest entries down to half of each tier's cap.
    pub fn shed_load(&self) -> usize {
        let mut maps = self.walks.lock();
        let target = maps.max_entries() / 2;
        let mut removed = maps.trim_to(target);
        drop(maps);

        let mut results = self.results.lock();
        let target = results.max_entries() / 2;
        removed += results.trim_to(target);
        removed
    }

    pub fn clear(&self) {
        self.walks.lock().clear();
        self.results.lock().clear();
    }

    /// Counters for the walk tier and the result tier.
    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.walks.lock().stats(), self.results.lock().stats())
    }
}

impl Default for ScanCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Blob(usize);

    impl EstimateSize for Blob {
        fn estimated_bytes(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_lru_eviction_order() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 3, usize::MAX);
        cache.insert("a", Blob(1));
        cache.insert("b", Blob(1));
        cache.insert("c", Blob(1));
        assert!(cache.get(&"a").is_some());

        cache.insert("d", Blob(1));
        assert_eq!(cache.len(), 3);
        assert!(cache.get(&"b").is_none());
        assert!(cache.get(&"a").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = BoundedCache::new(Duration::from_millis(20), 10, usize::MAX);
        cache.insert(1, Blob(1));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_byte_budget() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 100, 100);
        for i in 0..10 {
            cache.insert(i, Blob(30));
        }
        assert!(cache.stats().estimated_bytes <= 100);
        // The newest entry is always kept.
        assert!(cache.get(&9).is_some());
    }

    #[test]
    fn test_replace_keeps_byte_count() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 10, usize::MAX);
        cache.insert("k", Blob(10));
        cache.insert("k", Blob(4));
        assert_eq!(cache.stats().estimated_bytes, 4);
        assert_eq!(cache.get(&"k"), Some(Blob(4)));
    }

    #[test]
    fn test_trim_to() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 10, usize::MAX);
        for i in 0..10 {
            cache.insert(i, Blob(1));
        }
        assert_eq!(cache.trim_to(4), 6);
        assert_eq!(cache.len(), 4);
        assert!(cache.get(&9).is_some());
        assert!(cache.get(&0).is_none());
    }

    #[test]
    fn test_rejected_entry_is_a_miss() {
        let mut cache = BoundedCache::new(Duration::from_secs(60), 10, usize::MAX);
        cache.insert("k", Blob(3));
        assert!(cache.get_if(&"k", |blob| blob.0 == 4).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_if(&"k", |blob| blob.0 == 3), Some(Blob(3)));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_depth_limit_is_part_of_the_lookup() {
        let cache = ScanCache::with_ttl(Duration::from_secs(60), 8);
        let dir = Path::new("/cache/depth");
        let strategy = MatchStrategy::BestMatch;
        cache.store_result(dir, strategy, Some(0), Arc::new(ScanResult::new(dir, strategy)));
        cache.store_walk(dir, Some(0), Arc::new(WalkOutcome::default()));

        assert!(cache.get_result(dir, strategy, None).is_none());
        assert!(cache.get_result(dir, strategy, Some(1)).is_none());
        assert!(cache.get_result(dir, strategy, Some(0)).is_some());
        assert!(cache.get_walk(dir, None).is_none());
        assert!(cache.get_walk(dir, Some(0)).is_some());

        // Any depth is cleared by a plain remove.
        assert_eq!(cache.remove(dir), 2);
        assert!(cache.get_result(dir, strategy, Some(0)).is_none());
    }
}
