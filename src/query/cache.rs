//! Query result cache
//!
//! LRU cache over whole result sets, keyed by the canonical encoding of the
//! validated query AST. Entries never expire: the partition store is
//! immutable, so a cached result stays correct until `clear()` is called.
//! Bounds are enforced on both entry count and total bytes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::CacheSettings;
use crate::query::ast::Query;
use crate::query::result::ResultSet;

// ============================================================================
// Cache Entry
// ============================================================================

/// Cached result with LRU bookkeeping
struct CacheEntry {
    /// The cached result
    result: ResultSet,

    /// Approximate size in bytes
    size_bytes: usize,

    /// Last access time (for LRU)
    last_accessed: Instant,
}

impl CacheEntry {
    fn new(result: ResultSet) -> Self {
        let size_bytes = result.approx_size_bytes();
        Self {
            result,
            size_bytes,
            last_accessed: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

// ============================================================================
// Result Cache
// ============================================================================

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: AtomicU64,

    /// Total cache misses
    pub misses: AtomicU64,

    /// Total evictions
    pub evictions: AtomicU64,
}

/// LRU cache for query results
pub struct ResultCache {
    /// Cache configuration
    config: CacheSettings,

    /// Cached entries, keyed by the query's canonical encoding
    entries: RwLock<HashMap<String, CacheEntry>>,

    /// Current total size in bytes
    current_size: AtomicU64,

    /// Statistics
    stats: CacheStats,
}

impl ResultCache {
    /// Create a new result cache
    pub fn new(config: CacheSettings) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            current_size: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached result for a query
    ///
    /// Returns a deep clone; callers own their copy.
    pub fn get(&self, query: &Query) -> Option<ResultSet> {
        if !self.config.enabled {
            return None;
        }

        let key = query.canonical_key();
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&key) {
            entry.touch();
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.result.clone());
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cache a query result
    pub fn put(&self, query: &Query, result: ResultSet) {
        if !self.config.enabled {
            return;
        }

        let key = query.canonical_key();
        let entry = CacheEntry::new(result);
        let entry_size = entry.size_bytes;

        // An entry that can never fit within the bounds is not worth
        // evicting everything else for.
        if self.config.max_entries == 0 || entry_size > self.config.max_size_bytes {
            return;
        }

        let mut entries = self.entries.write();

        if let Some(old_entry) = entries.remove(&key) {
            self.current_size
                .fetch_sub(old_entry.size_bytes as u64, Ordering::Relaxed);
        }

        while entries.len() + 1 > self.config.max_entries && !entries.is_empty() {
            self.evict_lru(&mut entries);
        }
        while self.current_size.load(Ordering::Relaxed) as usize + entry_size
            > self.config.max_size_bytes
            && !entries.is_empty()
        {
            self.evict_lru(&mut entries);
        }

        self.current_size
            .fetch_add(entry_size as u64, Ordering::Relaxed);
        entries.insert(key, entry);
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        self.entries.write().clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get current cache size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Get number of cached entries
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Evict the least recently used entry
    fn evict_lru(&self, entries: &mut HashMap<String, CacheEntry>) {
        let lru_key = entries
            .iter()
            .min_by_key(|(_, e)| e.last_accessed)
            .map(|(k, _)| k.clone());

        if let Some(key) = lru_key {
            if let Some(entry) = entries.remove(&key) {
                self.current_size
                    .fetch_sub(entry.size_bytes as u64, Ordering::Relaxed);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
