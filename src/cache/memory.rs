//! In-Memory Cache Backend
//!
//! Thread-safe TTL cache on DashMap, suitable for dev/tests and for
//! single-node deployments. Bounded: when the entry cap is reached, expired
//! entries are purged first, then the oldest entries are evicted.
//!
//! Features:
//! - TTL-based expiration, validated lazily on get
//! - Maximum-entry cap with oldest-first eviction
//! - Cache HIT/MISS logging
//! - Hit/miss counters for the health endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::Cache;

/// Cache entry with timestamp for TTL validation
#[derive(Clone, Debug)]
struct CacheEntry {
    value: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
    /// Monotonic insertion sequence, used for oldest-first eviction
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Bounded in-memory TTL cache
pub struct MemoryCache {
    store: Arc<DashMap<String, CacheEntry>>,
    max_entries: usize,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a cache bounded to `max_entries`
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Drop expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        before - self.store.len()
    }

    /// Evict oldest entries until below the cap
    fn enforce_cap(&self) {
        while self.store.len() >= self.max_entries {
            let oldest = self
                .store
                .iter()
                .min_by_key(|e| e.value().seq)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.store.remove(&key);
                    debug!("🗑️ CACHE EVICT (cap): {}", key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// (hits, misses)
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(entry) = self.store.get(key) {
            if entry.is_expired() {
                drop(entry); // release read lock before removing
                self.store.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("📭 CACHE MISS (expired): {}", key);
                None
            } else {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("✅ CACHE HIT: {}", key);
                Some(entry.value.clone())
            }
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("📭 CACHE MISS: {}", key);
            None
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) {
        if !self.store.contains_key(key) {
            self.cleanup_expired();
            self.enforce_cap();
        }
        let entry = CacheEntry {
            value: value.to_vec(),
            created_at: Instant::now(),
            ttl,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.store.insert(key.to_string(), entry);
        debug!("💾 CACHE SET: {} (ttl {}s)", key, ttl.as_secs());
    }

    async fn ping(&self) -> bool {
        true
    }
}
