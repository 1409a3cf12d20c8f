//! Bounded response cache with per-entry TTL
//!
//! Expiry is decided here and nowhere else: an entry whose TTL has elapsed is
//! treated as a miss by [`CacheStore::get`] and removed on the spot. When the
//! store is full the entry inserted earliest is evicted; reads do not promote.

pub mod key;
pub mod persist;

pub use key::{compute_key, encode_query, Params};
pub use persist::{PersistError, PersistentCache};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// A cached value and its lifetime
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }

    fn remaining_ttl(&self, now: Instant) -> Duration {
        self.ttl
            .saturating_sub(now.saturating_duration_since(self.inserted_at))
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live (unexpired) entries
    pub size: usize,
    pub capacity: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order; records whose seq no longer matches are stale
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

/// Thread-safe TTL cache with insertion-order eviction
#[derive(Debug)]
pub struct CacheStore<V> {
    capacity: usize,
    inner: RwLock<CacheInner<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V: Clone> CacheStore<V> {
    /// Create a store holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheInner<V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheInner<V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a fresh value
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let inner = self.read();
            match inner.entries.get(key) {
                Some(entry) if entry.is_fresh(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it unless someone refreshed it in the meantime
        let mut inner = self.write();
        if let Some(entry) = inner.entries.get(key) {
            if entry.is_fresh(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            debug!("Cache entry expired: {}", key);
            inner.entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace a value; a zero TTL removes the key instead
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut inner = self.write();
        if ttl.is_zero() {
            inner.entries.remove(&key);
            return;
        }

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.capacity {
                if !self.evict_oldest(&mut inner) {
                    break;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: Instant::now(),
                ttl,
                seq,
            },
        );

        if inner.order.len() > inner.entries.len() * 2 + 16 {
            let CacheInner { entries, order, .. } = &mut *inner;
            order.retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
        }
    }

    fn evict_oldest(&self, inner: &mut CacheInner<V>) -> bool {
        while let Some((key, seq)) = inner.order.pop_front() {
            if inner.entries.get(&key).is_some_and(|e| e.seq == seq) {
                debug!("Evicting cache entry: {}", key);
                inner.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Remove one key
    pub fn remove(&self, key: &str) -> Option<V> {
        self.write().entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Physically remove expired entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.write();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        before - inner.entries.len()
    }

    /// Entries currently stored, including expired ones not yet removed
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let size = self
            .read()
            .entries
            .values()
            .filter(|entry| entry.is_fresh(now))
            .count();
        CacheStats {
            size,
            capacity: self.capacity,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Live entries with their remaining TTL, oldest insertion first
    pub fn snapshot(&self) -> Vec<(String, V, Duration)> {
        let now = Instant::now();
        let inner = self.read();
        let mut live: Vec<&CacheEntry<V>> = inner
            .entries
            .values()
            .filter(|entry| entry.is_fresh(now))
            .collect();
        live.sort_by_key(|entry| entry.seq);
        live.into_iter()
            .map(|entry| (entry.key.clone(), entry.value.clone(), entry.remaining_ttl(now)))
            .collect()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheStore<V> {
    /// Periodically purge expired entries until the store is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!("Cache sweep removed {} expired entries", purged);
                }
            }
        })
    }
}
