//! Response memoization shared by every worker of a harvester.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::Feature;

/// How a request interacts with the [`ResponseCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read a live entry if present, otherwise fetch and store. (Default)
    #[default]
    Use,
    /// Always fetch, then overwrite the entry.
    Refresh,
    /// Neither read nor write.
    Bypass,
}

impl CacheMode {
    pub const fn reads(self) -> bool {
        matches!(self, Self::Use)
    }

    pub const fn writes(self) -> bool {
        matches!(self, Self::Use | Self::Refresh)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    features: Arc<Vec<Feature>>,
    stored_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    ttl: Duration,
    last_sweep: Instant,
}

impl CacheInner {
    fn is_live(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) <= self.ttl
    }

    fn get(&self, key: &str) -> Option<Arc<Vec<Feature>>> {
        let now = Instant::now();
        self.map
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| Arc::clone(&entry.features))
    }

    fn put(&mut self, key: String, features: Vec<Feature>) {
        let now = Instant::now();
        // Sweep at most once per TTL.
        if now.saturating_duration_since(self.last_sweep) >= self.ttl {
            self.sweep(now);
        }
        self.map.insert(
            key,
            CacheEntry {
                features: Arc::new(features),
                stored_at: now,
            },
        );
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.map
            .retain(|_, entry| now.saturating_duration_since(entry.stored_at) <= ttl);
        self.last_sweep = now;
    }
}

/// Decoded responses keyed by category and request geometry.
///
/// Only successful decodes are stored (`Empty` as an empty list); timeouts
/// and failures are never cached. A zero TTL disables the cache. Expired
/// entries are evicted as new ones are stored.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
                last_sweep: Instant::now(),
            })),
        }
    }

    /// Entries live for one hour, long enough for a whole job.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(3_600))
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<Feature>>> {
        let store = self.inner.read().await;
        store.get(key)
    }

    pub async fn put(&self, key: String, features: Vec<Feature>) {
        let mut store = self.inner.write().await;
        if store.ttl.is_zero() {
            return;
        }
        store.put(key, features);
    }

    pub async fn clear_expired(&self) {
        let mut store = self.inner.write().await;
        store.sweep(Instant::now());
    }

    pub async fn clear(&self) {
        let mut store = self.inner.write().await;
        store.map.clear();
    }

    /// Number of entries, expired ones included.
    pub async fn len(&self) -> usize {
        let store = self.inner.read().await;
        store.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_disabled(&self) -> bool {
        let store = self.inner.read().await;
        store.ttl.is_zero()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}
