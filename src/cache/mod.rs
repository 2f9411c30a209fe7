//! Response caching for reads.
//!
//! # Responsibilities
//! - Serve fresh entries (age ≤ ttl) for `use_cache` reads
//! - Keep expired entries for `max_stale` past expiry so the degradation
//!   policy can fall back to them
//! - Bound the entry count, evicting the oldest insertion first
//!
//! # Design Decisions
//! - Key is `"METHOD endpoint"`, built by `RequestDescriptor::cache_key`
//! - Entries are whole buffered `ApiResponse`s; bodies are `Bytes` so clones are cheap
//! - Ages use `tokio::time::Instant` so paused-clock tests drive expiry

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::transport::{ApiResponse, ResponseSource};

#[derive(Debug, Clone)]
struct CacheEntry {
    response: ApiResponse,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.inserted_at)
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.age(now) <= self.ttl
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub entries: usize,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate in percent.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

/// Bounded TTL cache of read responses.
pub struct ResponseCache {
    enabled: bool,
    ttl: Duration,
    max_stale: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_secs),
            max_stale: Duration::from_secs(config.max_stale_secs),
            max_entries: config.max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh entry for `key`. Expired entries are kept for stale fallback.
    pub fn get(&self, key: &str) -> Option<ApiResponse> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, age = ?entry.age(now), "Cache hit");
                Some(entry.response.clone().with_source(ResponseSource::Cache))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Expired entry for `key` still inside the stale window, with its age.
    ///
    /// Fresh entries are not returned here; callers check `get` first.
    pub fn get_stale(&self, key: &str) -> Option<(ApiResponse, Duration)> {
        if !self.enabled {
            return None;
        }
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get(key)?;
        let age = entry.age(now);
        if entry.is_fresh(now) || age > entry.ttl + self.max_stale {
            return None;
        }
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
        Some((
            entry.response.clone().with_source(ResponseSource::StaleCache),
            age,
        ))
    }

    /// Store a response under the default TTL.
    pub fn insert(&self, key: &str, response: ApiResponse) {
        self.insert_with_ttl(key, response, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: &str, response: ApiResponse, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = %oldest, "Cache full, evicted oldest entry");
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                response: response.with_source(ResponseSource::Network),
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let count = entries.len();
        entries.clear();
        tracing::info!(count, "Cache cleared");
    }

    /// Remove entries past their stale window. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) <= entry.ttl + self.max_stale);
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "Swept expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            entries: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
