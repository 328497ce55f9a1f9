//! Domain data caching for ZNS
//!
//! Bounded in-memory TTL cache with LRU eviction, byte-budget accounting,
//! and hit/miss/eviction statistics. Entries are deep-copied on insert and
//! owned exclusively by the cache.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::{DomainData, ResolutionSource};

/// Fixed bookkeeping overhead charged per entry, on top of owned strings.
const ENTRY_OVERHEAD_BYTES: usize = 160;

/// Cache tuning parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub default_ttl_secs: u32,
    pub min_ttl_secs: u32,
    pub max_ttl_secs: u32,
    pub cleanup_interval: Duration,
    /// How many extra entries to evict beyond the minimum when over budget.
    pub eviction_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_bytes: 64 * 1024 * 1024,
            default_ttl_secs: 3_600,
            min_ttl_secs: 60,
            max_ttl_secs: 86_400,
            cleanup_interval: Duration::from_secs(300),
            eviction_batch_size: 16,
        }
    }
}

/// Cache insertion failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// A single entry alone exceeds the memory budget; eviction cannot help.
    #[error("entry of {entry_bytes} bytes exceeds cache budget of {budget_bytes} bytes")]
    CapacityExhausted {
        entry_bytes: usize,
        budget_bytes: usize,
    },
}

struct CacheEntry {
    data: DomainData,
    cached_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    hit_count: u64,
    source: ResolutionSource,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A cache hit, deep-copied out of the store.
#[derive(Debug, Clone)]
pub struct CachedDomain {
    pub data: DomainData,
    pub source: ResolutionSource,
    pub hit_count: u64,
    pub age: Duration,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub current_memory_bytes: usize,
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub insertions: u64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    expirations: u64,
    evictions: u64,
    insertions: u64,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    current_memory_bytes: usize,
    counters: Counters,
    last_cleanup: Instant,
}

/// Bounded TTL cache for resolved domain data.
pub struct DomainCache {
    inner: Mutex<CacheInner>,
    config: CacheConfig,
}

impl DomainCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                current_memory_bytes: 0,
                counters: Counters::default(),
                last_cleanup: Instant::now(),
            }),
            config,
        }
    }

    /// Effective TTL used for insertion: requested (or default) clamped to
    /// `[min_ttl, max_ttl]`.
    pub fn effective_ttl(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.config.default_ttl_secs)
            .clamp(self.config.min_ttl_secs, self.config.max_ttl_secs)
    }

    /// Look up a domain. A hit bumps the entry to most-recently-used; an
    /// expired entry is removed in-band and counted as an expiration.
    pub fn get(&self, domain: &str) -> Option<CachedDomain> {
        let now = Instant::now();
        let mut inner = self.lock();

        self.maybe_cleanup(&mut inner, now);

        let expired = match inner.entries.get(domain) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.counters.misses += 1;
                return None;
            }
        };

        if expired {
            if let Some(entry) = inner.entries.remove(domain) {
                inner.current_memory_bytes =
                    inner.current_memory_bytes.saturating_sub(entry.size_bytes);
            }
            inner.counters.expirations += 1;
            inner.counters.misses += 1;
            return None;
        }

        let entry = inner
            .entries
            .get_mut(domain)
            .expect("entry checked above");
        entry.last_accessed = now;
        entry.hit_count += 1;
        let hit = CachedDomain {
            data: entry.data.clone(),
            source: entry.source,
            hit_count: entry.hit_count,
            age: now.duration_since(entry.cached_at),
        };
        inner.counters.hits += 1;
        Some(hit)
    }

    /// Insert (or replace) the entry for `data.domain`. The previous entry's
    /// memory is released before the new one is accounted.
    pub fn put(
        &self,
        data: DomainData,
        requested_ttl: Option<u32>,
        source: ResolutionSource,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let ttl = self.effective_ttl(requested_ttl);
        let size_bytes = entry_size(&data);

        if size_bytes > self.config.max_memory_bytes {
            return Err(CacheError::CapacityExhausted {
                entry_bytes: size_bytes,
                budget_bytes: self.config.max_memory_bytes,
            });
        }

        let mut inner = self.lock();
        self.maybe_cleanup(&mut inner, now);

        // Drop any previous entry for the same domain first
        if let Some(old) = inner.entries.remove(&data.domain) {
            inner.current_memory_bytes =
                inner.current_memory_bytes.saturating_sub(old.size_bytes);
        }

        // Evict until both budgets have room for the incoming entry
        while inner.entries.len() >= self.config.max_entries
            || inner.current_memory_bytes + size_bytes > self.config.max_memory_bytes
        {
            if !self.evict_one(&mut inner) {
                break;
            }
        }

        let domain = data.domain.clone();
        inner.current_memory_bytes += size_bytes;
        inner.counters.insertions += 1;
        inner.entries.insert(
            domain,
            CacheEntry {
                data,
                cached_at: now,
                expires_at: now + Duration::from_secs(u64::from(ttl)),
                last_accessed: now,
                hit_count: 0,
                source,
                size_bytes,
            },
        );
        Ok(())
    }

    /// Remove a single domain. Returns whether an entry was present.
    pub fn remove(&self, domain: &str) -> bool {
        let mut inner = self.lock();
        match inner.entries.remove(domain) {
            Some(entry) => {
                inner.current_memory_bytes =
                    inner.current_memory_bytes.saturating_sub(entry.size_bytes);
                true
            }
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.current_memory_bytes = 0;
    }

    /// Remove all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.last_cleanup = now;
        Self::cleanup_expired_locked(&mut inner, now, usize::MAX)
    }

    pub fn stats(&self) -> CacheStatistics {
        let inner = self.lock();
        CacheStatistics {
            entries: inner.entries.len(),
            current_memory_bytes: inner.current_memory_bytes,
            max_entries: self.config.max_entries,
            max_memory_bytes: self.config.max_memory_bytes,
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            expirations: inner.counters.expirations,
            evictions: inner.counters.evictions,
            insertions: inner.counters.insertions,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --- internals ---

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("domain cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn maybe_cleanup(&self, inner: &mut CacheInner, now: Instant) {
        if now.duration_since(inner.last_cleanup) >= self.config.cleanup_interval {
            inner.last_cleanup = now;
            // In-band passes are bounded so a get/put never stalls on a
            // large backlog; the periodic task runs the unbounded sweep
            let dropped =
                Self::cleanup_expired_locked(inner, now, self.config.eviction_batch_size);
            if dropped > 0 {
                tracing::debug!(dropped, "opportunistic cache cleanup");
            }
        }
    }

    fn cleanup_expired_locked(inner: &mut CacheInner, now: Instant, limit: usize) -> usize {
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .take(limit)
            .collect();
        for key in &expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.current_memory_bytes =
                    inner.current_memory_bytes.saturating_sub(entry.size_bytes);
            }
        }
        inner.counters.expirations += expired.len() as u64;
        expired.len()
    }

    /// Evict the least-recently-used entry. Ties on `last_accessed` prefer
    /// the entry expiring sooner, then the larger entry.
    fn evict_one(&self, inner: &mut CacheInner) -> bool {
        let victim = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| (e.last_accessed, e.expires_at, Reverse(e.size_bytes)))
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                if let Some(entry) = inner.entries.remove(&key) {
                    inner.current_memory_bytes =
                        inner.current_memory_bytes.saturating_sub(entry.size_bytes);
                    inner.counters.evictions += 1;
                    tracing::trace!(domain = %key, "evicted cache entry");
                }
                true
            }
            None => false,
        }
    }
}

/// Approximate heap footprint of a domain entry: every owned string plus a
/// fixed per-entry overhead.
fn entry_size(data: &DomainData) -> usize {
    let mut size = ENTRY_OVERHEAD_BYTES;
    size += data.domain.len() + data.owner.len() + data.signature.len();
    if let Some(addr) = &data.contract_address {
        size += addr.len();
    }
    size += data.metadata.registrar.len();
    for opt in [
        &data.metadata.description,
        &data.metadata.avatar,
        &data.metadata.website,
    ] {
        if let Some(s) = opt {
            size += s.len();
        }
    }
    for tag in &data.metadata.tags {
        size += tag.len();
    }
    if let Some(social) = &data.metadata.social {
        for opt in [&social.twitter, &social.github, &social.telegram, &social.discord] {
            if let Some(s) = opt {
                size += s.len();
            }
        }
    }
    for record in &data.records {
        size += record.name.len() + record.value.len();
        if let Some(t) = &record.target {
            size += t.len();
        }
        if let Some(s) = &record.signature {
            size += s.len();
        }
        size += 32; // fixed fields
    }
    size
}
