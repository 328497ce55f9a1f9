//! Response caching for backend channels
//!
//! Opaque bounded key→bytes cache: the dispatcher hashes `(path, body)` into
//! a 64-bit key and short-circuits the backend call on a hit. LRU eviction
//! over both an entry count and a byte budget.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::lock_utils;

/// Per-entry bookkeeping overhead charged against the byte budget.
const ENTRY_OVERHEAD_BYTES: usize = 64;

#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4_096,
            max_bytes: 32 * 1024 * 1024,
            ttl: Duration::from_secs(30),
        }
    }
}

struct Entry {
    status: u16,
    body: Bytes,
    cached_at: Instant,
    last_accessed: Instant,
}

impl Entry {
    fn size(&self) -> usize {
        self.body.len() + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseCacheStats {
    pub entries: usize,
    pub current_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    entries: HashMap<u64, Entry>,
    current_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Bounded LRU cache over backend responses.
pub struct ResponseCache {
    inner: Mutex<Inner>,
    config: ResponseCacheConfig,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                current_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            config,
        }
    }

    /// 64-bit cache key over the request path and body.
    pub fn key(path: &str, body: &[u8]) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(body);
        let digest = hasher.finalize();
        u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("digest is 32 bytes"))
    }

    pub fn get(&self, key: u64) -> Option<(u16, Bytes)> {
        let mut inner = lock_utils::mutex_lock(&self.inner);
        let now = Instant::now();

        let expired = match inner.entries.get(&key) {
            Some(entry) => now.duration_since(entry.cached_at) > self.config.ttl,
            None => {
                inner.misses += 1;
                return None;
            }
        };
        if expired {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.current_bytes = inner.current_bytes.saturating_sub(entry.size());
            }
            inner.misses += 1;
            return None;
        }

        let entry = inner.entries.get_mut(&key).expect("entry checked above");
        entry.last_accessed = now;
        let hit = (entry.status, entry.body.clone());
        inner.hits += 1;
        Some(hit)
    }

    /// Insert a response. Entries larger than the whole byte budget are
    /// silently skipped; the response still reaches the client.
    pub fn put(&self, key: u64, status: u16, body: Bytes) {
        let size = body.len() + ENTRY_OVERHEAD_BYTES;
        if size > self.config.max_bytes {
            return;
        }

        let mut inner = lock_utils::mutex_lock(&self.inner);
        if let Some(old) = inner.entries.remove(&key) {
            inner.current_bytes = inner.current_bytes.saturating_sub(old.size());
        }

        while inner.entries.len() >= self.config.max_entries
            || inner.current_bytes + size > self.config.max_bytes
        {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| *k);
            match victim {
                Some(victim_key) => {
                    if let Some(entry) = inner.entries.remove(&victim_key) {
                        inner.current_bytes = inner.current_bytes.saturating_sub(entry.size());
                        inner.evictions += 1;
                    }
                }
                None => break,
            }
        }

        let now = Instant::now();
        inner.current_bytes += size;
        inner.entries.insert(
            key,
            Entry {
                status,
                body,
                cached_at: now,
                last_accessed: now,
            },
        );
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let inner = lock_utils::mutex_lock(&self.inner);
        ResponseCacheStats {
            entries: inner.entries.len(),
            current_bytes: inner.current_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }
}
