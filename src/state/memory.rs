use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{BackendMode, StateBackend, WindowCount};
use crate::errors::AppResult;

/// Entry stored in the local DashMap with an expiry timestamp.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

#[derive(Clone, Copy)]
struct Counter {
    count: u64,
    reset_at: Instant,
}

/// In-process fallback backend.
///
/// Entries honour their TTL lazily: an expired entry is removed by the `get`
/// that finds it. `evict_expired()` can be called periodically (see
/// `jobs::sweep`) to bound memory when running without Redis for long
/// periods. Each map is also capped at `max_entries`.
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, CacheEntry>>,
    counters: Arc<DashMap<String, Counter>>,
    max_entries: usize,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Remove all expired entries and elapsed counters. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len() + self.counters.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.counters.retain(|_, counter| counter.reset_at > now);
        before - (self.entries.len() + self.counters.len())
    }

    /// Current number of cache entries (for metrics / debugging).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn make_room_for(&self, key: &str) {
        if self.entries.len() < self.max_entries || self.entries.contains_key(key) {
            return;
        }
        self.evict_expired();
        if self.entries.len() < self.max_entries {
            return;
        }
        // Still full of live entries: drop the one closest to expiry.
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| e.key().clone());
        if let Some(victim) = victim {
            tracing::debug!(key = %victim, "memory backend full, evicting entry");
            self.entries.remove(&victim);
        }
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
            // expired: drop the ref before removing
            drop(entry);
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl_secs: u64) -> AppResult<()> {
        self.make_room_for(key);
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window_secs: u64) -> AppResult<WindowCount> {
        let now = Instant::now();
        let window = Duration::from_secs(window_secs.max(1));

        if self.counters.len() >= self.max_entries && !self.counters.contains_key(key) {
            self.counters.retain(|_, counter| counter.reset_at > now);
        }

        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            reset_at: now + window,
        });
        if now >= counter.reset_at {
            *counter = Counter {
                count: 0,
                reset_at: now + window,
            };
        }
        counter.count += 1;

        let remaining = counter.reset_at.saturating_duration_since(now);
        Ok(WindowCount {
            count: counter.count,
            reset_secs: remaining.as_millis().div_ceil(1000) as u64,
        })
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Memory
    }
}
