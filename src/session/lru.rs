//! LRU cache of live conversation contexts.
//!
//! Bounded by both entry count and estimated bytes; every operation
//! runs under one reader/writer lock, and `get` takes the write side
//! because it mutates recency order and hit counters.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::ConversationContext;

/// Fixed per-context overhead in the size estimate.
const BASE_CONTEXT_OVERHEAD: usize = 512;

/// Fixed per-history-entry overhead in the size estimate.
const HISTORY_ENTRY_OVERHEAD: usize = 256;

/// Fixed per-resolved-reference overhead in the size estimate.
const REFERENCE_OVERHEAD: usize = 64;

/// An entry as stored in the cache.
#[derive(Debug, Clone)]
struct Entry {
    context: ConversationContext,
    last_access: DateTime<Utc>,
    estimated_size: usize,
}

/// Counters exposed by [`SessionCache::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Entries currently cached.
    pub total_sessions: usize,
    /// Estimated memory used, in kibibytes.
    pub memory_usage_kb: u64,
    /// Configured memory limit, in kibibytes.
    pub memory_limit_kb: u64,
    /// Entries evicted since creation (bounds or TTL).
    pub evictions: u64,
    /// `cache_hits / total_accesses`, 0 before any access.
    pub hit_rate: f64,
    /// Total `get` calls.
    pub total_accesses: u64,
    /// `get` calls that found the session.
    pub cache_hits: u64,
    /// When the most recent eviction happened.
    pub last_eviction: Option<DateTime<Utc>>,
    /// Age of the least recently used entry, in seconds.
    pub oldest_entry_age_secs: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Session ids, most recently used first.
    recency: Vec<String>,
    total_bytes: usize,
    evictions: u64,
    total_accesses: u64,
    cache_hits: u64,
    last_eviction: Option<DateTime<Utc>>,
}

impl Inner {
    fn move_to_head(&mut self, id: &str) {
        if let Some(index) = self.recency.iter().position(|r| r == id) {
            let entry = self.recency.remove(index);
            self.recency.insert(0, entry);
        }
    }

    /// Remove tail entries until both bounds hold.
    fn evict_to_bounds(&mut self, max_sessions: usize, max_bytes: usize) {
        while self.entries.len() > max_sessions || self.total_bytes > max_bytes {
            let Some(victim) = self.recency.pop() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.estimated_size);
                self.evictions = self.evictions.saturating_add(1);
                self.last_eviction = Some(Utc::now());
                debug!(session_id = %victim, "session evicted from cache");
            }
        }
    }

    fn hit_rate(&self) -> f64 {
        if self.total_accesses == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = (self.cache_hits as f64) / (self.total_accesses as f64);
        rate
    }
}

/// Dual-bounded LRU cache keyed by session id.
pub struct SessionCache {
    inner: RwLock<Inner>,
    max_sessions: usize,
    max_bytes: usize,
    memory_limit_kb: u64,
}

impl SessionCache {
    /// Cache bounded to `max_sessions` entries and `max_memory_mb`
    /// mebibytes of estimated content.
    pub fn new(max_sessions: usize, max_memory_mb: usize) -> Self {
        let max_bytes = max_memory_mb.saturating_mul(1024 * 1024);
        Self {
            inner: RwLock::new(Inner::default()),
            max_sessions: max_sessions.max(1),
            max_bytes,
            memory_limit_kb: u64::try_from(max_memory_mb.saturating_mul(1024)).unwrap_or(u64::MAX),
        }
    }

    /// Insert or update a session, then enforce both bounds.
    ///
    /// The entry's size is re-estimated on every put.
    pub fn put(&self, session_id: &str, context: ConversationContext) {
        let size = estimate_context_size(&context);
        let Ok(mut inner) = self.inner.write() else {
            return;
        };

        if let Some(entry) = inner.entries.get_mut(session_id) {
            let old_size = entry.estimated_size;
            entry.context = context;
            entry.estimated_size = size;
            entry.last_access = Utc::now();
            inner.total_bytes = inner.total_bytes.saturating_sub(old_size).saturating_add(size);
            inner.move_to_head(session_id);
        } else {
            inner.entries.insert(
                session_id.to_owned(),
                Entry {
                    context,
                    last_access: Utc::now(),
                    estimated_size: size,
                },
            );
            inner.recency.insert(0, session_id.to_owned());
            inner.total_bytes = inner.total_bytes.saturating_add(size);
        }

        inner.evict_to_bounds(self.max_sessions, self.max_bytes);
    }

    /// Fetch a session, refreshing its recency on hit.
    pub fn get(&self, session_id: &str) -> Option<ConversationContext> {
        let Ok(mut inner) = self.inner.write() else {
            return None;
        };
        inner.total_accesses = inner.total_accesses.saturating_add(1);

        if inner.entries.contains_key(session_id) {
            inner.cache_hits = inner.cache_hits.saturating_add(1);
            inner.move_to_head(session_id);
            let entry = inner.entries.get_mut(session_id)?;
            entry.last_access = Utc::now();
            Some(entry.context.clone())
        } else {
            None
        }
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        let Ok(mut inner) = self.inner.write() else {
            return false;
        };
        if let Some(entry) = inner.entries.remove(session_id) {
            inner.total_bytes = inner.total_bytes.saturating_sub(entry.estimated_size);
            inner.recency.retain(|r| r != session_id);
            true
        } else {
            false
        }
    }

    /// Snapshot of every cached context, for iteration.
    pub fn get_all(&self) -> HashMap<String, ConversationContext> {
        match self.inner.read() {
            Ok(inner) => inner
                .entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.context.clone()))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    /// Drop all entries. Access counters survive.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.entries.clear();
            inner.recency.clear();
            inner.total_bytes = 0;
        }
    }

    /// Remove entries whose last access is older than `ttl`.
    ///
    /// Expired entries count as evictions. Returns how many were
    /// removed.
    pub fn prune_expired(&self, ttl: Duration) -> usize {
        let Ok(mut inner) = self.inner.write() else {
            return 0;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_access < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = inner.entries.remove(id) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.estimated_size);
                inner.recency.retain(|r| r != id);
                inner.evictions = inner.evictions.saturating_add(1);
                inner.last_eviction = Some(Utc::now());
            }
        }
        expired.len()
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        let Ok(inner) = self.inner.read() else {
            return CacheStats {
                total_sessions: 0,
                memory_usage_kb: 0,
                memory_limit_kb: self.memory_limit_kb,
                evictions: 0,
                hit_rate: 0.0,
                total_accesses: 0,
                cache_hits: 0,
                last_eviction: None,
                oldest_entry_age_secs: 0,
            };
        };
        let oldest_entry_age_secs = inner
            .recency
            .last()
            .and_then(|id| inner.entries.get(id))
            .map(|entry| {
                let age = Utc::now().signed_duration_since(entry.last_access);
                u64::try_from(age.num_seconds().max(0)).unwrap_or(0)
            })
            .unwrap_or(0);
        CacheStats {
            total_sessions: inner.entries.len(),
            memory_usage_kb: u64::try_from(inner.total_bytes.saturating_div(1024))
                .unwrap_or(u64::MAX),
            memory_limit_kb: self.memory_limit_kb,
            evictions: inner.evictions,
            hit_rate: inner.hit_rate(),
            total_accesses: inner.total_accesses,
            cache_hits: inner.cache_hits,
            last_eviction: inner.last_eviction,
            oldest_entry_age_secs,
        }
    }
}

/// Deterministic size estimate for a context.
///
/// Not byte-exact; monotonic in added content, which is what the
/// eviction bound needs.
pub fn estimate_context_size(context: &ConversationContext) -> usize {
    let mut size = BASE_CONTEXT_OVERHEAD
        .saturating_add(context.session_id.len())
        .saturating_add(context.user_id.len());

    for entry in &context.history {
        let response_len = serde_json::to_string(&entry.response)
            .map(|s| s.len())
            .unwrap_or(0);
        let metadata_len = entry
            .metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok())
            .map(|s| s.len())
            .unwrap_or(0);
        size = size
            .saturating_add(entry.query.len())
            .saturating_add(response_len)
            .saturating_add(metadata_len)
            .saturating_add(HISTORY_ENTRY_OVERHEAD);
    }

    for (name, reference) in &context.resolved_references {
        size = size
            .saturating_add(name.len())
            .saturating_add(reference.value.len())
            .saturating_add(reference.kind.len())
            .saturating_add(REFERENCE_OVERHEAD);
    }

    let enrichment_len = serde_json::to_string(&context.enrichment)
        .map(|s| s.len())
        .unwrap_or(0);
    size.saturating_add(enrichment_len.saturating_mul(2))
}
