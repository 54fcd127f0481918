//! Tagged key-value cache used by the DAOs.
//!
//! Entries can expire after a fixed lifetime or, with sliding expiration,
//! after a period without reads. Tags group entries so that a write can
//! evict every entry derived from a table at once.

use entimap_storage::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Options for [`Cache::save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Tags the entry can be cleaned by.
    pub tags: Vec<String>,
    /// Lifetime (`None` = until evicted).
    pub ttl: Option<Duration>,
    /// Whether reads extend the lifetime.
    pub sliding: bool,
}

impl SaveOptions {
    /// Creates options with no tags and no expiry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets the lifetime.
    #[must_use]
    pub const fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets sliding expiration.
    #[must_use]
    pub const fn sliding(mut self, sliding: bool) -> Self {
        self.sliding = sliding;
        self
    }
}

/// A cache shared by every DAO of an entity manager.
pub trait Cache: Send + Sync {
    /// Returns the live value stored under `key`.
    fn load(&self, key: &str) -> Option<Value>;

    /// Stores a value, replacing any previous entry.
    fn save(&self, key: &str, value: Value, options: SaveOptions);

    /// Removes one entry.
    fn remove(&self, key: &str);

    /// Removes every entry carrying at least one of `tags`.
    fn clean(&self, tags: &[String]);

    /// Removes every entry.
    fn clean_all(&self);
}

struct CacheEntry {
    value: Value,
    tags: Vec<String>,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
    sliding: bool,
}

/// Deadline `ttl` after `now`; a lifetime past the clock's range never expires.
fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local [`Cache`] implementation.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns `true` if a live entry exists, without touching its lifetime
    /// or the counters.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }

    /// Returns the number of successful loads.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of loads that found nothing.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Cache for MemoryCache {
    fn load(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let live = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                if entry.sliding {
                    entry.expires_at = deadline(now, entry.ttl);
                }
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        };
        let counter = if live.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        live
    }

    fn save(&self, key: &str, value: Value, options: SaveOptions) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            expires_at: deadline(now, options.ttl),
            ttl: options.ttl,
            tags: options.tags,
            sliding: options.sliding,
        };
        let mut entries = self.entries.lock();
        entries.retain(|_, e| !e.is_expired(now));
        entries.insert(key.to_string(), entry);
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clean(&self, tags: &[String]) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| {
            !entry.is_expired(now) && !entry.tags.iter().any(|t| tags.contains(t))
        });
        trace!(?tags, evicted = before - entries.len(), "cache clean");
    }

    fn clean_all(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
