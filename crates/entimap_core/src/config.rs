//! Entity manager configuration.

use std::time::Duration;

/// Configuration for an entity manager and the DAOs it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum rows per multi-row insert during flush (0 = one statement
    /// per entity type).
    pub insert_batch_size: usize,

    /// Whether flush suspends foreign key checks for its write phase.
    pub toggle_foreign_key_checks: bool,

    /// Lifetime of first-level (entity) cache entries (`None` = no expiry).
    pub entity_cache_ttl: Option<Duration>,

    /// Whether reading an entity cache entry extends its lifetime.
    pub entity_cache_sliding: bool,

    /// Whether id lists of list queries are cached.
    pub query_cache: bool,

    /// Lifetime of second-level (query) cache entries.
    pub query_cache_ttl: Option<Duration>,

    /// Smallest identity handed out by table sequences.
    pub min_identity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            insert_batch_size: 0,
            toggle_foreign_key_checks: true,
            entity_cache_ttl: Some(Duration::from_secs(20 * 60)),
            entity_cache_sliding: true,
            query_cache: true,
            query_cache_ttl: Some(Duration::from_secs(5 * 60)),
            min_identity: 1,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum rows per multi-row insert.
    #[must_use]
    pub const fn insert_batch_size(mut self, size: usize) -> Self {
        self.insert_batch_size = size;
        self
    }

    /// Sets whether flush suspends foreign key checks.
    #[must_use]
    pub const fn toggle_foreign_key_checks(mut self, value: bool) -> Self {
        self.toggle_foreign_key_checks = value;
        self
    }

    /// Sets the entity cache lifetime.
    #[must_use]
    pub const fn entity_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entity_cache_ttl = ttl;
        self
    }

    /// Sets whether entity cache reads extend entry lifetime.
    #[must_use]
    pub const fn entity_cache_sliding(mut self, value: bool) -> Self {
        self.entity_cache_sliding = value;
        self
    }

    /// Enables or disables the query cache.
    #[must_use]
    pub const fn query_cache(mut self, value: bool) -> Self {
        self.query_cache = value;
        self
    }

    /// Sets the query cache lifetime.
    #[must_use]
    pub const fn query_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.query_cache_ttl = ttl;
        self
    }

    /// Sets the smallest identity handed out by sequences.
    #[must_use]
    pub const fn min_identity(mut self, id: u64) -> Self {
        self.min_identity = id;
        self
    }
}
