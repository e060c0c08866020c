//! Schema summary cache with TTL-based expiration.
//!
//! Keyed by credential fingerprint, so two sessions pointing at the same database
//! with the same login share one entry and plaintext credentials are never keys.

use crate::database::SchemaSummary;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with TTL.
#[derive(Clone)]
struct CacheEntry<T> {
    value: T,
    created_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache of rendered-ready schema summaries.
pub struct SchemaCache {
    summaries: DashMap<String, CacheEntry<Arc<SchemaSummary>>>,
    default_ttl: Duration,
}

impl SchemaCache {
    /// Create a new schema cache with the specified TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            summaries: DashMap::new(),
            default_ttl: ttl,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<SchemaSummary>> {
        if let Some(entry) = self.summaries.get(fingerprint) {
            if !entry.is_expired() {
                debug!("Schema cache hit");
                return Some(Arc::clone(&entry.value));
            }
            drop(entry);
            self.summaries.remove(fingerprint);
        }
        None
    }

    pub fn insert(&self, fingerprint: &str, summary: Arc<SchemaSummary>) {
        debug!(tables = summary.tables.len(), "Caching schema summary");
        self.summaries.insert(
            fingerprint.to_string(),
            CacheEntry::new(summary, self.default_ttl),
        );
    }

    pub fn invalidate(&self, fingerprint: &str) {
        self.summaries.remove(fingerprint);
    }

    /// Clear all cache entries.
    pub fn clear(&self) {
        self.summaries.clear();
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    /// Remove expired entries.
    pub fn cleanup(&self) {
        self.summaries.retain(|_, v| !v.is_expired());
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
