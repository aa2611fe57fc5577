//! Podcast Index Cache
//!
//! Single-entry cache for the annotated podcast index using Moka.
//! The entry expires after the configured duration and is replaced as a whole.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tracing::{debug, trace};

use crate::upstream::PodcastIndex;

/// Key of the one cached index
const INDEX_KEY: &str = "podcast_index";

/// A fetched and annotated index
#[derive(Clone, Debug)]
pub struct CachedIndex {
    /// The annotated index
    pub index: Arc<PodcastIndex>,
    /// When the index was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Index cache with TTL support
pub struct IndexCache {
    cache: Cache<&'static str, CachedIndex>,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl IndexCache {
    /// Create a cache whose entry lives for `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .name("podcast_index_cache")
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the cached index if present and fresh
    pub fn get(&self) -> Option<CachedIndex> {
        match self.cache.get(&INDEX_KEY) {
            Some(cached) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Cache HIT for podcast index");
                Some(cached)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Cache MISS for podcast index");
                None
            }
        }
    }

    /// Replace the cached index
    pub fn insert(&self, index: PodcastIndex) -> CachedIndex {
        let cached = CachedIndex {
            index: Arc::new(index),
            fetched_at: Utc::now(),
        };
        self.cache.insert(INDEX_KEY, cached.clone());
        debug!(podcasts = cached.index.len(), "Cached podcast index");
        cached
    }

    /// Drop the cached index so the next read refetches
    pub fn clear(&self) {
        self.cache.invalidate(&INDEX_KEY);
        debug!("Cleared podcast index cache");
    }

    /// Whether a fresh index is cached (does not count as a read)
    pub fn is_populated(&self) -> bool {
        self.cache.contains_key(&INDEX_KEY)
    }

    /// When the cached index was fetched (does not count as a read)
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.cache.get(&INDEX_KEY).map(|cached| cached.fetched_at)
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
