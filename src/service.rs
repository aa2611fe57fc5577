//! Podcast Service
//!
//! Owns the index cache, upstream fetcher, file mirror and janitor, and is
//! shared by every request handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::{CachedIndex, FileMirror, IndexCache, Janitor};
use crate::config::Config;
use crate::error::AppError;
use crate::upstream::{FetchError, IndexFetcher, PodcastIndex};

/// Result of a forced refresh
#[derive(Debug, Clone, Copy)]
pub struct RefreshOutcome {
    /// Episodes in the new index
    pub podcasts: usize,
    /// Downloads started by annotation
    pub downloads_queued: usize,
}

/// Application context passed to handlers
pub struct PodcastService {
    fetcher: IndexFetcher,
    cache: IndexCache,
    mirror: Arc<FileMirror>,
    janitor: Arc<Janitor>,
}

impl PodcastService {
    /// Build the service from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let fetcher = IndexFetcher::new(&config.data_source, &config.backup_data_source)?;
        let mirror = FileMirror::new(config.storage_root.clone(), &config.base_url)
            .context("Failed to initialize file mirror")?;

        Ok(Self {
            fetcher,
            cache: IndexCache::with_ttl(config.cache_duration),
            mirror: Arc::new(mirror),
            janitor: Arc::new(Janitor::new(config.storage_root.clone())),
        })
    }

    pub fn mirror(&self) -> &Arc<FileMirror> {
        &self.mirror
    }

    pub fn janitor(&self) -> &Arc<Janitor> {
        &self.janitor
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Get the annotated index, from cache when fresh
    pub async fn get_index(&self) -> Result<Arc<PodcastIndex>, AppError> {
        if let Some(cached) = self.cache.get() {
            return Ok(cached.index);
        }

        let (cached, _) = self.fetch_and_store().await?;
        Ok(cached.index)
    }

    /// Drop the cached index and fetch it again
    pub async fn refresh(&self) -> Result<RefreshOutcome, AppError> {
        self.invalidate();
        let (cached, downloads_queued) = self.fetch_and_store().await?;
        Ok(RefreshOutcome {
            podcasts: cached.index.len(),
            downloads_queued,
        })
    }

    /// Clear the cached index
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Whether a fresh index is cached
    pub fn is_cached(&self) -> bool {
        self.cache.is_populated()
    }

    /// When the cached index was fetched, if one is cached
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.cache.fetched_at()
    }

    /// Refetch from the primary source only and repopulate the cache
    pub async fn refresh_from_primary(&self, timeout: Duration) -> Result<usize, FetchError> {
        let index = self.fetcher.fetch_primary(timeout).await?;
        let (cached, _) = self.store(index).await;
        Ok(cached.index.len())
    }

    /// Primary and backup source URLs
    pub fn sources(&self) -> (&str, &str) {
        (self.fetcher.primary(), self.fetcher.backup())
    }

    async fn fetch_and_store(&self) -> Result<(CachedIndex, usize), AppError> {
        let index = self
            .fetcher
            .fetch_with_fallback()
            .await
            .ok_or(AppError::UpstreamUnavailable)?;
        Ok(self.store(index).await)
    }

    /// Run the janitor, annotate and cache the index
    async fn store(&self, mut index: PodcastIndex) -> (CachedIndex, usize) {
        let janitor = Arc::clone(&self.janitor);
        match tokio::task::spawn_blocking(move || janitor.maybe_cleanup()).await {
            Ok(Some(removed)) => info!(removed = removed, "Janitor freed disk space"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Janitor task failed"),
        }

        let queued = self.mirror.annotate(&mut index).await;
        let cached = self.cache.insert(index);
        debug!(
            podcasts = cached.index.len(),
            downloads_queued = queued,
            "Index refreshed"
        );
        (cached, queued)
    }
}
