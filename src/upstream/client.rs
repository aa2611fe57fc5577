//! Podcast Index Client
//!
//! Fetches the podcast index JSON from the primary source and falls back to
//! the backup source when the primary fails.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::errors::FetchError;
use super::types::PodcastIndex;

/// Timeout for regular index fetches
pub const INDEX_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the eager refresh triggered by webhooks
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the upstream index sources
#[derive(Clone)]
pub struct IndexFetcher {
    /// HTTP client for making requests
    http_client: Client,
    /// Primary index URL
    primary: String,
    /// Backup index URL
    backup: String,
}

impl IndexFetcher {
    /// Create a fetcher for the given primary and backup sources
    pub fn new(primary: &str, backup: &str) -> Result<Self> {
        let http_client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            primary: primary.to_string(),
            backup: backup.to_string(),
        })
    }

    /// Primary source URL
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Backup source URL
    pub fn backup(&self) -> &str {
        &self.backup
    }

    /// Fetch the index, trying the primary then the backup source
    ///
    /// Returns None when both sources failed; each failure is logged.
    pub async fn fetch_with_fallback(&self) -> Option<PodcastIndex> {
        match self.fetch(&self.primary, INDEX_TIMEOUT).await {
            Ok(index) => return Some(index),
            Err(e) => {
                warn!(source = %self.primary, error = %e, "Primary data source failed");
            }
        }

        match self.fetch(&self.backup, INDEX_TIMEOUT).await {
            Ok(index) => {
                info!(source = %self.backup, "Served index from backup data source");
                Some(index)
            }
            Err(e) => {
                warn!(source = %self.backup, error = %e, "Backup data source failed");
                None
            }
        }
    }

    /// Fetch the index from the primary source only
    pub async fn fetch_primary(&self, timeout: Duration) -> Result<PodcastIndex, FetchError> {
        self.fetch(&self.primary, timeout).await
    }

    /// Fetch and parse the index from one URL
    ///
    /// Only a 200 response counts as success.
    pub async fn fetch(&self, url: &str, timeout: Duration) -> Result<PodcastIndex, FetchError> {
        debug!(url = url, "Fetching podcast index");

        let response = self
            .http_client
            .get(url)
            .timeout(timeout)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let index: PodcastIndex = serde_json::from_slice(&body)?;

        info!(url = url, podcasts = index.len(), "Fetched podcast index");
        Ok(index)
    }
}
