//! Webhook payload and response definitions
//!
//! Only the parts of a GitHub push payload that decide whether the podcast
//! index changed are modelled; everything else is ignored.

use serde::{Deserialize, Serialize};

/// Header carrying the event name
pub const EVENT_HEADER: &str = "x-github-event";

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Event name used when the header is missing
pub const UNKNOWN_EVENT: &str = "unknown";

/// Substrings marking a changed path as podcast content
pub const PODCAST_PATTERNS: [&str; 6] = ["podcast", "pody", ".json", ".mp3", ".html", "gh-pages"];

/// Push event payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub commits: Vec<Commit>,
}

/// One commit of a push event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl PushPayload {
    /// Every added, modified or removed path, in commit order
    pub fn changed_files(&self) -> impl Iterator<Item = &str> {
        self.commits.iter().flat_map(|c| {
            c.added
                .iter()
                .chain(c.modified.iter())
                .chain(c.removed.iter())
                .map(String::as_str)
        })
    }

    /// Changed paths that look like podcast content
    pub fn podcast_files(&self) -> Vec<String> {
        self.changed_files()
            .filter(|f| is_podcast_file(f))
            .map(String::from)
            .collect()
    }
}

/// Whether a changed path is podcast content
pub fn is_podcast_file(path: &str) -> bool {
    PODCAST_PATTERNS.iter().any(|p| path.contains(p))
}

/// Response to a processed webhook
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
    pub cache_cleared: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub podcast_files_updated: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_refreshed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_refresh_error: Option<String>,
}

impl WebhookResponse {
    /// Response for an event whose cache clear succeeded
    pub fn processed(event: &str) -> Self {
        Self {
            success: true,
            message: format!("Webhook processed for event: {}", event),
            timestamp: chrono::Utc::now().to_rfc3339(),
            cache_cleared: true,
            podcast_files_updated: None,
            data_refreshed: None,
            data_refresh_error: None,
        }
    }
}
