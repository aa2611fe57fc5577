//! Service configuration
//!
//! Reads data sources, webhook secret, listen port and storage layout from
//! environment variables.

use anyhow::{anyhow, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Primary index location (GitHub Pages)
pub const DEFAULT_DATA_SOURCE: &str = "https://xinyiheng.github.io/newpody/podcast_index.json";

/// Fallback index location (raw branch content)
pub const DEFAULT_BACKUP_DATA_SOURCE: &str =
    "https://raw.githubusercontent.com/xinyiheng/newpody/gh-pages/podcast_index.json";

/// Base URL relative asset paths are resolved against
pub const DEFAULT_BASE_URL: &str = "https://xinyiheng.github.io/newpody";

/// Default index cache duration: 1 hour
const DEFAULT_CACHE_DURATION_SECS: u64 = 3600;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORAGE_PATH: &str = "/data";
const DEFAULT_PUBLIC_DIR: &str = "public";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Primary podcast index URL
    pub data_source: String,
    /// Backup podcast index URL, tried when the primary fails
    pub backup_data_source: String,
    /// Base URL for relative audio/transcript paths
    pub base_url: String,
    /// Shared secret for webhook signatures
    pub webhook_secret: Option<String>,
    /// Listen port
    pub port: u16,
    /// Root directory of mirrored files
    pub storage_root: PathBuf,
    /// Whether `storage_root` is the persistent volume
    pub persistent_storage: bool,
    /// Static front-end bundle
    pub public_dir: PathBuf,
    /// How long a fetched index is served from memory
    pub cache_duration: Duration,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("invalid PORT '{}': {}", raw, e))?,
            None => DEFAULT_PORT,
        };

        let cache_secs = match lookup("CACHE_DURATION_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| anyhow!("invalid CACHE_DURATION_SECS '{}': {}", raw, e))?,
            None => DEFAULT_CACHE_DURATION_SECS,
        };

        let persistent_storage = lookup("USE_PERSISTENT_STORAGE")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let storage_root = if persistent_storage {
            PathBuf::from(var("STORAGE_PATH", DEFAULT_STORAGE_PATH))
        } else {
            temporary_storage_root()
        };

        Ok(Self {
            data_source: var("DATA_SOURCE", DEFAULT_DATA_SOURCE),
            backup_data_source: var("BACKUP_DATA_SOURCE", DEFAULT_BACKUP_DATA_SOURCE),
            base_url: var("BASE_URL", DEFAULT_BASE_URL),
            webhook_secret: lookup("GITHUB_WEBHOOK_SECRET").filter(|s| !s.is_empty()),
            port,
            storage_root,
            persistent_storage,
            public_dir: PathBuf::from(var("PUBLIC_DIR", DEFAULT_PUBLIC_DIR)),
            cache_duration: Duration::from_secs(cache_secs),
        })
    }

    /// Address the HTTP server binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

/// Mirror root used when no persistent volume is configured
fn temporary_storage_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("podcast-relay")
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
