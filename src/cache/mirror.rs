//! Local File Mirror
//!
//! Mirrors remote audio and transcript files to local disk on first use.
//! A file's existence on disk is the only record that it has been mirrored.
//! Concurrent downloads of the same asset are deduplicated through an
//! in-flight set guarded by a mutex.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::upstream::PodcastIndex;

/// Timeout for a single asset download
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of background downloads running at once
const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// URL prefix mirrored files are served under
pub const SERVED_PREFIX: &str = "/files";

/// Prefix and suffix of partially written files
const TEMP_PREFIX: &str = ".partial-";
const TEMP_SUFFIX: &str = ".tmp";

/// Kind of mirrored asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Audio,
    Transcript,
}

impl AssetClass {
    /// Directory under the mirror root (and under `/files`)
    pub fn dir_name(&self) -> &'static str {
        match self {
            AssetClass::Audio => "audio",
            AssetClass::Transcript => "transcripts",
        }
    }
}

/// (remote URL, local path) of a download
type DownloadKey = (String, PathBuf);

/// Marks a download as in flight for as long as it lives
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<DownloadKey>>,
    key: DownloadKey,
}

impl<'a> InFlightGuard<'a> {
    /// Mark `key`, or return None if it is already marked
    fn acquire(set: &'a Mutex<HashSet<DownloadKey>>, key: DownloadKey) -> Option<Self> {
        let mut downloading = lock(set);
        if !downloading.insert(key.clone()) {
            return None;
        }
        Some(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts of mirrored files
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorStats {
    pub audio_files: u64,
    pub transcript_files: u64,
    /// Total size of mirrored files in bytes
    pub total_size: u64,
    /// Downloads currently in flight
    pub downloading: usize,
}

/// On-demand mirror of remote podcast assets
pub struct FileMirror {
    /// Root directory for mirrored files
    root: PathBuf,
    /// Base URL relative asset paths are resolved against
    base_url: String,
    /// HTTP client for downloads
    http_client: Client,
    /// Downloads in flight
    downloading: Mutex<HashSet<DownloadKey>>,
    /// Bounds the number of concurrent background downloads
    download_slots: Semaphore,
}

impl FileMirror {
    /// Create a mirror rooted at `root`
    ///
    /// # Arguments
    /// * `root` - Directory to store mirrored files
    /// * `base_url` - Base URL for relative asset paths
    pub fn new(root: PathBuf, base_url: &str) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create mirror directory: {:?}", root))?;

        let http_client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let mirror = Self {
            root,
            base_url: base_url.to_string(),
            http_client,
            downloading: Mutex::new(HashSet::new()),
            download_slots: Semaphore::new(MAX_CONCURRENT_DOWNLOADS),
        };

        let removed = mirror.sweep_temp_files();
        info!(
            root = %mirror.root.display(),
            stale_temp_files = removed,
            "File mirror initialized"
        );

        Ok(mirror)
    }

    /// Get the mirror root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path a remote asset is mirrored to
    ///
    /// `<root>/<asset dir>/<parent segment>/<file name>`; None when the path
    /// is empty or has no usable file name.
    pub fn derive_local_path(&self, remote_path: &str, class: AssetClass) -> Option<PathBuf> {
        relative_asset_path(remote_path, class).map(|rel| self.root.join(rel))
    }

    /// Make sure the asset is present locally, downloading it if needed
    ///
    /// Returns true if the file is present after the call. Returns false if
    /// the download failed or another task is already downloading it.
    pub async fn ensure_local(&self, remote_url: &str, local_path: &Path, class: AssetClass) -> bool {
        if is_mirrored(local_path).await {
            return true;
        }

        let key = (remote_url.to_string(), local_path.to_path_buf());
        let Some(_guard) = InFlightGuard::acquire(&self.downloading, key) else {
            debug!(url = remote_url, "Download already in flight");
            return false;
        };

        // Another task may have finished it between the check and the mark
        if is_mirrored(local_path).await {
            return true;
        }

        match self.download(remote_url, local_path).await {
            Ok(size) => {
                info!(
                    class = class.dir_name(),
                    url = remote_url,
                    local = %local_path.display(),
                    size = size,
                    "Mirrored file"
                );
                true
            }
            Err(e) => {
                warn!(
                    class = class.dir_name(),
                    url = remote_url,
                    error = %e,
                    "Failed to mirror file"
                );
                false
            }
        }
    }

    /// Download `remote_url` to `local_path`, returning the byte count
    async fn download(&self, remote_url: &str, local_path: &Path) -> Result<u64> {
        let response = self
            .http_client
            .get(remote_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .context("Failed to request file")?;

        if response.status() != StatusCode::OK {
            return Err(anyhow!("Failed to download file ({})", response.status()));
        }

        let bytes = response
            .bytes()
            .await
            .context("Failed to read file content")?;

        let local_path = local_path.to_path_buf();
        tokio::task::spawn_blocking(move || store(&local_path, &bytes))
            .await
            .context("File write task failed")?
    }

    /// Point every entry at its served URL and queue missing downloads
    ///
    /// Does not wait for downloads. Returns the number queued.
    pub async fn annotate(self: &Arc<Self>, index: &mut PodcastIndex) -> usize {
        let mut queued = 0;

        for entry in index.entries_mut() {
            let id = entry.id();
            let assets = [
                (AssetClass::Audio, &entry.audio_path, &mut entry.local_audio_path),
                (
                    AssetClass::Transcript,
                    &entry.transcript_path,
                    &mut entry.local_transcript_path,
                ),
            ];

            for (class, remote, local_field) in assets {
                let Some(remote) = remote.as_deref().filter(|p| !p.trim().is_empty()) else {
                    continue;
                };
                let Some(local_path) = self.derive_local_path(remote, class) else {
                    debug!(podcast = ?id, path = remote, "Skipping unusable asset path");
                    continue;
                };

                let relative = local_path.strip_prefix(&self.root).unwrap_or(&local_path);
                *local_field = Some(served_url(relative));

                if is_mirrored(&local_path).await {
                    continue;
                }

                let remote_url = resolve_remote_url(&self.base_url, remote);
                let mirror = Arc::clone(self);
                tokio::spawn(async move {
                    let Ok(_permit) = mirror.download_slots.acquire().await else {
                        return;
                    };
                    mirror.ensure_local(&remote_url, &local_path, class).await;
                });
                queued += 1;
            }
        }

        if queued > 0 {
            info!(queued = queued, "Queued file downloads");
        }
        queued
    }

    /// Number of downloads in flight
    pub fn downloading(&self) -> usize {
        lock(&self.downloading).len()
    }

    /// Count mirrored files and their total size
    ///
    /// Walks the mirror directories; run off the async executor.
    pub fn stats(&self) -> MirrorStats {
        let mut stats = MirrorStats {
            downloading: self.downloading(),
            ..Default::default()
        };

        for class in [AssetClass::Audio, AssetClass::Transcript] {
            let mut files = Vec::new();
            collect_files(&self.root.join(class.dir_name()), &mut files);
            for (path, size) in files {
                if is_temp_file(&path) {
                    continue;
                }
                match class {
                    AssetClass::Audio => stats.audio_files += 1,
                    AssetClass::Transcript => stats.transcript_files += 1,
                }
                stats.total_size += size;
            }
        }

        stats
    }

    /// Remove temp files left by interrupted downloads
    fn sweep_temp_files(&self) -> usize {
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);

        let mut removed = 0;
        for (path, _) in files.into_iter().filter(|(p, _)| is_temp_file(p)) {
            debug!(path = %path.display(), "Removing stale temp file");
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

/// Path of an asset relative to the mirror root
///
/// The last segment of the remote path is the file name, the one before it
/// (if any) the subdirectory.
pub fn relative_asset_path(remote_path: &str, class: AssetClass) -> Option<PathBuf> {
    let remote_path = remote_path.trim();
    if remote_path.is_empty() {
        return None;
    }

    // Relative paths are parsed against a dummy origin; absolute URLs replace it
    let dummy = Url::parse("http://localhost/").ok()?;
    let parsed = dummy.join(remote_path).ok()?;

    let segments: Vec<String> = parsed
        .path_segments()?
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| s.to_string())
        })
        .collect();

    let filename = segments.last().filter(|s| is_safe_segment(s))?;
    let subdir = segments
        .len()
        .checked_sub(2)
        .map(|i| segments[i].as_str())
        .filter(|s| is_safe_segment(s));

    let mut path = PathBuf::from(class.dir_name());
    if let Some(subdir) = subdir {
        path.push(subdir);
    }
    path.push(filename);
    Some(path)
}

/// URL a mirrored file is served under, e.g. `/files/audio/ep1/ep1.mp3`
pub fn served_url(relative: &Path) -> String {
    let mut url = String::from(SERVED_PREFIX);
    for component in relative.iter() {
        url.push('/');
        url.push_str(&urlencoding::encode(&component.to_string_lossy()));
    }
    url
}

/// Absolute URL of a remote asset
///
/// `http(s)` URLs are kept; anything else is appended to the base URL.
pub fn resolve_remote_url(base_url: &str, remote_path: &str) -> String {
    let remote_path = remote_path.trim();
    if remote_path.starts_with("http://") || remote_path.starts_with("https://") {
        return remote_path.to_string();
    }

    let clean = remote_path.strip_prefix("./").unwrap_or(remote_path);
    let clean = clean.trim_start_matches('/');
    format!("{}/{}", base_url.trim_end_matches('/'), clean)
}

/// Whether a mirrored file is present; errors count as absent
async fn is_mirrored(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains('\\')
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| {
            let name = n.to_string_lossy();
            name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX)
        })
        .unwrap_or(false)
}

/// Write `data` to `local_path` atomically
///
/// The parent directory is created here rather than before the download;
/// an empty directory can be pruned by the janitor at any time.
fn store(local_path: &Path, data: &[u8]) -> Result<u64> {
    let parent = local_path
        .parent()
        .ok_or_else(|| anyhow!("Mirror path has no parent: {:?}", local_path))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create mirror subdirectory: {:?}", parent))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(parent)
        .context("Failed to create temp file for mirror")?;

    tmp.write_all(data).context("Failed to write mirror file")?;

    tmp.persist(local_path)
        .with_context(|| format!("Failed to persist mirror file: {:?}", local_path))?;

    Ok(data.len() as u64)
}

/// Recursively collect (path, size) of regular files under `dir`
fn collect_files(dir: &Path, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(read_dir) = fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        match entry.metadata() {
            Ok(meta) if meta.is_dir() => collect_files(&path, out),
            Ok(meta) if meta.is_file() => out.push((path, meta.len())),
            _ => {}
        }
    }
}
