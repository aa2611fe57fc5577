//! Storage Janitor
//!
//! Deletes old mirrored files once the mirror's filesystem fills up.
//! Age since creation is the only eviction signal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

/// Usage percentage above which `maybe_cleanup` deletes old files
pub const HIGH_WATER_PERCENT: f64 = 90.0;

/// Default maximum file age in days
pub const DEFAULT_MAX_AGE_DAYS: u64 = 30;

const SECS_PER_DAY: u64 = 86_400;

/// Disk usage of the filesystem holding the mirror
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

/// Age-based cleanup of the mirror directory
pub struct Janitor {
    /// Root directory to clean
    root: PathBuf,
}

impl Janitor {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Total/used/free bytes of the filesystem holding the root
    pub fn disk_usage(&self) -> io::Result<DiskUsage> {
        let stat = nix::sys::statvfs::statvfs(&self.root).map_err(io::Error::from)?;

        let fragment = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * fragment;
        let used = (stat.blocks() as u64).saturating_sub(stat.blocks_free() as u64) * fragment;
        let free = stat.blocks_available() as u64 * fragment;
        let usage_percent = if total > 0 {
            used as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(DiskUsage {
            total,
            used,
            free,
            usage_percent,
        })
    }

    /// Clean up with the default age if disk usage is above the high-water mark
    ///
    /// Returns the number of removed files, or None if no cleanup ran.
    pub fn maybe_cleanup(&self) -> Option<usize> {
        match self.disk_usage() {
            Ok(usage) => self.cleanup_if_full(&usage, SystemTime::now()),
            Err(e) => {
                warn!(error = %e, "Could not check disk usage");
                None
            }
        }
    }

    /// High-water decision for a given usage, as seen from `now`
    fn cleanup_if_full(&self, usage: &DiskUsage, now: SystemTime) -> Option<usize> {
        if usage.usage_percent <= HIGH_WATER_PERCENT {
            debug!(usage_percent = usage.usage_percent, "Disk usage below high-water mark");
            return None;
        }

        info!(
            usage_percent = format!("{:.1}%", usage.usage_percent),
            max_age_days = DEFAULT_MAX_AGE_DAYS,
            "Disk usage above high-water mark, cleaning up"
        );
        Some(self.cleanup_at(DEFAULT_MAX_AGE_DAYS, now))
    }

    /// Delete files older than `max_age_days`, then empty directories
    ///
    /// Returns the number of removed files.
    pub fn cleanup(&self, max_age_days: u64) -> usize {
        self.cleanup_at(max_age_days, SystemTime::now())
    }

    /// `cleanup` as seen from `now`
    fn cleanup_at(&self, max_age_days: u64, now: SystemTime) -> usize {
        let max_age = Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY));
        let mut removed = 0;

        let mut files = Vec::new();
        walk(&self.root, &mut files, &mut Vec::new());

        for path in files {
            let created = match fs::metadata(&path).and_then(|m| created_at(&m)) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not read file age");
                    continue;
                }
            };

            // Files from the future are age zero
            let age = now.duration_since(created).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), age_days = age.as_secs() / SECS_PER_DAY, "Removed old file");
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove old file");
                }
            }
        }

        let dirs_removed = self.remove_empty_dirs();
        info!(
            removed = removed,
            empty_dirs_removed = dirs_removed,
            max_age_days = max_age_days,
            "Cleanup finished"
        );
        removed
    }

    /// Remove directories below the root that are empty, deepest first
    fn remove_empty_dirs(&self) -> usize {
        let mut dirs = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut dirs);

        // Children were pushed after their parents
        let mut removed = 0;
        for dir in dirs.iter().rev() {
            let is_empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !is_empty {
                continue;
            }
            match fs::remove_dir(dir) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove empty directory"),
            }
        }
        removed
    }
}

/// Creation time, or modification time where the filesystem has no birth time
fn created_at(meta: &fs::Metadata) -> std::io::Result<SystemTime> {
    meta.created().or_else(|_| meta.modified())
}

/// Collect regular files and subdirectories below `dir`
fn walk(dir: &Path, files: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Could not read directory");
            return;
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => {
                dirs.push(path.clone());
                walk(&path, files, dirs);
            }
            Ok(t) if t.is_file() => files.push(path),
            _ => {}
        }
    }
}
