//! Caching layer
//!
//! In-memory cache of the podcast index, the on-disk mirror of its media
//! files, and the janitor that keeps the mirror's disk usage in check.

pub mod index;
pub mod janitor;
pub mod mirror;

pub use index::{CachedIndex, IndexCache};
pub use janitor::Janitor;
pub use mirror::{AssetClass, FileMirror};
