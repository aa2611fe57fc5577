//! Upstream podcast index client

pub mod client;
pub mod errors;
pub mod types;

pub use client::IndexFetcher;
pub use errors::FetchError;
pub use types::PodcastIndex;
