//! Metadata API boundary.
//!
//! A thin client that turns HTTP failures into [`HuginnError`](crate::HuginnError)
//! kinds so the retry manager can treat them properly.

#[cfg(feature = "youtube-api")]
mod client;

#[cfg(feature = "youtube-api")]
pub use client::{VideoDetails, YouTubeClient};

/// Default base URL for the YouTube Data API.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Default daily quota, in units.
pub const DEFAULT_QUOTA_LIMIT: u64 = 10_000;
