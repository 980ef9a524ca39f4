//! Huginn - resilience layer for YouTube metadata and media retrieval
//!
//! Upstream APIs are metered and retrieval mechanisms break without
//! warning. This crate puts four pieces between callers and the network:
//!
//! - [`DiskCache`]: durable TTL cache, one JSON file per key.
//! - [`RateLimiter`]: token bucket with lazy refill.
//! - [`RetryManager`]: exponential backoff with error-sensitive multipliers.
//! - [`Downloader`]: ordered fallback across [`DownloadStrategy`]s, with
//!   spacing between downloads and aggregate statistics.
//!
//! # Download Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huginn::{CacheConfig, DiskCache, DownloadOptions, Downloader, RateLimitConfig, RateLimiter};
//! use huginn::download::ytdlp::{self, YtDlpConfig};
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let cache = Arc::new(DiskCache::open(CacheConfig::new("/tmp/huginn")).await);
//!     let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default())?);
//!
//!     let downloader = Downloader::builder(cache, limiter)
//!         .strategies(ytdlp::default_strategies(YtDlpConfig::default()))
//!         .build()?;
//!
//!     let result = downloader
//!         .download("https://youtu.be/dQw4w9WgXcQ", &DownloadOptions::default())
//!         .await;
//!     match result.file_path {
//!         Some(path) => println!("saved to {}", path.display()),
//!         None => eprintln!("{}", result.error_message.unwrap_or_default()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Metadata Example (requires `youtube-api` feature)
//!
//! ```rust,ignore
//! let client = YouTubeClient::new(api_key, cache, limiter)?;
//! let details = client.video_details("dQw4w9WgXcQ").await?;
//! println!("{} ({:?}s)", details.title, details.duration_secs());
//! ```

pub mod api;
pub mod cache;
#[cfg(feature = "config")]
pub mod config;
pub mod download;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod telemetry;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheEntry, CacheStats, DiskCache};
pub use download::{
    CleanupReport, DownloadAttemptRecord, DownloadFormat, DownloadOptions, DownloadQuality,
    DownloadResult, DownloadStrategy, Downloader, DownloaderBuilder, DownloaderConfig,
    DownloaderStats, FormatInfo, MediaMetadata, RetrievedMedia, StatsSnapshot,
    extract_resource_id,
};
pub use error::{ErrorKind, HuginnError, Result};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{RetryManager, RetryPolicy};

#[cfg(feature = "youtube-api")]
pub use api::{VideoDetails, YouTubeClient};

#[cfg(feature = "config")]
pub use config::HuginnConfig;
