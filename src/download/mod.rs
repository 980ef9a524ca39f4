//! Download orchestration: strategies, fallback and bookkeeping.

mod orchestrator;
mod resource_id;
mod stats;
mod strategy;
mod types;
pub mod ytdlp;

pub use orchestrator::{Downloader, DownloaderBuilder, DownloaderConfig};
pub use resource_id::{extract_resource_id, is_video_id};
pub use stats::{DownloaderStats, StatsSnapshot};
pub use strategy::DownloadStrategy;
pub use types::{
    CleanupReport, DeletedFile, DownloadAttemptRecord, DownloadFormat, DownloadOptions,
    DownloadQuality, DownloadResult, FormatInfo, MediaMetadata, RetrievedMedia,
};
