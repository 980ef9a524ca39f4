//! Ordered-fallback download orchestrator.
//!
//! ```text
//! download(id)
//!     │
//!     ├─ cache: download_meta_{id}      (title hint only)
//!     ├─ limiter.acquire(1)
//!     ├─ spacing gate                   (min_interval since the last download)
//!     │
//!     ├─ strategy[0] ── retry ──► Some(media with file) ──► success, cache, stats
//!     │      │ error / None / no file
//!     ├─ strategy[1] ── retry ──► ...
//!     │      ...
//!     └─ all failed ──► DownloadResult { success: false, error_message: every strategy }
//! ```
//!
//! Each strategy is attempted at most once per call. Transient errors are
//! retried inside that single attempt by the [`RetryManager`]; once the
//! retry budget is spent, or on any permanent error, the next strategy runs.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::resource_id::extract_resource_id;
use super::stats::{DownloaderStats, StatsSnapshot};
use super::strategy::DownloadStrategy;
use super::types::{
    CleanupReport, DeletedFile, DownloadAttemptRecord, DownloadOptions, DownloadResult,
    FormatInfo, MediaMetadata, RetrievedMedia,
};
use crate::cache::DiskCache;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryManager, RetryPolicy};
use crate::telemetry;
use crate::{HuginnError, Result};

const UNKNOWN_TITLE: &str = "Unknown";

/// Orchestrator settings that are not collaborators.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Where artifacts land unless the call overrides it. Default: `downloads`.
    pub download_dir: PathBuf,
    /// Minimum time between the starts of two downloads. Default: 5s.
    pub min_interval: Duration,
    /// Extra random wait added when the spacing gate has to sleep.
    /// Default: 0.5s..2s. `None` disables it.
    pub spacing_jitter: Option<Range<Duration>>,
    /// Retry policy applied inside each strategy.
    pub retry: RetryPolicy,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            min_interval: Duration::from_secs(5),
            spacing_jitter: Some(Duration::from_millis(500)..Duration::from_millis(2000)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Builder for [`Downloader`].
///
/// Strategies are tried in the order they are added.
///
/// ```rust,ignore
/// let downloader = Downloader::builder(cache, limiter)
///     .strategies(ytdlp::default_strategies(YtDlpConfig::default()))
///     .min_interval(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct DownloaderBuilder {
    cache: Arc<DiskCache>,
    limiter: Arc<RateLimiter>,
    strategies: Vec<Arc<dyn DownloadStrategy>>,
    stats: Option<Arc<DownloaderStats>>,
    config: DownloaderConfig,
}

impl DownloaderBuilder {
    /// Append a strategy (lowest priority so far).
    pub fn strategy(mut self, strategy: Arc<dyn DownloadStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Append several strategies, keeping their order.
    pub fn strategies(
        mut self,
        strategies: impl IntoIterator<Item = Arc<dyn DownloadStrategy>>,
    ) -> Self {
        self.strategies.extend(strategies);
        self
    }

    /// Share a stats sink. Default: a fresh one per orchestrator.
    pub fn stats(mut self, stats: Arc<DownloaderStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn config(mut self, config: DownloaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.config.min_interval = interval;
        self
    }

    pub fn spacing_jitter(mut self, jitter: Option<Range<Duration>>) -> Self {
        self.config.spacing_jitter = jitter;
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    /// Fails if no strategy was added.
    pub fn build(self) -> Result<Downloader> {
        if self.strategies.is_empty() {
            return Err(HuginnError::Configuration(
                "downloader needs at least one strategy".into(),
            ));
        }
        Ok(Downloader {
            retry: RetryManager::new(self.config.retry.clone()),
            strategies: self.strategies,
            cache: self.cache,
            limiter: self.limiter,
            stats: self.stats.unwrap_or_default(),
            config: self.config,
            last_download: Mutex::new(None),
        })
    }
}

/// Ordered-fallback downloader over a list of [`DownloadStrategy`]s.
pub struct Downloader {
    strategies: Vec<Arc<dyn DownloadStrategy>>,
    cache: Arc<DiskCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryManager,
    stats: Arc<DownloaderStats>,
    config: DownloaderConfig,
    /// Start of the previous download. Held across the spacing sleep so
    /// concurrent callers queue behind each other.
    last_download: Mutex<Option<Instant>>,
}

impl Downloader {
    pub fn builder(cache: Arc<DiskCache>, limiter: Arc<RateLimiter>) -> DownloaderBuilder {
        DownloaderBuilder {
            cache,
            limiter,
            strategies: Vec::new(),
            stats: None,
            config: DownloaderConfig::default(),
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Download a resource (video ID or URL).
    ///
    /// Never returns `Err`: every failure, including a malformed ID, is
    /// reported through [`DownloadResult::error_message`].
    #[instrument(skip(self, options), fields(operation = "download"))]
    pub async fn download(&self, resource: &str, options: &DownloadOptions) -> DownloadResult {
        let start = Instant::now();

        let resource_id = match extract_resource_id(resource) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "rejected download request");
                return DownloadResult::failed(
                    resource,
                    UNKNOWN_TITLE.to_string(),
                    start.elapsed(),
                    Vec::new(),
                    e.to_string(),
                );
            }
        };

        let meta_key = meta_cache_key(&resource_id);
        let cached_title = self
            .cache
            .get(&meta_key)
            .await
            .and_then(|v| v.get("title").and_then(Value::as_str).map(str::to_string));

        if let Err(e) = self.limiter.acquire(1).await {
            // Only reachable with a misconfigured limiter.
            error!(error = %e, "rate limiter rejected download");
            return DownloadResult::failed(
                &resource_id,
                cached_title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                start.elapsed(),
                Vec::new(),
                e.to_string(),
            );
        }
        self.wait_for_spacing().await;

        self.stats.record_attempt();

        let options = &self.resolve_options(options).await;
        let mut attempts = Vec::with_capacity(self.strategies.len());
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            let name = strategy.name();
            let started_at = Utc::now();
            info!(strategy = name, resource_id = %resource_id, "attempting strategy");

            let strategy_ref: &dyn DownloadStrategy = strategy.as_ref();
            let id = resource_id.as_str();
            let outcome = self
                .retry
                .execute_named(name, move || strategy_ref.attempt(id, options))
                .await;

            let failure = match outcome {
                Ok(Some(media)) if media.file_path.is_some() => {
                    attempts.push(attempt_record(name, started_at, None));
                    metrics::counter!(telemetry::STRATEGY_ATTEMPTS_TOTAL,
                        "strategy" => name.to_owned(),
                        "status" => "ok",
                    )
                    .increment(1);
                    info!(strategy = name, "strategy succeeded");
                    return self
                        .finish_success(resource_id, cached_title, media, name, attempts, start)
                        .await;
                }
                Ok(Some(_)) => format!("Strategy '{name}' returned no file"),
                Ok(None) => format!("Strategy '{name}' returned no data"),
                Err(e) => format!("Strategy '{name}' failed: {e}"),
            };

            warn!(strategy = name, "{failure}");
            metrics::counter!(telemetry::STRATEGY_ATTEMPTS_TOTAL,
                "strategy" => name.to_owned(),
                "status" => "error",
            )
            .increment(1);
            attempts.push(attempt_record(name, started_at, Some(failure.clone())));
            failures.push(failure);
        }

        self.stats.record_failure();
        let elapsed = start.elapsed();
        record_download("none", "error", elapsed);

        let message = format!(
            "All {} download strategies failed for video {resource_id}. Details: {}",
            self.strategies.len(),
            failures.join("; ")
        );
        error!(resource_id = %resource_id, "{message}");

        DownloadResult::failed(
            &resource_id,
            cached_title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            elapsed,
            attempts,
            message,
        )
    }

    async fn finish_success(
        &self,
        resource_id: String,
        cached_title: Option<String>,
        media: RetrievedMedia,
        strategy: &str,
        attempts: Vec<DownloadAttemptRecord>,
        start: Instant,
    ) -> DownloadResult {
        let artifact_size = match &media.file_path {
            Some(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            None => None,
        };
        let elapsed = start.elapsed();

        let title = media
            .title()
            .map(str::to_string)
            .or(cached_title)
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

        let result = DownloadResult {
            success: true,
            resource_id,
            title,
            artifact_size,
            duration_secs: media.duration_secs(),
            format: media.format().map(str::to_string),
            metadata: Some(MediaMetadata::from_info(&media.info)),
            file_path: media.file_path,
            elapsed,
            strategy_used: Some(strategy.to_string()),
            attempts,
            error_message: None,
        };

        self.stats.record_success(artifact_size, elapsed);
        record_download(strategy, "ok", elapsed);
        self.cache
            .set_serialized(&meta_cache_key(&result.resource_id), &result)
            .await;

        info!(
            resource_id = %result.resource_id,
            strategy,
            bytes = artifact_size.unwrap_or(0),
            elapsed_ms = elapsed.as_millis() as u64,
            "download complete"
        );
        result
    }

    /// Fill in the download directory and make sure it exists.
    async fn resolve_options(&self, options: &DownloadOptions) -> DownloadOptions {
        let mut resolved = options.clone();
        let dir = resolved
            .output_directory
            .get_or_insert_with(|| self.config.download_dir.clone());
        if let Err(e) = tokio::fs::create_dir_all(&*dir).await {
            warn!(directory = %dir.display(), error = %e, "could not create download directory");
        }
        resolved
    }

    /// Sleep until `min_interval` has passed since the previous download
    /// started, plus jitter when a wait was needed.
    async fn wait_for_spacing(&self) {
        let mut last = self.last_download.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.config.min_interval {
                let wait = self.config.min_interval - elapsed + self.spacing_jitter();
                info!(wait_ms = wait.as_millis() as u64, "spacing downloads");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn spacing_jitter(&self) -> Duration {
        match &self.config.spacing_jitter {
            Some(range) if range.start < range.end => {
                rand::thread_rng().gen_range(range.clone())
            }
            Some(range) => range.start,
            None => Duration::ZERO,
        }
    }

    // ========================================================================
    // Read-only queries
    // ========================================================================

    /// Info document for a resource, without downloading it.
    ///
    /// Served from the cache (`info_{id}`) when live. Otherwise each
    /// strategy's `probe` is tried in order and the first answer is cached.
    #[instrument(skip(self), fields(operation = "video_info"))]
    pub async fn video_info(&self, resource: &str) -> Result<Value> {
        let resource_id = extract_resource_id(resource)?;
        let key = info_cache_key(&resource_id);
        if let Some(cached) = self.cache.get(&key).await {
            debug!(resource_id = %resource_id, "video info served from cache");
            return Ok(cached);
        }

        self.limiter.acquire(1).await?;

        let mut failures = Vec::with_capacity(self.strategies.len());
        for strategy in &self.strategies {
            let name = strategy.name();
            let strategy_ref: &dyn DownloadStrategy = strategy.as_ref();
            let id = resource_id.as_str();
            match self
                .retry
                .execute_named(name, move || strategy_ref.probe(id))
                .await
            {
                Ok(info) => {
                    self.cache.set(&key, info.clone()).await;
                    return Ok(info);
                }
                Err(HuginnError::Unsupported) => {
                    debug!(strategy = name, "strategy cannot probe, skipping");
                    failures.push(format!("Strategy '{name}' does not support probing"));
                }
                Err(e) => {
                    warn!(strategy = name, error = %e, "probe failed");
                    failures.push(format!("Strategy '{name}' failed: {e}"));
                }
            }
        }

        Err(HuginnError::AllStrategiesFailed {
            resource_id,
            message: failures.join("; "),
        })
    }

    /// Formats offered for a resource, reduced to the interesting fields.
    pub async fn available_formats(&self, resource: &str) -> Result<Vec<FormatInfo>> {
        let info = self.video_info(resource).await?;
        Ok(FormatInfo::list_from_info(&info))
    }

    /// Delete files under the download directory whose modification time
    /// is older than `older_than`. Files that cannot be removed are logged
    /// and skipped.
    #[instrument(skip(self), fields(operation = "cleanup"))]
    pub async fn cleanup_downloads(&self, older_than: Duration) -> Result<CleanupReport> {
        let cutoff = SystemTime::now()
            .checked_sub(older_than)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut report = CleanupReport::default();

        let root = &self.config.download_dir;
        if !tokio::fs::try_exists(root).await? {
            return Ok(report);
        }

        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = match entry.metadata().await {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!(path = %entry.path().display(), error = %e, "could not stat file");
                        continue;
                    }
                };
                if meta.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                let Ok(modified) = meta.modified() else {
                    continue;
                };
                if modified >= cutoff {
                    continue;
                }
                let path = entry.path();
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "could not delete download");
                    continue;
                }
                report.bytes_freed += meta.len();
                report.deleted.push(DeletedFile {
                    path,
                    size: meta.len(),
                    modified_at: DateTime::<Utc>::from(modified),
                });
            }
        }

        info!(
            files = report.deleted_count(),
            bytes = report.bytes_freed,
            "cleaned up downloads"
        );
        Ok(report)
    }
}

fn meta_cache_key(resource_id: &str) -> String {
    format!("download_meta_{resource_id}")
}

fn info_cache_key(resource_id: &str) -> String {
    format!("info_{resource_id}")
}

fn attempt_record(
    strategy: &str,
    started_at: DateTime<Utc>,
    error_message: Option<String>,
) -> DownloadAttemptRecord {
    DownloadAttemptRecord {
        strategy_name: strategy.to_string(),
        started_at,
        succeeded: error_message.is_none(),
        error_message,
    }
}

fn record_download(strategy: &str, status: &'static str, elapsed: Duration) {
    metrics::counter!(telemetry::DOWNLOADS_TOTAL,
        "strategy" => strategy.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::DOWNLOAD_DURATION_SECONDS, "status" => status)
        .record(elapsed.as_secs_f64());
}
