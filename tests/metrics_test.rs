//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use tempfile::TempDir;

use huginn::telemetry;
use huginn::{
    CacheConfig, DiskCache, DownloadOptions, DownloadStrategy, Downloader, HuginnError,
    RateLimitConfig, RateLimiter, Result, RetrievedMedia, RetryManager, RetryPolicy,
};

// ============================================================================
// Mock strategies
// ============================================================================

struct WritingStrategy;

#[async_trait]
impl DownloadStrategy for WritingStrategy {
    fn name(&self) -> &str {
        "writer"
    }

    async fn attempt(
        &self,
        resource_id: &str,
        options: &DownloadOptions,
    ) -> Result<Option<RetrievedMedia>> {
        let dir = options.output_directory.clone().unwrap();
        let path = dir.join(format!("{resource_id}.mp4"));
        std::fs::write(&path, b"data")?;
        Ok(Some(RetrievedMedia::new(path, json!({"title": "t"}))))
    }
}

struct GoneStrategy;

#[async_trait]
impl DownloadStrategy for GoneStrategy {
    fn name(&self) -> &str {
        "gone"
    }

    async fn attempt(&self, _: &str, _: &DownloadOptions) -> Result<Option<RetrievedMedia>> {
        Err(HuginnError::NotFound("Video unavailable".into()))
    }
}

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name and, optionally, one label.
fn counter_total(snapshot: &SnapshotVec, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| match label {
            Some((k, v)) => key.key().labels().any(|l| l.key() == k && l.value() == v),
            None => true,
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn downloader(dir: &TempDir, strategies: Vec<Arc<dyn DownloadStrategy>>) -> Downloader {
    Downloader::builder(
        Arc::new(DiskCache::memory_only(CacheConfig::default())),
        Arc::new(RateLimiter::new(RateLimitConfig::new().bucket_size(100)).unwrap()),
    )
    .strategies(strategies)
    .download_dir(dir.path())
    .min_interval(Duration::ZERO)
    .spacing_jitter(None)
    .retry(RetryPolicy::disabled())
    .build()
    .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn download_records_strategy_and_outcome_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let dir = TempDir::new().unwrap();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let strategies: Vec<Arc<dyn DownloadStrategy>> =
                    vec![Arc::new(GoneStrategy), Arc::new(WritingStrategy)];
                let downloader = downloader(&dir, strategies);
                downloader.download("dQw4w9WgXcQ", &DownloadOptions::default()).await
            })
        })
    });
    assert!(result.success);

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::DOWNLOADS_TOTAL, None), 1);
    assert_eq!(
        counter_total(&snapshot, telemetry::DOWNLOADS_TOTAL, Some(("strategy", "writer"))),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::STRATEGY_ATTEMPTS_TOTAL, Some(("status", "error"))),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::STRATEGY_ATTEMPTS_TOTAL, Some(("status", "ok"))),
        1
    );
    assert!(
        has_histogram(&snapshot, telemetry::DOWNLOAD_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn total_failure_is_labelled_none() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let dir = TempDir::new().unwrap();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let strategies: Vec<Arc<dyn DownloadStrategy>> = vec![Arc::new(GoneStrategy)];
                let downloader = downloader(&dir, strategies);
                downloader.download("dQw4w9WgXcQ", &DownloadOptions::default()).await
            })
        })
    });
    assert!(!result.success);

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::DOWNLOADS_TOTAL, Some(("strategy", "none"))),
        1
    );
    assert_eq!(
        counter_total(&snapshot, telemetry::DOWNLOADS_TOTAL, Some(("status", "error"))),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_records_hits_and_misses() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let cache = DiskCache::memory_only(CacheConfig::default());
                assert!(cache.get("absent").await.is_none());
                cache.set("present", json!(1)).await;
                assert!(cache.get("present").await.is_some());
                assert!(cache.get("present").await.is_some());
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL, None), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL, None), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_are_counted_per_operation() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    let calls = AtomicU32::new(0);

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let manager = RetryManager::new(
                    RetryPolicy::new()
                        .max_retries(5)
                        .base_delay(Duration::ZERO),
                );
                manager
                    .execute_named("flaky", || async {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(HuginnError::Http("reset".into()))
                        } else {
                            Ok(())
                        }
                    })
                    .await
            })
        })
    });
    assert!(result.is_ok());

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_total(&snapshot, telemetry::RETRIES_TOTAL, Some(("operation", "flaky"))),
        2
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let dir = TempDir::new().unwrap();
    let strategies: Vec<Arc<dyn DownloadStrategy>> = vec![Arc::new(WritingStrategy)];
    let downloader = downloader(&dir, strategies);
    let result = downloader
        .download("dQw4w9WgXcQ", &DownloadOptions::default())
        .await;
    assert!(result.success);
}
