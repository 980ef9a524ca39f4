//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `strategy`: download strategy name (e.g. "Direct Download", "iOS Client")
//! - `operation`: what was being attempted (e.g. "download", "probe", "videos.list")
//! - `status`: outcome: "ok" or "error"

/// Total `download()` calls through the orchestrator.
///
/// Labels: `strategy` ("none" on total failure), `status` ("ok" | "error").
pub const DOWNLOADS_TOTAL: &str = "huginn_downloads_total";

/// End-to-end download duration in seconds, including rate limiting.
///
/// Labels: `status`.
pub const DOWNLOAD_DURATION_SECONDS: &str = "huginn_download_duration_seconds";

/// Individual strategy attempts.
///
/// Labels: `strategy`, `status`.
pub const STRATEGY_ATTEMPTS_TOTAL: &str = "huginn_strategy_attempts_total";

/// Total retry attempts (not counting the initial attempt).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Time spent waiting for rate-limiter tokens, in seconds.
pub const RATE_LIMIT_WAIT_SECONDS: &str = "huginn_rate_limit_wait_seconds";

/// Total cache hits.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Total cache misses (absent, expired, or unreadable).
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Durable cache writes that failed and left only the in-memory copy.
pub const CACHE_PERSIST_FAILURES_TOTAL: &str = "huginn_cache_persist_failures_total";

/// Metadata API requests.
///
/// Labels: `operation`, `status`.
pub const API_REQUESTS_TOTAL: &str = "huginn_api_requests_total";

/// Metadata API quota units consumed.
pub const API_QUOTA_UNITS_TOTAL: &str = "huginn_api_quota_units_total";
