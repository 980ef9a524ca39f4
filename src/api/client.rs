//! YouTube Data API v3 client for video metadata.
//!
//! See: <https://developers.google.com/youtube/v3/docs/videos/list>

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{DEFAULT_BASE_URL, DEFAULT_QUOTA_LIMIT};
use crate::cache::DiskCache;
use crate::rate_limit::RateLimiter;
use crate::retry::{RetryManager, RetryPolicy};
use crate::telemetry;
use crate::version;
use crate::{HuginnError, Result};

/// Units charged for one `videos.list` call.
const VIDEOS_LIST_COST: u64 = 1;

/// Rate limited, retried and cached client for `videos.list`.
///
/// Quota is tracked locally: once the configured budget is spent, calls
/// fail with `QuotaExceeded` without reaching the API.
pub struct YouTubeClient {
    api_key: String,
    http: Client,
    base_url: String,
    cache: Arc<DiskCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryManager,
    quota_limit: u64,
    quota_used: AtomicU64,
}

impl YouTubeClient {
    pub fn new(
        api_key: impl Into<String>,
        cache: Arc<DiskCache>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, cache, limiter)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        cache: Arc<DiskCache>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(HuginnError::Configuration("API key is empty".into()));
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(version::user_agent())
            .build()
            .map_err(|e| HuginnError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
            limiter,
            retry: RetryManager::default(),
            quota_limit: DEFAULT_QUOTA_LIMIT,
            quota_used: AtomicU64::new(0),
        })
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryManager::new(policy);
        self
    }

    pub fn quota_limit(mut self, units: u64) -> Self {
        self.quota_limit = units;
        self
    }

    pub fn quota_used(&self) -> u64 {
        self.quota_used.load(Ordering::Relaxed)
    }

    pub fn quota_remaining(&self) -> u64 {
        self.quota_limit.saturating_sub(self.quota_used())
    }

    /// Start a new quota day.
    pub fn reset_quota(&self) {
        self.quota_used.store(0, Ordering::Relaxed);
    }

    /// Metadata for one video. Served from the cache when live.
    #[instrument(skip(self), fields(operation = "videos.list"))]
    pub async fn video_details(&self, video_id: &str) -> Result<VideoDetails> {
        let key = format!("api_video_{video_id}");
        if let Some(cached) = self.cache.get_as::<VideoDetails>(&key).await {
            debug!(video_id, "video details served from cache");
            return Ok(cached);
        }

        // A spent local budget will not recover within any backoff window.
        if self.quota_remaining() < VIDEOS_LIST_COST {
            return Err(self.quota_error());
        }

        self.limiter.acquire(1).await?;
        // Each attempt costs quota, so stop as soon as the budget cannot
        // pay for another one and hand back the last upstream error.
        let details = self
            .retry
            .execute_when(
                "videos.list",
                || self.fetch_video(video_id),
                |e| e.is_transient() && self.quota_remaining() >= VIDEOS_LIST_COST,
            )
            .await?;
        self.cache.set_serialized(&key, &details).await;
        Ok(details)
    }

    async fn fetch_video(&self, video_id: &str) -> Result<VideoDetails> {
        self.charge_quota(VIDEOS_LIST_COST)?;

        let url = format!("{}/videos", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("part", "snippet,contentDetails,statistics"),
                ("id", video_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                record_request("error");
                HuginnError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            record_request("error");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            let err = map_error(status.as_u16(), retry_after, &body);
            warn!(video_id, status = status.as_u16(), error = %err, "videos.list failed");
            return Err(err);
        }

        record_request("ok");
        let body: VideosResponse = response.json().await?;
        body.items
            .into_iter()
            .next()
            .map(VideoItem::into_details)
            .ok_or_else(|| HuginnError::NotFound(format!("video {video_id}")))
    }

    fn charge_quota(&self, units: u64) -> Result<()> {
        let limit = self.quota_limit;
        let charged = self
            .quota_used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                let next = used.checked_add(units)?;
                (next <= limit).then_some(next)
            });
        match charged {
            Ok(_) => {
                metrics::counter!(telemetry::API_QUOTA_UNITS_TOTAL).increment(units);
                Ok(())
            }
            Err(_) => Err(self.quota_error()),
        }
    }

    fn quota_error(&self) -> HuginnError {
        HuginnError::QuotaExceeded {
            message: format!(
                "local quota spent ({}/{} units)",
                self.quota_used(),
                self.quota_limit
            ),
            retry_after: None,
        }
    }
}

fn record_request(status: &'static str) {
    metrics::counter!(telemetry::API_REQUESTS_TOTAL,
        "operation" => "videos.list",
        "status" => status,
    )
    .increment(1);
}

/// Translate an error response into the error taxonomy.
pub(crate) fn map_error(status: u16, retry_after: Option<Duration>, body: &str) -> HuginnError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));
    let reasons: Vec<&str> = parsed
        .as_ref()
        .map(|e| e.error.errors.iter().map(|d| d.reason.as_str()).collect())
        .unwrap_or_default();
    let has_reason = |wanted: &[&str]| reasons.iter().any(|r| wanted.contains(r));

    match status {
        403 if has_reason(&["quotaExceeded", "dailyLimitExceeded"]) => {
            HuginnError::QuotaExceeded {
                message,
                retry_after,
            }
        }
        403 if has_reason(&["rateLimitExceeded", "userRateLimitExceeded"]) => {
            HuginnError::RateLimited { retry_after }
        }
        429 => HuginnError::RateLimited { retry_after },
        401 => HuginnError::AuthenticationFailed,
        403 => HuginnError::Forbidden(message),
        404 => HuginnError::NotFound(message),
        400 => HuginnError::InvalidInput(message),
        code => HuginnError::Api {
            status: code,
            message,
        },
    }
}

/// Video metadata returned by [`YouTubeClient::video_details`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDetails {
    pub id: String,
    pub title: String,
    pub description: String,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    /// RFC 3339 timestamp as returned by the API.
    pub published_at: Option<String>,
    /// ISO 8601 duration, e.g. `PT4M13S`.
    pub duration: Option<String>,
    pub tags: Vec<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
}

impl VideoDetails {
    /// `duration` in seconds, when it parses.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration.as_deref().and_then(parse_iso8601_duration)
    }
}

/// Parse the `PT#H#M#S` (optionally `P#DT...`) durations the API uses.
pub(crate) fn parse_iso8601_duration(s: &str) -> Option<u64> {
    let rest = s.strip_prefix('P')?;
    let (days, time) = match rest.split_once('T') {
        Some((d, t)) => (d, t),
        None => (rest, ""),
    };

    let mut total = 0u64;
    let mut number = String::new();
    for (part, units) in [(days, &[('D', 86_400u64)][..]), (time, &[('H', 3600), ('M', 60), ('S', 1)][..])] {
        for c in part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let (_, scale) = units.iter().find(|(u, _)| *u == c)?;
            let n: u64 = number.parse().ok()?;
            total = total.checked_add(n.checked_mul(*scale)?)?;
            number.clear();
        }
        if !number.is_empty() {
            return None;
        }
    }
    Some(total)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    id: String,
    #[serde(default)]
    snippet: Snippet,
    #[serde(default)]
    content_details: ContentDetails,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    channel_id: Option<String>,
    channel_title: Option<String>,
    published_at: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Default, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

/// Counts arrive as decimal strings.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
    like_count: Option<String>,
    comment_count: Option<String>,
}

impl VideoItem {
    fn into_details(self) -> VideoDetails {
        let count = |s: Option<String>| s.and_then(|v| v.parse().ok());
        VideoDetails {
            id: self.id,
            title: self.snippet.title,
            description: self.snippet.description,
            channel_id: self.snippet.channel_id,
            channel_title: self.snippet.channel_title,
            published_at: self.snippet.published_at,
            duration: self.content_details.duration,
            tags: self.snippet.tags,
            view_count: count(self.statistics.view_count),
            like_count: count(self.statistics.like_count),
            comment_count: count(self.statistics.comment_count),
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}
