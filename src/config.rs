//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. Explicit path (e.g. `--config <path>`)
//! 2. `~/.huginn/config.toml` (user)
//! 3. `/etc/huginn/config.toml` (system)
//! 4. Built-in defaults
//!
//! Environment variables override file values afterwards. The API key is
//! only ever read from the environment (`YOUTUBE_API_KEY`, then
//! `GOOGLE_API_KEY`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::api::{DEFAULT_BASE_URL, DEFAULT_QUOTA_LIMIT};
use crate::cache::{CacheConfig, default_cache_dir};
use crate::download::DownloaderConfig;
use crate::download::ytdlp::YtDlpConfig;
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;
use crate::{HuginnError, Result};

/// Environment variables holding the API key, in priority order.
const API_KEY_ENV_VARS: &[&str] = &["YOUTUBE_API_KEY", "GOOGLE_API_KEY"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HuginnConfig {
    pub cache: CacheSection,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub download: DownloadSection,
    pub api: ApiSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Default: `<user cache dir>/huginn`.
    pub directory: PathBuf,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub tokens_per_second: f64,
    pub bucket_size: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            tokens_per_second: 1.0,
            bucket_size: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter_fraction: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub directory: PathBuf,
    pub min_interval_secs: f64,
    /// `[min, max]` extra spacing in milliseconds. `[0, 0]` disables it.
    pub spacing_jitter_ms: [u64; 2],
    pub ytdlp_program: PathBuf,
    pub ytdlp_timeout_secs: u64,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("downloads"),
            min_interval_secs: 5.0,
            spacing_jitter_ms: [500, 2000],
            ytdlp_program: PathBuf::from("yt-dlp"),
            ytdlp_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub quota_limit: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            quota_limit: DEFAULT_QUOTA_LIMIT,
        }
    }
}

impl HuginnConfig {
    /// Load from the standard locations, then apply environment overrides.
    ///
    /// An explicit path that does not exist is an error; missing default
    /// locations just fall through to built-in defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_from(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            HuginnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            HuginnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(HuginnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".huginn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        let system_config = PathBuf::from("/etc/huginn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply `HUGINN_*` overrides read through `lookup`.
    ///
    /// Takes a lookup function rather than reading the process
    /// environment directly so callers (and tests) can supply their own.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("HUGINN_CACHE_DIR") {
            self.cache.directory = PathBuf::from(dir);
        }
        if let Some(v) = lookup("HUGINN_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("HUGINN_CACHE_TTL_SECS", &v)?;
        }
        if let Some(v) = lookup("HUGINN_RATE_LIMIT_TPS") {
            self.rate_limit.tokens_per_second = parse_env("HUGINN_RATE_LIMIT_TPS", &v)?;
        }
        if let Some(v) = lookup("HUGINN_RATE_LIMIT_BUCKET") {
            self.rate_limit.bucket_size = parse_env("HUGINN_RATE_LIMIT_BUCKET", &v)?;
        }
        if let Some(v) = lookup("HUGINN_MAX_RETRIES") {
            self.retry.max_retries = parse_env("HUGINN_MAX_RETRIES", &v)?;
        }
        if let Some(dir) = lookup("HUGINN_DOWNLOAD_DIR") {
            self.download.directory = PathBuf::from(dir);
        }
        if let Some(v) = lookup("HUGINN_MIN_DOWNLOAD_INTERVAL_SECS") {
            self.download.min_interval_secs = parse_env("HUGINN_MIN_DOWNLOAD_INTERVAL_SECS", &v)?;
        }
        Ok(())
    }

    /// API key from the environment, if any.
    pub fn api_key(&self) -> Option<String> {
        api_key_from(|name| std::env::var(name).ok())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(&self.cache.directory)
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .max_entries(self.cache.max_entries)
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new()
            .tokens_per_second(self.rate_limit.tokens_per_second)
            .bucket_size(self.rate_limit.bucket_size)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.retry.max_retries)
            .base_delay(Duration::from_millis(self.retry.base_delay_ms))
            .max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .exponential_base(self.retry.exponential_base)
            .jitter_fraction(self.retry.jitter_fraction)
    }

    /// Fails on a negative or non-finite `min_interval_secs`.
    pub fn downloader_config(&self) -> Result<DownloaderConfig> {
        let min_interval = Duration::try_from_secs_f64(self.download.min_interval_secs)
            .map_err(|e| {
                HuginnError::Configuration(format!(
                    "download.min_interval_secs = {}: {e}",
                    self.download.min_interval_secs
                ))
            })?;
        let [lo, hi] = self.download.spacing_jitter_ms;
        let spacing_jitter = (hi > 0).then(|| Duration::from_millis(lo)..Duration::from_millis(hi));
        Ok(DownloaderConfig {
            download_dir: self.download.directory.clone(),
            min_interval,
            spacing_jitter,
            retry: self.retry_policy(),
        })
    }

    pub fn ytdlp_config(&self) -> YtDlpConfig {
        YtDlpConfig::default()
            .program(&self.download.ytdlp_program)
            .timeout(Duration::from_secs(self.download.ytdlp_timeout_secs))
    }
}

/// First non-empty API key variable, by priority.
pub fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|key| !key.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        HuginnError::Configuration(format!("{name}={value:?} is not valid: {e}"))
    })
}
