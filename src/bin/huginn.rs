//! huginn command-line front end.
//!
//! Wires the cache, rate limiter and download orchestrator together from
//! configuration. Results are printed to stdout as JSON; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use huginn::download::ytdlp;
use huginn::{
    DiskCache, DownloadOptions, DownloadQuality, Downloader, HuginnConfig, HuginnError,
    RateLimiter,
};

/// Resilient YouTube metadata and media retrieval.
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::version::PKG_VERSION)]
#[command(about = "Cached, rate limited, retried YouTube retrieval")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a video through the strategy fallback chain
    Download {
        /// Video URL or ID
        resource: String,
        /// Quality preset
        #[arg(short, long, value_enum)]
        quality: Option<Quality>,
        /// Raw format selector (ignored when --quality is set)
        #[arg(short, long)]
        format: Option<String>,
        /// Also fetch English subtitles
        #[arg(long)]
        subtitles: bool,
        /// Override the download directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the info document for a video without downloading it
    Info {
        /// Video URL or ID
        resource: String,
    },

    /// List the formats a video is offered in
    Formats {
        /// Video URL or ID
        resource: String,
    },

    /// Fetch metadata from the YouTube Data API (needs YOUTUBE_API_KEY)
    #[cfg(feature = "youtube-api")]
    Details {
        /// Video URL or ID
        resource: String,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Delete downloads older than a cut-off
    Cleanup {
        /// Age threshold in hours
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Entry count, size and location
    Stats,
    /// Remove expired entries
    Sweep,
    /// Remove every entry
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum Quality {
    Highest,
    High,
    Medium,
    Low,
    AudioOnly,
}

impl From<Quality> for DownloadQuality {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Highest => DownloadQuality::Highest,
            Quality::High => DownloadQuality::High,
            Quality::Medium => DownloadQuality::Medium,
            Quality::Low => DownloadQuality::Low,
            Quality::AudioOnly => DownloadQuality::AudioOnly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huginn=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = HuginnConfig::load(args.config.as_deref())?;
    info!(version = %huginn::version::version_string(), "huginn starting");

    let cache = Arc::new(DiskCache::open(config.cache_config()).await);
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_config())?);

    match args.command {
        Command::Download {
            resource,
            quality,
            format,
            subtitles,
            output,
        } => {
            let downloader = build_downloader(&config, cache, limiter)?;
            let mut options = DownloadOptions::default().subtitles(subtitles);
            if let Some(format) = format {
                options = options.format_selector_raw(format);
            }
            if let Some(quality) = quality {
                options = options.quality(quality.into());
            }
            if let Some(dir) = output {
                options = options.output_directory(dir);
            }
            let result = downloader.download(&resource, &options).await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Info { resource } => {
            let downloader = build_downloader(&config, cache, limiter)?;
            print_json(&downloader.video_info(&resource).await?)?;
        }
        Command::Formats { resource } => {
            let downloader = build_downloader(&config, cache, limiter)?;
            print_json(&downloader.available_formats(&resource).await?)?;
        }
        #[cfg(feature = "youtube-api")]
        Command::Details { resource } => {
            let api_key = config.api_key().ok_or_else(|| {
                HuginnError::Configuration("set YOUTUBE_API_KEY or GOOGLE_API_KEY".into())
            })?;
            let client = huginn::YouTubeClient::with_base_url(
                api_key,
                config.api.base_url.clone(),
                cache,
                limiter,
            )?
            .retry_policy(config.retry_policy())
            .quota_limit(config.api.quota_limit);
            let id = huginn::extract_resource_id(&resource)?;
            print_json(&client.video_details(&id).await?)?;
        }
        Command::Cache { action } => match action {
            CacheAction::Stats => print_json(&cache.stats().await)?,
            CacheAction::Sweep => {
                let purged = cache.clear_expired().await;
                print_json(&serde_json::json!({ "purged": purged }))?;
            }
            CacheAction::Clear => {
                cache.clear_all().await;
                print_json(&serde_json::json!({ "cleared": true }))?;
            }
        },
        Command::Cleanup { older_than_hours } => {
            let downloader = build_downloader(&config, cache, limiter)?;
            let older_than = Duration::from_secs(older_than_hours.saturating_mul(3600));
            print_json(&downloader.cleanup_downloads(older_than).await?)?;
        }
    }

    Ok(())
}

fn build_downloader(
    config: &HuginnConfig,
    cache: Arc<DiskCache>,
    limiter: Arc<RateLimiter>,
) -> Result<Downloader, HuginnError> {
    Downloader::builder(cache, limiter)
        .config(config.downloader_config()?)
        .strategies(ytdlp::default_strategies(config.ytdlp_config()))
        .build()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), HuginnError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
