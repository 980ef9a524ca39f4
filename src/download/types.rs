//! Request and result types for the download orchestrator.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest description kept in [`MediaMetadata`].
const DESCRIPTION_LIMIT: usize = 500;

/// Named format selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadFormat {
    Best,
    BestVideo,
    BestAudio,
    Mp4Max720,
    Mp4Max1080,
    Mp3Audio,
    WebmVideo,
}

impl DownloadFormat {
    pub fn selector(self) -> &'static str {
        match self {
            DownloadFormat::Best => "best",
            DownloadFormat::BestVideo => "bestvideo",
            DownloadFormat::BestAudio => "bestaudio",
            DownloadFormat::Mp4Max720 => "best[ext=mp4][height<=720]",
            DownloadFormat::Mp4Max1080 => "best[ext=mp4][height<=1080]",
            DownloadFormat::Mp3Audio => "bestaudio[ext=m4a]/bestaudio/best",
            DownloadFormat::WebmVideo => "best[ext=webm]",
        }
    }
}

/// Quality presets. When set, a preset overrides the format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadQuality {
    Highest,
    High,
    Medium,
    Low,
    AudioOnly,
}

impl DownloadQuality {
    pub fn selector(self) -> &'static str {
        match self {
            DownloadQuality::Highest => "best",
            DownloadQuality::High => "best[height<=1080]",
            DownloadQuality::Medium => "best[height<=720]",
            DownloadQuality::Low => "best[height<=480]",
            DownloadQuality::AudioOnly => "bestaudio",
        }
    }
}

/// Per-call download options.
///
/// ```rust
/// # use huginn::{DownloadOptions, DownloadQuality};
/// let options = DownloadOptions::default()
///     .quality(DownloadQuality::Medium)
///     .subtitles(true);
/// assert_eq!(options.format_selector(), "best[height<=720]/best/worst");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Raw format selector. Default: `best`.
    pub format: String,
    pub quality: Option<DownloadQuality>,
    pub include_subtitles: bool,
    pub include_thumbnail: bool,
    /// Write an info JSON next to the artifact. Default: true.
    pub include_metadata: bool,
    /// Overrides the orchestrator's download directory.
    pub output_directory: Option<PathBuf>,
    /// Output template. Default: `%(title)s-%(id)s.%(ext)s`.
    pub filename_template: Option<String>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: DownloadFormat::Best.selector().to_string(),
            quality: None,
            include_subtitles: false,
            include_thumbnail: false,
            include_metadata: true,
            output_directory: None,
            filename_template: None,
        }
    }
}

impl DownloadOptions {
    pub const DEFAULT_TEMPLATE: &'static str = "%(title)s-%(id)s.%(ext)s";

    pub fn format(mut self, format: DownloadFormat) -> Self {
        self.format = format.selector().to_string();
        self
    }

    pub fn format_selector_raw(mut self, selector: impl Into<String>) -> Self {
        self.format = selector.into();
        self
    }

    pub fn quality(mut self, quality: DownloadQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn subtitles(mut self, enabled: bool) -> Self {
        self.include_subtitles = enabled;
        self
    }

    pub fn thumbnail(mut self, enabled: bool) -> Self {
        self.include_thumbnail = enabled;
        self
    }

    pub fn metadata(mut self, enabled: bool) -> Self {
        self.include_metadata = enabled;
        self
    }

    pub fn output_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    pub fn filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = Some(template.into());
        self
    }

    /// Effective selector. Height-restricted selectors fall back to any
    /// available format so restricted videos still download something.
    pub fn format_selector(&self) -> String {
        let base: &str = match self.quality {
            Some(quality) => quality.selector(),
            None => &self.format,
        };
        if base.contains("height") {
            format!("{base}/best/worst")
        } else {
            base.to_string()
        }
    }

    pub fn template(&self) -> &str {
        self.filename_template
            .as_deref()
            .unwrap_or(Self::DEFAULT_TEMPLATE)
    }
}

/// What a strategy hands back on success.
///
/// A value without `file_path` is not a usable artifact; the orchestrator
/// records it as a failed attempt.
#[derive(Debug, Clone, Default)]
pub struct RetrievedMedia {
    pub file_path: Option<PathBuf>,
    /// Extractor info document (title, duration, formats, ...).
    pub info: Value,
}

impl RetrievedMedia {
    pub fn new(file_path: impl Into<PathBuf>, info: Value) -> Self {
        Self {
            file_path: Some(file_path.into()),
            info,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.info.get("title").and_then(Value::as_str)
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.info.get("duration").and_then(Value::as_f64)
    }

    pub fn format(&self) -> Option<&str> {
        self.info.get("format").and_then(Value::as_str)
    }
}

/// Descriptive metadata carried in a [`DownloadResult`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    /// First 500 characters of the description.
    pub description: String,
}

impl MediaMetadata {
    pub fn from_info(info: &Value) -> Self {
        let text = |k: &str| info.get(k).and_then(Value::as_str).map(str::to_string);
        let count = |k: &str| info.get(k).and_then(Value::as_u64);
        Self {
            uploader: text("uploader"),
            upload_date: text("upload_date"),
            view_count: count("view_count"),
            like_count: count("like_count"),
            description: info
                .get("description")
                .and_then(Value::as_str)
                .map(|d| d.chars().take(DESCRIPTION_LIMIT).collect())
                .unwrap_or_default(),
        }
    }
}

/// One strategy attempt within a `download` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadAttemptRecord {
    pub strategy_name: String,
    pub started_at: DateTime<Utc>,
    pub succeeded: bool,
    pub error_message: Option<String>,
}

/// Outcome of [`crate::Downloader::download`]. Failures are reported here,
/// never as `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub success: bool,
    pub resource_id: String,
    pub title: String,
    pub file_path: Option<PathBuf>,
    pub artifact_size: Option<u64>,
    pub duration_secs: Option<f64>,
    pub format: Option<String>,
    #[serde(with = "duration_secs_f64")]
    pub elapsed: Duration,
    pub strategy_used: Option<String>,
    pub attempts: Vec<DownloadAttemptRecord>,
    pub error_message: Option<String>,
    pub metadata: Option<MediaMetadata>,
}

impl DownloadResult {
    pub(crate) fn failed(
        resource_id: &str,
        title: String,
        elapsed: Duration,
        attempts: Vec<DownloadAttemptRecord>,
        error_message: String,
    ) -> Self {
        Self {
            success: false,
            resource_id: resource_id.to_string(),
            title,
            file_path: None,
            artifact_size: None,
            duration_secs: None,
            format: None,
            elapsed,
            strategy_used: None,
            attempts,
            error_message: Some(error_message),
            metadata: None,
        }
    }
}

/// A single entry of [`crate::Downloader::available_formats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub quality: Option<f64>,
}

impl FormatInfo {
    /// Extract the `formats` array of an info document.
    pub fn list_from_info(info: &Value) -> Vec<FormatInfo> {
        let Some(formats) = info.get("formats").and_then(Value::as_array) else {
            return Vec::new();
        };
        formats
            .iter()
            .map(|f| {
                let text = |k: &str| f.get(k).and_then(Value::as_str).map(str::to_string);
                FormatInfo {
                    format_id: text("format_id"),
                    ext: text("ext"),
                    resolution: text("resolution"),
                    fps: f.get("fps").and_then(Value::as_f64),
                    vcodec: text("vcodec"),
                    acodec: text("acodec"),
                    filesize: f.get("filesize").and_then(Value::as_u64),
                    quality: f.get("quality").and_then(Value::as_f64),
                }
            })
            .collect()
    }
}

/// A file removed by [`crate::Downloader::cleanup_downloads`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Summary of a cleanup pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: Vec<DeletedFile>,
    pub bytes_freed: u64,
}

impl CleanupReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

pub(crate) mod duration_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quality_overrides_format() {
        let options = DownloadOptions::default()
            .format(DownloadFormat::WebmVideo)
            .quality(DownloadQuality::AudioOnly);
        assert_eq!(options.format_selector(), "bestaudio");
    }

    #[test]
    fn height_selectors_get_fallback() {
        let options = DownloadOptions::default().format(DownloadFormat::Mp4Max720);
        assert_eq!(
            options.format_selector(),
            "best[ext=mp4][height<=720]/best/worst"
        );
        assert_eq!(DownloadOptions::default().format_selector(), "best");
    }

    #[test]
    fn metadata_truncates_description() {
        let long = "x".repeat(2_000);
        let meta = MediaMetadata::from_info(&json!({
            "uploader": "someone",
            "view_count": 42,
            "description": long,
        }));
        assert_eq!(meta.uploader.as_deref(), Some("someone"));
        assert_eq!(meta.view_count, Some(42));
        assert_eq!(meta.description.chars().count(), 500);
    }

    #[test]
    fn formats_are_cleaned() {
        let info = json!({"formats": [
            {"format_id": "18", "ext": "mp4", "resolution": "640x360", "fps": 30, "url": "https://..."},
            {"format_id": "140", "ext": "m4a", "acodec": "mp4a.40.2"}
        ]});
        let formats = FormatInfo::list_from_info(&info);
        assert_eq!(formats.len(), 2);
        assert_eq!(formats[0].format_id.as_deref(), Some("18"));
        assert_eq!(formats[0].fps, Some(30.0));
        assert_eq!(formats[1].acodec.as_deref(), Some("mp4a.40.2"));
        assert!(FormatInfo::list_from_info(&json!({})).is_empty());
    }
}
