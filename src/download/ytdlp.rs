//! Strategies that drive the `yt-dlp` executable.
//!
//! Each [`YtDlpStrategy`] runs the same program with a different client
//! persona. The program prints its info document as JSON on stdout
//! (`--dump-json --no-simulate`), from which the artifact path is read.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use super::strategy::DownloadStrategy;
use super::types::{DownloadOptions, RetrievedMedia};
use crate::{HuginnError, Result};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
];

const DEFAULT_BROWSERS: &[&str] = &["firefox", "chrome", "chromium", "edge", "safari"];

/// Client identity presented to the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persona {
    /// Default web client, skipping HLS/DASH manifests.
    Direct,
    Ios,
    /// Web client with the most permissive format selector.
    SimplifiedWeb,
    Android,
    /// Cookies borrowed from a local browser profile.
    BrowserCookies,
}

impl Persona {
    /// Fallback order used by [`default_strategies`].
    pub const ALL: [Persona; 5] = [
        Persona::Direct,
        Persona::Ios,
        Persona::SimplifiedWeb,
        Persona::Android,
        Persona::BrowserCookies,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Persona::Direct => "Direct Download",
            Persona::Ios => "iOS Client",
            Persona::SimplifiedWeb => "Simplified Web Client",
            Persona::Android => "Android Client",
            Persona::BrowserCookies => "Browser Cookies",
        }
    }

    fn extractor_args(self) -> Option<&'static str> {
        match self {
            Persona::Direct => Some("youtube:skip=hls,dash;player_skip=js"),
            Persona::Ios => Some("youtube:player_client=ios"),
            Persona::SimplifiedWeb => Some("youtube:player_client=web"),
            Persona::Android => Some("youtube:player_client=android"),
            Persona::BrowserCookies => None,
        }
    }
}

/// How to run `yt-dlp`.
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Executable name or path. Default: `yt-dlp`.
    pub program: PathBuf,
    /// Kill the process after this long. Default: 10 minutes.
    pub timeout: Duration,
    /// Socket timeout passed to the program. Default: 30s.
    pub socket_timeout: Duration,
    /// Browsers tried, in order, by the cookie persona.
    pub browsers: Vec<String>,
    /// Browser cookie stores are rarely readable on Linux servers, so the
    /// cookie persona reports "no data" there unless this is set.
    pub cookies_on_linux: bool,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            timeout: Duration::from_secs(600),
            socket_timeout: Duration::from_secs(30),
            browsers: DEFAULT_BROWSERS.iter().map(|b| b.to_string()).collect(),
            cookies_on_linux: false,
        }
    }
}

impl YtDlpConfig {
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn browsers(mut self, browsers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.browsers = browsers.into_iter().map(Into::into).collect();
        self
    }

    pub fn cookies_on_linux(mut self, enabled: bool) -> Self {
        self.cookies_on_linux = enabled;
        self
    }
}

/// The five personas, in fallback order, sharing one config.
pub fn default_strategies(config: YtDlpConfig) -> Vec<Arc<dyn DownloadStrategy>> {
    let config = Arc::new(config);
    Persona::ALL
        .into_iter()
        .map(|persona| {
            Arc::new(YtDlpStrategy::with_shared(persona, config.clone())) as Arc<dyn DownloadStrategy>
        })
        .collect()
}

/// A [`DownloadStrategy`] backed by one `yt-dlp` persona.
#[derive(Debug, Clone)]
pub struct YtDlpStrategy {
    persona: Persona,
    config: Arc<YtDlpConfig>,
}

impl YtDlpStrategy {
    pub fn new(persona: Persona, config: YtDlpConfig) -> Self {
        Self::with_shared(persona, Arc::new(config))
    }

    fn with_shared(persona: Persona, config: Arc<YtDlpConfig>) -> Self {
        Self { persona, config }
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    fn cookies_disabled(&self) -> bool {
        self.persona == Persona::BrowserCookies
            && cfg!(target_os = "linux")
            && !self.config.cookies_on_linux
    }

    /// Arguments for a download run, minus any `--cookies-from-browser`.
    pub fn download_args(&self, resource_id: &str, options: &DownloadOptions) -> Vec<String> {
        let dir = options
            .output_directory
            .as_deref()
            .unwrap_or_else(|| Path::new("."));
        let format = if self.persona == Persona::SimplifiedWeb {
            "best/worst".to_string()
        } else {
            options.format_selector()
        };

        let mut args: Vec<String> = vec![
            "--dump-json".into(),
            "--no-simulate".into(),
            "--no-progress".into(),
            "--no-warnings".into(),
            "--no-check-certificates".into(),
            "--socket-timeout".into(),
            self.config.socket_timeout.as_secs().to_string(),
            "--retries".into(),
            "10".into(),
            "--fragment-retries".into(),
            "10".into(),
            "--user-agent".into(),
            random_user_agent().into(),
            "-f".into(),
            format,
            "-o".into(),
            dir.join(options.template()).to_string_lossy().into_owned(),
        ];
        if options.include_subtitles {
            args.extend(["--write-subs", "--write-auto-subs", "--sub-langs", "en"].map(String::from));
        }
        if options.include_thumbnail {
            args.push("--write-thumbnail".into());
        }
        if options.include_metadata {
            args.push("--write-info-json".into());
        }
        self.push_persona_args(&mut args);
        args.push(watch_url(resource_id));
        args
    }

    /// Arguments for an info-only run.
    pub fn probe_args(&self, resource_id: &str) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--dump-json".into(),
            "--skip-download".into(),
            "--no-warnings".into(),
            "--user-agent".into(),
            random_user_agent().into(),
        ];
        self.push_persona_args(&mut args);
        args.push(watch_url(resource_id));
        args
    }

    fn push_persona_args(&self, args: &mut Vec<String>) {
        if let Some(extractor) = self.persona.extractor_args() {
            args.push("--extractor-args".into());
            args.push(extractor.into());
        }
    }

    async fn run(&self, args: &[String]) -> Result<Value> {
        debug!(strategy = self.persona.name(), program = %self.config.program.display(), "spawning yt-dlp");
        let mut command = Command::new(&self.config.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HuginnError::Configuration(format!(
                    "{} not found: {e}",
                    self.config.program.display()
                )));
            }
            Ok(Err(e)) => return Err(e.into()),
            // Strategy, not Timeout: a hung run is not retried.
            Err(_) => {
                return Err(HuginnError::Strategy {
                    strategy: self.persona.name().to_string(),
                    message: format!("yt-dlp did not finish within {:?}", self.config.timeout),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(
                self.persona.name(),
                &stderr,
                &output.status.to_string(),
            ));
        }
        parse_info_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl DownloadStrategy for YtDlpStrategy {
    fn name(&self) -> &str {
        self.persona.name()
    }

    async fn attempt(
        &self,
        resource_id: &str,
        options: &DownloadOptions,
    ) -> Result<Option<RetrievedMedia>> {
        if self.cookies_disabled() {
            debug!("skipping browser cookies on linux");
            return Ok(None);
        }

        let args = self.download_args(resource_id, options);
        if self.persona != Persona::BrowserCookies {
            let info = self.run(&args).await?;
            return Ok(Some(media_from_info(info)));
        }

        // Try each browser's cookie store until one works.
        let mut last_err = None;
        for browser in &self.config.browsers {
            let mut with_cookies = args.clone();
            let url = with_cookies.pop().unwrap_or_default();
            with_cookies.extend(["--cookies-from-browser".to_string(), browser.clone(), url]);
            match self.run(&with_cookies).await {
                Ok(info) => {
                    info!(browser = %browser, "download succeeded with browser cookies");
                    return Ok(Some(media_from_info(info)));
                }
                Err(e) => {
                    debug!(browser = %browser, error = %e, "browser cookies failed");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn probe(&self, resource_id: &str) -> Result<Value> {
        if self.persona == Persona::BrowserCookies {
            return Err(HuginnError::Unsupported);
        }
        self.run(&self.probe_args(resource_id)).await
    }
}

fn watch_url(resource_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={resource_id}")
}

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Parse the info document from yt-dlp's stdout.
///
/// With `--dump-json` each processed video is one JSON line; the last
/// object line wins.
pub fn parse_info_output(stdout: &str) -> Result<Value> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<Value>(line).ok())
        .ok_or_else(|| HuginnError::Strategy {
            strategy: "yt-dlp".into(),
            message: "no JSON info document on stdout".into(),
        })
}

/// Path of the downloaded artifact: `requested_downloads[0].filepath`,
/// falling back to `filename` and then `_filename`.
pub fn artifact_path(info: &Value) -> Option<PathBuf> {
    info.get("requested_downloads")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("filepath"))
        .or_else(|| info.get("filename"))
        .or_else(|| info.get("_filename"))
        .and_then(Value::as_str)
        .map(PathBuf::from)
}

fn media_from_info(info: Value) -> RetrievedMedia {
    RetrievedMedia {
        file_path: artifact_path(&info),
        info,
    }
}

/// Map a non-zero exit to an error kind using yt-dlp's stderr.
pub fn classify_failure(strategy: &str, stderr: &str, status: &str) -> HuginnError {
    let lower = stderr.to_ascii_lowercase();
    let detail = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or(status)
        .to_string();

    if lower.contains("private video") || lower.contains("members-only") {
        HuginnError::Forbidden(detail)
    } else if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("does not exist")
    {
        HuginnError::NotFound(detail)
    } else if lower.contains("http error 429") || lower.contains("too many requests") {
        HuginnError::RateLimited { retry_after: None }
    } else if is_network_failure(&lower) {
        HuginnError::Http(detail)
    } else {
        HuginnError::Strategy {
            strategy: strategy.to_string(),
            message: detail,
        }
    }
}

/// Stderr shapes that point at the connection rather than the extractor.
const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "connection reset",
    "connection refused",
    "connection aborted",
    "temporary failure in name resolution",
    "network is unreachable",
    "remote end closed connection",
];

fn is_network_failure(lower: &str) -> bool {
    NETWORK_MARKERS.iter().any(|m| lower.contains(m)) || has_server_error_status(lower)
}

/// `HTTP Error 5xx` anywhere in the text.
fn has_server_error_status(lower: &str) -> bool {
    lower.match_indices("http error ").any(|(i, m)| {
        lower.as_bytes()[i + m.len()..]
            .get(..3)
            .is_some_and(|code| code[0] == b'5' && code.iter().all(u8::is_ascii_digit))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_order_matches_personas() {
        let names: Vec<String> = default_strategies(YtDlpConfig::default())
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "Direct Download",
                "iOS Client",
                "Simplified Web Client",
                "Android Client",
                "Browser Cookies"
            ]
        );
    }

    #[test]
    fn download_args_carry_persona_and_url() {
        let s = YtDlpStrategy::new(Persona::Ios, YtDlpConfig::default());
        let options = DownloadOptions::default().output_directory("/tmp/dl");
        let args = s.download_args("dQw4w9WgXcQ", &options);
        assert_eq!(&args[..2], ["--dump-json", "--no-simulate"]);
        assert!(args.windows(2).any(|w| w == ["--extractor-args", "youtube:player_client=ios"]));
        assert!(args.windows(2).any(|w| w[0] == "-o" && w[1].starts_with("/tmp/dl")));
        assert!(args.contains(&"--write-info-json".to_string()));
        assert_eq!(
            args.last().map(String::as_str),
            Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
        );
    }

    #[test]
    fn simplified_web_uses_permissive_format() {
        let s = YtDlpStrategy::new(Persona::SimplifiedWeb, YtDlpConfig::default());
        let args = s.download_args("dQw4w9WgXcQ", &DownloadOptions::default());
        assert!(args.windows(2).any(|w| w == ["-f", "best/worst"]));
    }

    #[test]
    fn parses_last_json_line() {
        let out = "[youtube] noise\n{\"id\": \"a\"}\n{\"id\": \"b\", \"title\": \"B\"}\n";
        assert_eq!(parse_info_output(out).unwrap()["id"], "b");
        assert!(parse_info_output("ERROR: nope").is_err());
    }

    #[test]
    fn artifact_path_prefers_requested_downloads() {
        let info = json!({
            "filename": "/x/fallback.mp4",
            "requested_downloads": [{"filepath": "/x/real.mp4"}]
        });
        assert_eq!(artifact_path(&info), Some(PathBuf::from("/x/real.mp4")));
        assert_eq!(
            artifact_path(&json!({"filename": "/x/f.webm"})),
            Some(PathBuf::from("/x/f.webm"))
        );
        assert_eq!(artifact_path(&json!({"title": "t"})), None);
    }

    #[test]
    fn stderr_maps_to_error_kinds() {
        assert!(matches!(
            classify_failure("x", "ERROR: [youtube] abc: Private video. Sign in", "exit 1"),
            HuginnError::Forbidden(_)
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: [youtube] abc: Video unavailable", "exit 1"),
            HuginnError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: HTTP Error 429: Too Many Requests", "exit 1"),
            HuginnError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: Unable to download webpage: HTTP Error 503: Service Unavailable", "exit 1"),
            HuginnError::Http(_)
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: [Errno 104] Connection reset by peer", "exit 1"),
            HuginnError::Http(_)
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: HTTP Error 403: Forbidden", "exit 1"),
            HuginnError::Strategy { .. }
        ));
        assert!(matches!(
            classify_failure("x", "ERROR: Sign in to confirm you're not a bot", "exit 1"),
            HuginnError::Strategy { .. }
        ));
        match classify_failure("iOS Client", "", "exit status: 2") {
            HuginnError::Strategy { strategy, message } => {
                assert_eq!(strategy, "iOS Client");
                assert_eq!(message, "exit status: 2");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
