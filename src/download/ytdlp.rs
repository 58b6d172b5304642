//! yt-dlp download engine.
//!
//! Implements the [`MediaDownloader`] capability by shelling out to
//! yt-dlp, parsing its `--newline` progress output into the shared
//! progress tracker, and returning the downloaded file.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use url::Url;

use crate::core::error::BotError;
use crate::core::validation::sanitize_filename;
use crate::download::progress::DownloadProgress;

/// Media file extensions yt-dlp may produce.
const MEDIA_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mkv", "m4a", "mp3"];

/// Requested output quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    /// Best available video+audio.
    #[default]
    Best,
    /// Video capped at 360p (mobile-friendly).
    Low360,
    /// Video capped at 480p.
    Medium480,
    /// Audio only.
    AudioOnly,
}

impl Quality {
    /// yt-dlp format selector for this quality.
    pub fn format_selector(&self) -> &'static str {
        match self {
            Self::Best => "best[ext=mp4]/best",
            Self::Low360 => "best[height<=360][ext=mp4]/best[height<=360]/best[ext=mp4]/best",
            Self::Medium480 => "best[height<=480][ext=mp4]/best[height<=480]/best[ext=mp4]/best",
            Self::AudioOnly => "bestaudio[ext=m4a]/bestaudio",
        }
    }

    /// Short stable code used in callback data.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::Low360 => "360",
            Self::Medium480 => "480",
            Self::AudioOnly => "audio",
        }
    }

    /// Inverse of [`Quality::code`].
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "best" => Some(Self::Best),
            "360" => Some(Self::Low360),
            "480" => Some(Self::Medium480),
            "audio" => Some(Self::AudioOnly),
            _ => None,
        }
    }

    /// Button label for the quality menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Best => "🎬 Best quality",
            Self::Low360 => "📱 360p",
            Self::Medium480 => "📱 480p",
            Self::AudioOnly => "🎵 Audio only",
        }
    }
}

/// Options passed through to the download engine.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub quality: Quality,
    /// Overall wall-clock budget for the download.
    pub timeout: Duration,
    /// yt-dlp socket timeout in seconds.
    pub socket_timeout: u64,
    /// yt-dlp retry count.
    pub max_retries: u32,
    /// Reject files larger than this many bytes.
    pub max_file_size: u64,
}

/// A downloaded media file.
///
/// Holds the temp directory the file lives in so it stays on disk until
/// the caller is done sending it.
#[derive(Debug)]
pub struct DownloadedMedia {
    pub path: PathBuf,
    pub title: String,
    pub size: u64,
    _workdir: TempDir,
}

impl DownloadedMedia {
    /// Wraps a downloaded file; `workdir` is kept alive with the record
    /// so the file is not cleaned up while it is still being sent.
    pub fn new(path: PathBuf, title: impl Into<String>, size: u64, workdir: TempDir) -> Self {
        Self {
            path,
            title: title.into(),
            size,
            _workdir: workdir,
        }
    }
}

/// The external extraction capability the admission flow invokes.
///
/// Given a URL and options, produce a file or fail; progress is
/// reported through the shared tracker. Failures must be returned, not
/// swallowed; the caller relies on them to report to the user.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    async fn download(
        &self,
        url: &Url,
        options: &DownloadOptions,
        progress: DownloadProgress,
    ) -> Result<DownloadedMedia, BotError>;
}

/// yt-dlp subprocess backend.
pub struct YtdlpDownloader {
    bin: String,
}

impl YtdlpDownloader {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl MediaDownloader for YtdlpDownloader {
    async fn download(
        &self,
        url: &Url,
        options: &DownloadOptions,
        progress: DownloadProgress,
    ) -> Result<DownloadedMedia, BotError> {
        let workdir = TempDir::new()?;
        let output_template = workdir.path().join("video.%(ext)s");

        let mut cmd = Command::new(&self.bin);
        cmd.arg("--newline")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--write-info-json")
            .args(["-o", &output_template.to_string_lossy()])
            .args(["-f", options.quality.format_selector()])
            .args(["--socket-timeout", &options.socket_timeout.to_string()])
            .args(["--retries", &options.max_retries.to_string()]);
        if options.quality != Quality::AudioOnly {
            cmd.args(["--merge-output-format", "mp4"]);
        }
        cmd.arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::info!("Starting yt-dlp for {}", url);
        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BotError::Download("yt-dlp stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BotError::Download("yt-dlp stderr unavailable".to_string()))?;

        // Collect stderr concurrently so the pipe never fills up.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        });

        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(update) = parse_progress_line(&line) {
                    progress.update(update.percent, update.speed_bps, update.eta);
                }
            }
            child.wait().await
        };

        let status = tokio::select! {
            status = run => status?,
            _ = tokio::time::sleep(options.timeout) => {
                log::warn!("yt-dlp timed out after {:?} for {}", options.timeout, url);
                return Err(BotError::Download(format!(
                    "download timed out after {}s",
                    options.timeout.as_secs()
                )));
            }
        };

        let stderr_output = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(BotError::Download(describe_ytdlp_failure(&stderr_output)));
        }

        let path = find_downloaded_file(workdir.path())
            .ok_or_else(|| BotError::Download("downloaded file not found".to_string()))?;
        let size = tokio::fs::metadata(&path).await?.len();
        if size > options.max_file_size {
            return Err(BotError::FileTooLarge {
                size,
                limit: options.max_file_size,
            });
        }

        let title = read_title(workdir.path())
            .await
            .unwrap_or_else(|| "video".to_string());

        progress.finish();
        log::info!("Downloaded '{}' ({} bytes) from {}", title, size, url);

        Ok(DownloadedMedia::new(path, title, size, workdir))
    }
}

struct ProgressUpdate {
    percent: f64,
    speed_bps: f64,
    eta: Option<Duration>,
}

// `[download]  42.3% of ~12.34MiB at 1.23MiB/s ETA 00:12`
static PROGRESS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\[download\]\s+(?P<percent>\d+(?:\.\d+)?)%(?:.*?at\s+(?P<speed>[\d.]+)(?P<unit>[KMG]i?)?B/s)?(?:.*?ETA\s+(?P<eta>[\d:]+))?",
    )
    .unwrap()
});

/// Parses one yt-dlp `--newline` progress line.
fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let caps = PROGRESS_LINE.captures(line)?;
    let percent: f64 = caps.name("percent")?.as_str().parse().ok()?;

    let speed_bps = match (caps.name("speed"), caps.name("unit")) {
        (Some(value), unit) => {
            let base: f64 = value.as_str().parse().unwrap_or(0.0);
            base * unit_multiplier(unit.map(|m| m.as_str()).unwrap_or(""))
        }
        _ => 0.0,
    };

    let eta = caps.name("eta").and_then(|m| parse_clock(m.as_str()));

    Some(ProgressUpdate {
        percent,
        speed_bps,
        eta,
    })
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit {
        "K" | "Ki" => 1024.0,
        "M" | "Mi" => 1024.0 * 1024.0,
        "G" | "Gi" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

/// Parses `MM:SS` or `HH:MM:SS` into a duration.
fn parse_clock(raw: &str) -> Option<Duration> {
    let parts: Vec<u64> = raw.split(':').map(|p| p.parse().ok()).collect::<Option<_>>()?;
    let secs = match parts.as_slice() {
        [s] => *s,
        [m, s] => m * 60 + s,
        [h, m, s] => h * 3600 + m * 60 + s,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Maps yt-dlp stderr to a short user-presentable reason.
fn describe_ytdlp_failure(stderr: &str) -> String {
    let lowered = stderr.to_lowercase();
    if lowered.contains("private") || lowered.contains("unavailable") {
        return "video is private or unavailable".to_string();
    }
    if lowered.contains("unsupported url") {
        return "this URL is not supported by the extractor".to_string();
    }

    let last_error = stderr
        .lines()
        .rev()
        .find(|l| l.starts_with("ERROR"))
        .unwrap_or("yt-dlp failed");
    let mut reason: String = last_error.chars().take(200).collect();
    if reason.len() < last_error.len() {
        reason.push('…');
    }
    reason
}

/// Finds the downloaded media file in the work directory.
fn find_downloaded_file(dir: &std::path::Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .map(|e| e.path())
        .find(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| MEDIA_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
}

/// Reads the video title from the `--write-info-json` sidecar.
async fn read_title(dir: &std::path::Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    let info_path = entries
        .flatten()
        .map(|e| e.path())
        .find(|p| p.to_string_lossy().ends_with(".info.json"))?;

    let raw = tokio::fs::read_to_string(&info_path).await.ok()?;
    let info: serde_json::Value = serde_json::from_str(&raw).ok()?;
    info.get("title")
        .and_then(|t| t.as_str())
        .map(|t| sanitize_filename(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_progress_line() {
        let update = parse_progress_line("[download]  42.3% of ~12.34MiB at 1.50MiB/s ETA 00:12").unwrap();
        assert!((update.percent - 42.3).abs() < 1e-9);
        assert!((update.speed_bps - 1.5 * 1024.0 * 1024.0).abs() < 1.0);
        assert_eq!(update.eta, Some(Duration::from_secs(12)));
    }

    #[test]
    fn parses_line_without_speed_or_eta() {
        let update = parse_progress_line("[download] 100% of 3.21MiB").unwrap();
        assert_eq!(update.percent, 100.0);
        assert_eq!(update.speed_bps, 0.0);
        assert_eq!(update.eta, None);
    }

    #[test]
    fn ignores_non_progress_lines() {
        assert!(parse_progress_line("[info] Writing video metadata").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn clock_parsing() {
        assert_eq!(parse_clock("00:12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_clock("01:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_clock("oops"), None);
    }

    #[test]
    fn failure_descriptions() {
        assert_eq!(
            describe_ytdlp_failure("ERROR: [youtube] abc: Private video"),
            "video is private or unavailable"
        );
        assert_eq!(
            describe_ytdlp_failure("ERROR: Unsupported URL: https://example.com"),
            "this URL is not supported by the extractor"
        );
        assert!(describe_ytdlp_failure("something odd").contains("yt-dlp failed"));
    }

    #[test]
    fn finds_media_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video.info.json"), "{}").unwrap();
        std::fs::write(dir.path().join("video.mp4"), b"data").unwrap();

        let found = find_downloaded_file(dir.path()).unwrap();
        assert_eq!(found.extension().unwrap(), "mp4");
    }

    #[test]
    fn quality_selectors() {
        assert_eq!(Quality::AudioOnly.format_selector(), "bestaudio[ext=m4a]/bestaudio");
        assert!(Quality::Low360.format_selector().contains("height<=360"));
    }

    #[test]
    fn quality_codes_round_trip() {
        for quality in [Quality::Best, Quality::Low360, Quality::Medium480, Quality::AudioOnly] {
            assert_eq!(Quality::from_code(quality.code()), Some(quality));
        }
        assert_eq!(Quality::from_code("720"), None);
    }
}
