use std::collections::BTreeMap;
use std::process::Output;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::VideoInfo;
use crate::video_id::VideoId;

const YT_DLP: &str = "yt-dlp";

/// Longest stderr excerpt carried into error messages.
const MAX_STDERR_CHARS: usize = 1000;

/// The parts of `yt-dlp --dump-json` we use.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Metadata {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub subtitles: BTreeMap<String, Vec<CaptionFormat>>,
    #[serde(default)]
    pub automatic_captions: BTreeMap<String, Vec<CaptionFormat>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CaptionFormat {
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub url: String,
    pub name: Option<String>,
}

impl Metadata {
    pub fn into_video_info(self, video_id: &VideoId) -> VideoInfo {
        VideoInfo {
            id: self.id.unwrap_or_else(|| video_id.to_string()),
            title: self.title,
            author: self.uploader.or(self.channel),
            duration_secs: self.duration,
            view_count: self.view_count,
            upload_date: self.upload_date,
            description: self.description,
        }
    }
}

/// A yt-dlp command with the flags every invocation shares.
///
/// `--no-exec` keeps yt-dlp from running post-processing commands and
/// `kill_on_drop` makes a cancelled future (e.g. a timeout) kill the child.
pub(crate) fn command() -> Command {
    let mut cmd = Command::new(YT_DLP);
    cmd.args(["--no-exec", "--no-playlist", "--no-warnings"])
        .kill_on_drop(true);
    cmd
}

/// Run a prepared yt-dlp command, turning a missing binary and a non-zero
/// exit into errors.
pub(crate) async fn run(mut cmd: Command) -> Result<Output> {
    let output = cmd.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::YtDlpNotFound
        } else {
            Error::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(Error::YtDlp(failure_message(&output.stderr)));
    }

    Ok(output)
}

/// Fetch the metadata dump for a video without downloading any media.
pub(crate) async fn dump_metadata(video_id: &VideoId) -> Result<Metadata> {
    let mut cmd = command();
    cmd.args(["--dump-json", "--skip-download"])
        .arg(video_id.watch_url());

    let output = run(cmd).await?;
    let metadata: Metadata = serde_json::from_slice(&output.stdout)?;
    debug!(
        %video_id,
        subtitles = metadata.subtitles.len(),
        automatic_captions = metadata.automatic_captions.len(),
        "fetched video metadata"
    );
    Ok(metadata)
}

/// Short, stable explanation for the common yt-dlp failure modes.
pub(crate) fn classify_failure(stderr: &str) -> Option<&'static str> {
    let lower = stderr.to_lowercase();
    if lower.contains("confirm your age") || lower.contains("age-restricted") {
        Some("video is age-restricted")
    } else if lower.contains("not available in your country") || lower.contains("geo restrict") {
        Some("video is region-locked")
    } else if lower.contains("private video") {
        Some("video is private")
    } else if lower.contains("video unavailable") || lower.contains("does not exist") {
        Some("video is unavailable")
    } else if lower.contains("requested format is not available") {
        Some("no downloadable audio format")
    } else {
        None
    }
}

/// Build an error message from yt-dlp's stderr, truncated so a noisy
/// failure does not flood logs.
pub(crate) fn failure_message(stderr: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let excerpt: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
    match classify_failure(&excerpt) {
        Some(reason) => format!("{reason}: {excerpt}"),
        None => excerpt,
    }
}
