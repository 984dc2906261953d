use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::artifact::{self, ArtifactManager, AudioArtifact};
use crate::error::{Error, Result};
use crate::video_id::VideoId;
use crate::ytdlp;

/// Audio formats yt-dlp may leave behind.
const AUDIO_EXTENSIONS: [&str; 7] = ["wav", "mp3", "ogg", "m4a", "opus", "flac", "webm"];

/// Something that can fetch a video's audio track into a directory.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Write the audio for `video_id` into `dest_dir` and return its path.
    async fn download(&self, video_id: &VideoId, dest_dir: &Path) -> Result<PathBuf>;
}

/// Downloads audio with yt-dlp.
///
/// # Security
/// - The id is validated before it gets here and is only ever passed as
///   part of a watch URL, via `.arg()` (no shell expansion)
/// - `--no-exec` prevents yt-dlp from running post-processing commands
/// - The downloaded file path is validated to be inside `dest_dir`
#[derive(Debug, Clone, Copy, Default)]
pub struct YtDlpAudioSource;

#[async_trait]
impl AudioSource for YtDlpAudioSource {
    async fn download(&self, video_id: &VideoId, dest_dir: &Path) -> Result<PathBuf> {
        info!(%video_id, "downloading audio");

        let output_template = dest_dir
            .join("audio.%(ext)s")
            .to_str()
            .ok_or_else(|| Error::YtDlp("output directory path contains invalid UTF-8".into()))?
            .to_string();

        // Best audio, extracted as WAV for maximum compatibility
        let mut cmd = ytdlp::command();
        cmd.args([
            "--format",
            "bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "wav",
            "--audio-quality",
            "0",
            "--output",
            &output_template,
            "--print",
            "after_move:filepath",
        ])
        .arg(video_id.watch_url());

        let output = ytdlp::run(cmd).await?;

        // --print after_move:filepath gives us the final path
        let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let audio_path = if printed.is_empty() {
            find_audio_file(dest_dir)?
        } else {
            let candidate = PathBuf::from(&printed);
            validate_path_in_dir(&candidate, dest_dir)?;
            candidate
        };

        if !audio_path.is_file() {
            return Err(Error::YtDlp(format!(
                "downloaded file not found at {}",
                audio_path.display()
            )));
        }

        debug!(path = %audio_path.display(), "audio downloaded");
        Ok(audio_path)
    }
}

/// Fetches audio into scoped artifacts.
pub struct AudioExtractor {
    source: Arc<dyn AudioSource>,
    artifacts: Arc<ArtifactManager>,
    timeout: Duration,
}

impl AudioExtractor {
    pub fn new(
        source: Arc<dyn AudioSource>,
        artifacts: Arc<ArtifactManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            artifacts,
            timeout,
        }
    }

    /// Download the audio for `video_id` into a fresh artifact.
    ///
    /// The artifact is registered before any byte is written, so whatever
    /// the download leaves behind is removed when the returned guard (or,
    /// on failure, the guard held here) is dropped. Every failure is
    /// reported as `ExtractionFailed`.
    pub async fn extract_audio(&self, video_id: &VideoId) -> Result<AudioArtifact> {
        let request_id = artifact::request_id(video_id);
        let mut artifact = self
            .artifacts
            .acquire(&request_id)
            .map_err(|e| Error::ExtractionFailed(format!("could not reserve temp space: {e}")))?;

        let started = Instant::now();
        let downloaded =
            tokio::time::timeout(self.timeout, self.source.download(video_id, artifact.dir()))
                .await;

        let path = match downloaded {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                warn!(%video_id, error = %e, "audio download failed");
                return Err(e.into_extraction_failure());
            }
            Err(_) => {
                warn!(%video_id, timeout_secs = self.timeout.as_secs(), "audio download timed out");
                return Err(Error::ExtractionFailed(format!(
                    "audio download timed out after {}s",
                    self.timeout.as_secs_f32()
                )));
            }
        };

        if !path.starts_with(artifact.dir()) {
            return Err(Error::ExtractionFailed(format!(
                "audio written outside its artifact directory: {}",
                path.display()
            )));
        }
        if !path.is_file() {
            return Err(Error::ExtractionFailed(format!(
                "downloaded audio missing at {}",
                path.display()
            )));
        }

        info!(
            %video_id,
            request_id = %request_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "audio extracted"
        );
        artifact.set_audio_path(path);
        Ok(artifact)
    }
}

/// Normalize a path by resolving `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Validate that a path is inside the expected directory (prevents path traversal).
fn validate_path_in_dir(path: &Path, expected_dir: &Path) -> Result<()> {
    let canonical_dir = expected_dir
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(expected_dir));
    let canonical_path = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(path));

    if canonical_path.starts_with(&canonical_dir) {
        Ok(())
    } else {
        warn!(
            path = %path.display(),
            expected_dir = %expected_dir.display(),
            "downloaded file path outside expected directory"
        );
        Err(Error::YtDlp(
            "downloaded file path is outside the expected output directory".into(),
        ))
    }
}

/// Find the most recently modified audio file in a directory.
fn find_audio_file(dir: &Path) -> Result<PathBuf> {
    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext));
        if !is_audio {
            continue;
        }
        let Ok(modified) = path.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if best.as_ref().is_none_or(|(_, t)| modified > *t) {
            best = Some((path, modified));
        }
    }

    best.map(|(p, _)| p)
        .ok_or_else(|| Error::YtDlp("no audio file found after download".into()))
}
