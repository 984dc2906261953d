//! Video transcript resolution: video id in, transcript out.
//!
//! **tubescript** asks the video platform for a published caption track
//! first. When there is none worth using, it downloads the audio (via
//! yt-dlp), decodes it (via ffmpeg) and runs speech recognition (via
//! whisper.cpp). Either way the caller gets the same [`TranscriptResult`],
//! tagged with where the text came from.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> tubescript::Result<()> {
//! // Default priority: English, then Vietnamese, then anything
//! let result = tubescript::resolve("dQw4w9WgXcQ", None, false).await?;
//! println!("[{} / {}] {}", result.source(), result.language(), result.transcript());
//!
//! // Skip the provider and transcribe the audio with a language hint
//! let result = tubescript::resolve("https://youtu.be/dQw4w9WgXcQ", Some("vi"), true).await?;
//! println!("{}", result.to_text_with_header());
//! # Ok(())
//! # }
//! ```
//!
//! Long-running services should build one [`Resolver`] and share it, so
//! HTTP connection pools are reused across requests. A shared resolver does
//! not sweep on its own: start the sweep once with
//! `resolver.artifacts().spawn_sweeper(interval)` and keep the handle for as
//! long as the service runs.

pub mod artifact;
pub(crate) mod audio;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod model;
pub mod provider;
pub mod recognizer;
pub mod types;
pub mod video_id;
pub(crate) mod ytdlp;

pub use artifact::{ArtifactManager, AudioArtifact, SweepReport};
pub use config::{Language, Model, ResolveOptions};
pub use download::{AudioExtractor, AudioSource, YtDlpAudioSource};
pub use engine::Resolver;
pub use error::{Error, ErrorKind, ErrorPayload, Result};
pub use provider::{TranscriptProvider, YtDlpProvider};
pub use recognizer::{Recognition, SharedModel, SpeechRecognizer, WhisperRecognizer};
pub use types::{TranscriptResult, TranscriptSource, TranscriptTrack, VideoInfo};
pub use video_id::VideoId;

/// Resolve a transcript with default options.
///
/// `language` is a code ("en"), a region-tagged code ("en-US") or a name
/// ("vietnamese"); `None`, "" and "auto" mean no preference.
pub async fn resolve(
    video_id: &str,
    language: Option<&str>,
    force_extract: bool,
) -> Result<TranscriptResult> {
    resolve_with_options(video_id, language, force_extract, &ResolveOptions::default()).await
}

/// Resolve a transcript with custom options.
///
/// Stale audio under the temp root is swept while the call runs. Services
/// that keep a [`Resolver`] should call
/// `resolver.artifacts().spawn_sweeper(..)` themselves instead.
pub async fn resolve_with_options(
    video_id: &str,
    language: Option<&str>,
    force_extract: bool,
    options: &ResolveOptions,
) -> Result<TranscriptResult> {
    let resolver = Resolver::new(options);
    let sweeper = resolver.artifacts().spawn_sweeper(options.retention);
    let result = resolver
        .resolve_str(video_id, language, force_extract)
        .await;
    sweeper.abort();
    result
}
