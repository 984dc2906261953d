//! The resolution engine: provider transcript first, audio extraction plus
//! speech recognition when the provider has nothing usable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::artifact::ArtifactManager;
use crate::config::{Language, ResolveOptions};
use crate::download::{AudioExtractor, AudioSource, YtDlpAudioSource};
use crate::error::{Error, Result};
use crate::provider::{self, TranscriptProvider, YtDlpProvider};
use crate::recognizer::{SpeechRecognizer, WhisperRecognizer};
use crate::types::{TranscriptResult, TranscriptSource};
use crate::video_id::VideoId;

/// Resolves transcripts for videos.
///
/// A `Resolver` is `Send + Sync`; share one behind an `Arc` and call
/// [`resolve`](Self::resolve) from as many tasks as needed.
pub struct Resolver {
    provider: Arc<dyn TranscriptProvider>,
    extractor: AudioExtractor,
    recognizer: Arc<dyn SpeechRecognizer>,
    artifacts: Arc<ArtifactManager>,
    provider_timeout: Duration,
    recognition_timeout: Duration,
    min_transcript_chars: usize,
}

impl Resolver {
    /// Production wiring: yt-dlp for captions and audio, whisper for speech.
    pub fn new(options: &ResolveOptions) -> Self {
        Self::from_parts(
            options,
            Arc::new(YtDlpProvider::new()),
            Arc::new(YtDlpAudioSource),
            Arc::new(WhisperRecognizer::from_options(options)),
        )
    }

    /// Build a resolver around custom collaborators.
    pub fn from_parts(
        options: &ResolveOptions,
        provider: Arc<dyn TranscriptProvider>,
        audio_source: Arc<dyn AudioSource>,
        recognizer: Arc<dyn SpeechRecognizer>,
    ) -> Self {
        let artifacts = Arc::new(ArtifactManager::new(
            options.resolve_temp_dir(),
            options.retention,
        ));
        let extractor = AudioExtractor::new(
            audio_source,
            Arc::clone(&artifacts),
            options.download_timeout,
        );

        Self {
            provider,
            extractor,
            recognizer,
            artifacts,
            provider_timeout: options.provider_timeout,
            recognition_timeout: options.recognition_timeout,
            min_transcript_chars: options.min_transcript_chars,
        }
    }

    /// The temp namespace this resolver extracts audio into.
    pub fn artifacts(&self) -> &Arc<ArtifactManager> {
        &self.artifacts
    }

    /// Resolve a transcript for `video_id` (a bare id or a watch URL).
    ///
    /// Unless `force_extract` is set, the provider is asked first. When it
    /// has no usable track the audio is extracted and recognized, with
    /// `language` passed along as a hint.
    pub async fn resolve(
        &self,
        video_id: &str,
        language: Option<&Language>,
        force_extract: bool,
    ) -> Result<TranscriptResult> {
        let video_id = VideoId::parse(video_id)?;
        let started = Instant::now();
        info!(
            %video_id,
            language = language.map(Language::code),
            force_extract,
            "resolving transcript"
        );

        let result = if force_extract {
            self.extraction_stage(&video_id, language).await
        } else {
            match self.provider_stage(&video_id, language).await {
                Err(Error::NoTranscriptAvailable(reason)) => {
                    info!(%video_id, %reason, "no provider transcript, falling back to extraction");
                    self.extraction_stage(&video_id, language).await
                }
                other => other,
            }
        };

        match &result {
            Ok(resolved) => info!(
                %video_id,
                source = %resolved.source(),
                language = resolved.language(),
                chars = resolved.transcript().len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "transcript resolved"
            ),
            Err(e) => warn!(
                %video_id,
                kind = ?e.kind(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "transcript resolution failed"
            ),
        }
        result
    }

    /// Like [`resolve`](Self::resolve), taking the language as caller input.
    ///
    /// The id is checked before the language, so a request that is wrong on
    /// both counts reports `InvalidVideoId`.
    pub async fn resolve_str(
        &self,
        video_id: &str,
        language: Option<&str>,
        force_extract: bool,
    ) -> Result<TranscriptResult> {
        let video_id = VideoId::parse(video_id)?;
        let language = Language::parse_preference(language)?;
        self.resolve(video_id.as_str(), language.as_ref(), force_extract)
            .await
    }

    async fn provider_stage(
        &self,
        video_id: &VideoId,
        language: Option<&Language>,
    ) -> Result<TranscriptResult> {
        let fetch = provider::fetch_transcript(
            self.provider.as_ref(),
            video_id,
            language,
            self.min_transcript_chars,
        );
        let found = tokio::time::timeout(self.provider_timeout, fetch)
            .await
            .map_err(|_| {
                Error::NoTranscriptAvailable(format!(
                    "provider timed out after {}s",
                    self.provider_timeout.as_secs_f32()
                ))
            })??;

        Ok(TranscriptResult::new(
            video_id,
            found.text,
            found.track.primary_language(),
            TranscriptSource::Provider,
        ))
    }

    async fn extraction_stage(
        &self,
        video_id: &VideoId,
        language: Option<&Language>,
    ) -> Result<TranscriptResult> {
        // Removed on every exit from this function.
        let artifact = self.extractor.extract_audio(video_id).await?;
        let audio_path = artifact
            .audio_path()
            .ok_or_else(|| Error::ExtractionFailed("extractor returned no audio file".into()))?;

        debug!(%video_id, path = %audio_path.display(), "recognizing speech");
        let started = Instant::now();
        let recognized = tokio::time::timeout(
            self.recognition_timeout,
            self.recognizer.transcribe(audio_path, language),
        )
        .await;

        let recognition = match recognized {
            Ok(Ok(recognition)) => recognition,
            Ok(Err(e)) => return Err(e.into_recognition_failure()),
            Err(_) => {
                return Err(Error::RecognitionFailed(format!(
                    "recognition timed out after {}s",
                    self.recognition_timeout.as_secs_f32()
                )))
            }
        };
        drop(artifact);

        let text = recognition.text.trim();
        if text.is_empty() {
            return Err(Error::RecognitionFailed(
                "no speech recognized in the audio".into(),
            ));
        }

        debug!(
            %video_id,
            language = %recognition.language,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "speech recognized"
        );
        Ok(TranscriptResult::new(
            video_id,
            text.to_string(),
            recognition.language,
            TranscriptSource::Extraction,
        ))
    }
}
