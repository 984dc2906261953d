use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::TranscriptSource;

/// All errors that can occur in tubescript.
///
/// The first group is what [`Resolver::resolve`](crate::Resolver::resolve)
/// reports to callers. The remaining variants come from the plumbing
/// underneath and are folded into `ExtractionFailed` or `RecognitionFailed`
/// before they leave the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid video id: \"{0}\"")]
    InvalidVideoId(String),

    #[error("unsupported language: \"{0}\" (use Language::supported() to list valid codes)")]
    UnsupportedLanguage(String),

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("no transcript available: {0}")]
    NoTranscriptAvailable(String),

    #[error("audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("speech recognition failed: {0}")]
    RecognitionFailed(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("model download failed: {0}")]
    ModelDownload(String),

    #[error("audio decoding error: {0}")]
    AudioDecode(String),

    #[error("audio file not found: {path}")]
    AudioNotFound { path: PathBuf },

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[error("yt-dlp failed: {0}")]
    YtDlp(String),

    #[error("yt-dlp not found, install with: pip install yt-dlp")]
    YtDlpNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable enough to put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidVideoId,
    UnsupportedLanguage,
    InvalidOption,
    NoTranscriptAvailable,
    ExtractionFailed,
    RecognitionFailed,
    Internal,
}

impl ErrorKind {
    /// Whether the failure was caused by malformed caller input.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidVideoId | ErrorKind::UnsupportedLanguage | ErrorKind::InvalidOption
        )
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidVideoId(_) => ErrorKind::InvalidVideoId,
            Error::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            Error::InvalidOption(_) => ErrorKind::InvalidOption,
            Error::NoTranscriptAvailable(_) => ErrorKind::NoTranscriptAvailable,
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::RecognitionFailed(_) => ErrorKind::RecognitionFailed,
            _ => ErrorKind::Internal,
        }
    }

    /// The resolution path that was being attempted when this error was raised.
    pub fn last_source(&self) -> Option<TranscriptSource> {
        match self.kind() {
            ErrorKind::NoTranscriptAvailable => Some(TranscriptSource::Provider),
            ErrorKind::ExtractionFailed | ErrorKind::RecognitionFailed => {
                Some(TranscriptSource::Extraction)
            }
            _ => None,
        }
    }

    /// Fold a plumbing error into `ExtractionFailed`, keeping its message.
    pub(crate) fn into_extraction_failure(self) -> Error {
        if self.kind() == ErrorKind::Internal {
            Error::ExtractionFailed(self.to_string())
        } else {
            self
        }
    }

    /// Fold a plumbing error into `RecognitionFailed`, keeping its message.
    pub(crate) fn into_recognition_failure(self) -> Error {
        if self.kind() == ErrorKind::Internal {
            Error::RecognitionFailed(self.to_string())
        } else {
            self
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            last_source: self.last_source(),
        }
    }
}

/// The single error object front-ends hand back to their callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_source: Option<TranscriptSource>,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        err.to_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_video_id() {
        let e = Error::InvalidVideoId("bad id!".into());
        assert_eq!(e.to_string(), "invalid video id: \"bad id!\"");
    }

    #[test]
    fn test_error_display_unsupported_language() {
        let e = Error::UnsupportedLanguage("klingon".into());
        let msg = e.to_string();
        assert!(msg.contains("klingon"));
        assert!(msg.contains("Language::supported()"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert_eq!(e.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_extraction_failure_keeps_message() {
        let e = Error::YtDlp("Video unavailable".into()).into_extraction_failure();
        assert_eq!(e.kind(), ErrorKind::ExtractionFailed);
        assert!(e.to_string().contains("Video unavailable"));
    }

    #[test]
    fn test_recognition_failure_keeps_classified_errors() {
        let e = Error::InvalidVideoId("x y".into()).into_recognition_failure();
        assert_eq!(e.kind(), ErrorKind::InvalidVideoId);

        let e = Error::AudioDecode("ffmpeg failed".into()).into_recognition_failure();
        assert_eq!(e.kind(), ErrorKind::RecognitionFailed);
        assert!(e.to_string().contains("ffmpeg failed"));
    }

    #[test]
    fn test_last_source() {
        assert_eq!(
            Error::NoTranscriptAvailable("none".into()).last_source(),
            Some(TranscriptSource::Provider)
        );
        assert_eq!(
            Error::RecognitionFailed("oom".into()).last_source(),
            Some(TranscriptSource::Extraction)
        );
        assert_eq!(Error::InvalidVideoId(String::new()).last_source(), None);
    }

    #[test]
    fn test_payload_json_shape() {
        let payload = Error::ExtractionFailed("region locked".into()).to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "extraction_failed");
        assert_eq!(json["last_source"], "extraction");
        assert!(json["message"].as_str().unwrap().contains("region locked"));

        let payload = Error::InvalidVideoId(String::new()).to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("last_source").is_none());
    }

    #[test]
    fn test_client_error_kinds() {
        assert!(ErrorKind::InvalidVideoId.is_client_error());
        assert!(!ErrorKind::ExtractionFailed.is_client_error());
    }
}
