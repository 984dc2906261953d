use std::fmt;

use serde::{Deserialize, Serialize};

use crate::video_id::VideoId;

/// Where a transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptSource {
    /// Caption track published by the video platform.
    Provider,
    /// Downloaded audio run through the speech recognizer.
    Extraction,
}

impl TranscriptSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TranscriptSource::Provider => "provider",
            TranscriptSource::Extraction => "extraction",
        }
    }
}

impl fmt::Display for TranscriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caption track the provider exposes for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptTrack {
    /// Language code as the provider reports it (e.g. "en", "en-GB", "vi").
    pub language: String,
    /// Human-readable track name, when the provider has one.
    pub name: Option<String>,
    /// Speech-recognition captions generated by the provider.
    pub is_generated: bool,
    /// The provider offers machine translations of this track.
    pub is_translatable: bool,
    /// Where the track body can be fetched from.
    pub url: String,
}

impl TranscriptTrack {
    /// Lowercased primary language subtag ("en-GB" and "en-orig" both give "en").
    pub fn primary_language(&self) -> String {
        primary_subtag(&self.language)
    }
}

/// Reduce a language tag to its lowercased primary subtag.
pub fn primary_subtag(tag: &str) -> String {
    tag.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// A resolved transcript. Built once by the engine and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptResult {
    video_id: String,
    transcript: String,
    language: String,
    source: TranscriptSource,
}

impl TranscriptResult {
    pub(crate) fn new(
        video_id: &VideoId,
        transcript: String,
        language: String,
        source: TranscriptSource,
    ) -> Self {
        Self {
            video_id: video_id.as_str().to_string(),
            transcript,
            language,
            source,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn source(&self) -> TranscriptSource {
        self.source
    }

    /// Transcript preceded by a short metadata header.
    pub fn to_text_with_header(&self) -> String {
        format!(
            "Video ID: {}\nLanguage: {}\nSource: {}\n\n{}",
            self.video_id, self.language, self.source, self.transcript
        )
    }

    /// Format as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Format as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Basic metadata about a video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub duration_secs: Option<f64>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
}

impl VideoInfo {
    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        fn or_unknown(value: Option<&str>) -> &str {
            value.unwrap_or("unknown")
        }

        let length = self
            .duration_secs
            .map(|d| format!("{d:.0} seconds"))
            .unwrap_or_else(|| "unknown".into());
        let views = self
            .view_count
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".into());

        format!(
            "Video Information:\nTitle: {}\nAuthor: {}\nLength: {length}\nViews: {views}\nPublished: {}\nDescription: {}\n",
            or_unknown(self.title.as_deref()),
            or_unknown(self.author.as_deref()),
            or_unknown(self.upload_date.as_deref()),
            self.description.as_deref().unwrap_or(""),
        )
    }
}
