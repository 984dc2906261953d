//! Provider transcripts: caption tracks published by the video platform.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Language;
use crate::error::{Error, Result};
use crate::types::{primary_subtag, TranscriptTrack, VideoInfo};
use crate::video_id::VideoId;
use crate::ytdlp::{self, CaptionFormat, Metadata};

/// Languages tried, in order, when the caller has no preference or the
/// preferred one is missing.
pub const DEFAULT_PRIORITY: [&str; 2] = ["en", "vi"];

/// Text the platform serves while captions are still being generated.
const PLACEHOLDER_TEXT: &str = "caption is updating";

/// Caption format we ask the platform for.
const CAPTION_EXT: &str = "json3";

/// Source of caption tracks for a video.
#[async_trait]
pub trait TranscriptProvider: Send + Sync {
    /// All tracks the provider has for `video_id`. An empty list means none.
    async fn list_tracks(&self, video_id: &VideoId) -> Result<Vec<TranscriptTrack>>;

    /// The plain text body of one track.
    async fn fetch_text(&self, track: &TranscriptTrack) -> Result<String>;
}

/// A usable provider transcript and the track it came from.
#[derive(Debug, Clone)]
pub struct ProviderTranscript {
    pub track: TranscriptTrack,
    pub text: String,
}

/// Order tracks by the selection policy: the preferred language, then the
/// default priority list, then everything else.
///
/// Within one tier manual tracks beat auto-generated ones, exact codes beat
/// region variants ("en" before "en-GB"), and the code breaks any remaining tie.
pub fn rank_tracks(
    mut tracks: Vec<TranscriptTrack>,
    preference: Option<&Language>,
) -> Vec<TranscriptTrack> {
    let tier = |track: &TranscriptTrack| -> usize {
        let lang = track.primary_language();
        if preference.is_some_and(|p| p.code() == lang) {
            return 0;
        }
        DEFAULT_PRIORITY
            .iter()
            .position(|code| *code == lang)
            .map_or(DEFAULT_PRIORITY.len() + 1, |i| i + 1)
    };

    tracks.sort_by_cached_key(|track| {
        (
            tier(track),
            track.is_generated,
            !track.language.eq_ignore_ascii_case(&track.primary_language()),
            track.language.clone(),
        )
    });
    tracks
}

/// Why a fetched transcript cannot be used, if it cannot.
fn unusable_reason(text: &str, min_chars: usize) -> Option<&'static str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Some("empty")
    } else if trimmed.chars().count() < min_chars {
        Some("too short")
    } else if trimmed.to_lowercase().contains(PLACEHOLDER_TEXT) {
        Some("placeholder text")
    } else {
        None
    }
}

/// Find the best usable provider transcript for a video.
///
/// Candidates are tried in [`rank_tracks`] order; a track whose body fails
/// to download or is unusable is skipped. Every failure, including a failure
/// to list tracks at all, is reported as `NoTranscriptAvailable` so the
/// caller can fall back to extraction.
pub async fn fetch_transcript(
    provider: &dyn TranscriptProvider,
    video_id: &VideoId,
    preference: Option<&Language>,
    min_chars: usize,
) -> Result<ProviderTranscript> {
    let tracks = provider
        .list_tracks(video_id)
        .await
        .map_err(|e| Error::NoTranscriptAvailable(format!("could not list tracks: {e}")))?;

    if tracks.is_empty() {
        return Err(Error::NoTranscriptAvailable(format!(
            "video {video_id} has no caption tracks"
        )));
    }

    let ranked = rank_tracks(tracks, preference);
    debug!(
        %video_id,
        order = ?ranked.iter().map(|t| t.language.as_str()).collect::<Vec<_>>(),
        "ranked caption tracks"
    );

    let mut attempts = Vec::with_capacity(ranked.len());
    for track in ranked {
        match provider.fetch_text(&track).await {
            Ok(text) => match unusable_reason(&text, min_chars) {
                None => {
                    info!(
                        %video_id,
                        language = %track.language,
                        generated = track.is_generated,
                        chars = text.len(),
                        "using provider transcript"
                    );
                    return Ok(ProviderTranscript { track, text });
                }
                Some(reason) => {
                    debug!(%video_id, language = %track.language, reason, "skipping track");
                    attempts.push(format!("{}: {reason}", track.language));
                }
            },
            Err(e) => {
                warn!(%video_id, language = %track.language, error = %e, "failed to fetch track");
                attempts.push(format!("{}: {e}", track.language));
            }
        }
    }

    Err(Error::NoTranscriptAvailable(format!(
        "no usable track ({})",
        attempts.join("; ")
    )))
}

/// Caption tracks discovered through yt-dlp, fetched over HTTPS.
#[derive(Debug, Clone, Default)]
pub struct YtDlpProvider {
    client: reqwest::Client,
}

impl YtDlpProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Basic metadata about the video.
    pub async fn video_info(&self, video_id: &VideoId) -> Result<VideoInfo> {
        let metadata = ytdlp::dump_metadata(video_id).await?;
        Ok(metadata.into_video_info(video_id))
    }
}

#[async_trait]
impl TranscriptProvider for YtDlpProvider {
    async fn list_tracks(&self, video_id: &VideoId) -> Result<Vec<TranscriptTrack>> {
        let metadata = ytdlp::dump_metadata(video_id).await?;
        Ok(tracks_from_metadata(&metadata))
    }

    async fn fetch_text(&self, track: &TranscriptTrack) -> Result<String> {
        let body = self
            .client
            .get(&track.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        parse_json3(&body)
    }
}

/// Turn yt-dlp's caption maps into tracks.
///
/// Automatic captions also list machine translations of a source track
/// (their URL carries a `tlang` parameter next to the source `lang`). Those
/// are not tracks of their own, but they mark tracks in the source language
/// as translatable.
pub(crate) fn tracks_from_metadata(metadata: &Metadata) -> Vec<TranscriptTrack> {
    let sources: HashSet<String> = metadata
        .automatic_captions
        .values()
        .flatten()
        .filter_map(translation_source)
        .collect();
    let translatable = |lang: &str| sources.contains(&primary_subtag(lang));

    let manual = metadata
        .subtitles
        .iter()
        .filter(|(lang, _)| lang.as_str() != "live_chat")
        .filter_map(|(lang, formats)| track_from(lang, formats, false, translatable(lang)));

    let generated = metadata
        .automatic_captions
        .iter()
        .filter_map(|(lang, formats)| {
            let format = pick_format(formats)?;
            if is_translation(format) {
                None
            } else {
                track_from(lang, formats, true, translatable(lang))
            }
        });

    manual.chain(generated).collect()
}

fn track_from(
    lang: &str,
    formats: &[CaptionFormat],
    is_generated: bool,
    is_translatable: bool,
) -> Option<TranscriptTrack> {
    let format = pick_format(formats)?;
    Some(TranscriptTrack {
        language: lang.to_string(),
        name: format.name.clone(),
        is_generated,
        is_translatable,
        url: format.url.clone(),
    })
}

fn pick_format(formats: &[CaptionFormat]) -> Option<&CaptionFormat> {
    formats
        .iter()
        .find(|f| f.ext == CAPTION_EXT && !f.url.is_empty())
}

fn is_translation(format: &CaptionFormat) -> bool {
    query_param(&format.url, "tlang").is_some()
}

/// Primary language a translation URL translates from.
fn translation_source(format: &CaptionFormat) -> Option<String> {
    query_param(&format.url, "tlang")?;
    query_param(&format.url, "lang").map(|lang| primary_subtag(&lang))
}

fn query_param(url: &str, name: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, value)| key == name && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

#[derive(Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Deserialize)]
struct Json3Event {
    #[serde(default)]
    segs: Vec<Json3Segment>,
}

#[derive(Deserialize)]
struct Json3Segment {
    #[serde(default)]
    utf8: String,
}

/// Flatten a json3 caption document to one line per caption event.
pub(crate) fn parse_json3(body: &[u8]) -> Result<String> {
    let doc: Json3 = serde_json::from_slice(body)?;
    let lines: Vec<String> = doc
        .events
        .iter()
        .map(|event| {
            event
                .segs
                .iter()
                .map(|seg| seg.utf8.as_str())
                .collect::<String>()
                .replace('\n', " ")
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    fn track(lang: &str, generated: bool) -> TranscriptTrack {
        TranscriptTrack {
            language: lang.into(),
            name: None,
            is_generated: generated,
            is_translatable: false,
            url: format!("https://captions.test/{lang}/{generated}"),
        }
    }

    fn langs(tracks: &[TranscriptTrack]) -> Vec<&str> {
        tracks.iter().map(|t| t.language.as_str()).collect()
    }

    const LONG_TEXT: &str = "this caption track is comfortably longer than fifty characters";

    struct StaticProvider {
        tracks: Vec<TranscriptTrack>,
        bodies: HashMap<String, std::result::Result<String, String>>,
        fetched: Mutex<Vec<String>>,
    }

    impl StaticProvider {
        fn new(entries: Vec<(TranscriptTrack, std::result::Result<&str, &str>)>) -> Self {
            let tracks = entries.iter().map(|(t, _)| t.clone()).collect();
            let bodies = entries
                .into_iter()
                .map(|(t, body)| (t.url, body.map(String::from).map_err(String::from)))
                .collect();
            Self {
                tracks,
                bodies,
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TranscriptProvider for StaticProvider {
        async fn list_tracks(&self, _video_id: &VideoId) -> Result<Vec<TranscriptTrack>> {
            Ok(self.tracks.clone())
        }

        async fn fetch_text(&self, track: &TranscriptTrack) -> Result<String> {
            self.fetched.lock().unwrap().push(track.language.clone());
            match &self.bodies[&track.url] {
                Ok(body) => Ok(body.clone()),
                Err(e) => Err(Error::YtDlp(e.clone())),
            }
        }
    }

    fn vid() -> VideoId {
        VideoId::parse("dQw4w9WgXcQ").unwrap()
    }

    #[test]
    fn test_rank_prefers_requested_language() {
        let vi = Language::new("vi").unwrap();
        let ranked = rank_tracks(vec![track("en", false), track("vi", false)], Some(&vi));
        assert_eq!(langs(&ranked), ["vi", "en"]);
    }

    #[test]
    fn test_rank_default_priority_english_then_vietnamese() {
        let ranked = rank_tracks(
            vec![track("fr", false), track("vi", false), track("en", false)],
            None,
        );
        assert_eq!(langs(&ranked), ["en", "vi", "fr"]);
    }

    #[test]
    fn test_rank_falls_back_to_defaults_when_preference_missing() {
        let de = Language::new("de").unwrap();
        let ranked = rank_tracks(vec![track("ja", false), track("vi", false)], Some(&de));
        assert_eq!(langs(&ranked), ["vi", "ja"]);
    }

    #[test]
    fn test_rank_manual_before_generated() {
        let ranked = rank_tracks(vec![track("en", true), track("en", false)], None);
        assert!(!ranked[0].is_generated);
        assert!(ranked[1].is_generated);
    }

    #[test]
    fn test_rank_exact_code_before_region_variant() {
        let ranked = rank_tracks(vec![track("en-GB", false), track("en", false)], None);
        assert_eq!(langs(&ranked), ["en", "en-GB"]);
    }

    #[test]
    fn test_rank_remaining_tracks_are_deterministic() {
        let ranked = rank_tracks(
            vec![track("ko", true), track("de", false), track("ja", false)],
            None,
        );
        assert_eq!(langs(&ranked), ["de", "ja", "ko"]);
    }

    #[test]
    fn test_unusable_reason() {
        assert_eq!(unusable_reason("   ", 50), Some("empty"));
        assert_eq!(unusable_reason("short", 50), Some("too short"));
        assert_eq!(unusable_reason("short", 0), None);
        assert_eq!(
            unusable_reason("[Music] Caption is updating, please wait for a little while", 10),
            Some("placeholder text")
        );
        assert_eq!(unusable_reason(LONG_TEXT, 50), None);
    }

    #[tokio::test]
    async fn test_fetch_skips_unusable_tracks() {
        let provider = StaticProvider::new(vec![
            (track("en", false), Ok("too short")),
            (track("vi", false), Err("HTTP 429")),
            (track("fr", true), Ok(LONG_TEXT)),
        ]);

        let found = fetch_transcript(&provider, &vid(), None, 50).await.unwrap();
        assert_eq!(found.track.language, "fr");
        assert_eq!(found.text, LONG_TEXT);
        assert_eq!(*provider.fetched.lock().unwrap(), ["en", "vi", "fr"]);
    }

    #[tokio::test]
    async fn test_fetch_stops_at_first_usable_track() {
        let provider = StaticProvider::new(vec![
            (track("en", false), Ok(LONG_TEXT)),
            (track("vi", false), Ok(LONG_TEXT)),
        ]);

        let found = fetch_transcript(&provider, &vid(), None, 50).await.unwrap();
        assert_eq!(found.track.language, "en");
        assert_eq!(provider.fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_no_tracks() {
        let provider = StaticProvider::new(vec![]);
        let err = fetch_transcript(&provider, &vid(), None, 50).await.unwrap_err();
        assert!(matches!(err, Error::NoTranscriptAvailable(_)));
    }

    #[tokio::test]
    async fn test_fetch_all_tracks_fail() {
        let provider = StaticProvider::new(vec![
            (track("en", false), Err("HTTP 404")),
            (track("vi", true), Ok("caption is updating")),
        ]);
        let err = fetch_transcript(&provider, &vid(), None, 0).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::NoTranscriptAvailable(_)));
        assert!(msg.contains("en: "));
        assert!(msg.contains("vi: placeholder text"));
    }

    #[test]
    fn test_tracks_from_metadata() {
        let json = r#"{
            "subtitles": {
                "en-GB": [
                    {"ext": "vtt", "url": "https://captions.test/en-GB.vtt"},
                    {"ext": "json3", "url": "https://captions.test/en-GB.json3", "name": "English (UK)"}
                ],
                "live_chat": [{"ext": "json", "url": "https://captions.test/chat"}]
            },
            "automatic_captions": {
                "en-orig": [{"ext": "json3", "url": "https://captions.test/timedtext?lang=en&fmt=json3"}],
                "vi": [{"ext": "json3", "url": "https://captions.test/timedtext?lang=en&fmt=json3&tlang=vi"}],
                "xx": [{"ext": "srv1", "url": "https://captions.test/xx"}]
            }
        }"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        let tracks = tracks_from_metadata(&metadata);

        assert_eq!(langs(&tracks), ["en-GB", "en-orig"]);
        assert!(!tracks[0].is_generated);
        assert_eq!(tracks[0].name.as_deref(), Some("English (UK)"));
        assert!(tracks[0].url.ends_with(".json3"));
        assert!(tracks[1].is_generated);
        assert!(tracks.iter().all(|t| t.is_translatable));
        assert_eq!(tracks[1].primary_language(), "en");
    }

    #[test]
    fn test_translatable_follows_source_language() {
        let json = r#"{
            "subtitles": {
                "de": [{"ext": "json3", "url": "https://captions.test/de.json3"}]
            },
            "automatic_captions": {
                "en": [{"ext": "json3", "url": "https://captions.test/timedtext?lang=en&fmt=json3"}],
                "fr": [{"ext": "json3", "url": "https://captions.test/timedtext?fmt=json3&lang=en&tlang=fr"}]
            }
        }"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        let tracks = tracks_from_metadata(&metadata);

        assert_eq!(langs(&tracks), ["de", "en"]);
        assert!(!tracks[0].is_translatable);
        assert!(tracks[1].is_translatable);
    }

    #[test]
    fn test_no_translations_means_nothing_translatable() {
        let json = r#"{
            "automatic_captions": {
                "en": [{"ext": "json3", "url": "https://captions.test/timedtext?lang=en&fmt=json3"}]
            }
        }"#;
        let metadata: Metadata = serde_json::from_str(json).unwrap();
        let tracks = tracks_from_metadata(&metadata);

        assert_eq!(langs(&tracks), ["en"]);
        assert!(!tracks[0].is_translatable);
    }

    #[test]
    fn test_parse_json3() {
        let body = br#"{
            "events": [
                {"tStartMs": 0, "segs": [{"utf8": "never gonna "}, {"utf8": "give you up"}]},
                {"tStartMs": 1500, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 2000},
                {"tStartMs": 3000, "segs": [{"utf8": "never gonna\nlet you down"}]}
            ]
        }"#;
        assert_eq!(
            parse_json3(body).unwrap(),
            "never gonna give you up\nnever gonna let you down"
        );
    }

    #[test]
    fn test_parse_json3_rejects_garbage() {
        assert!(parse_json3(b"<html>rate limited</html>").is_err());
    }
}
