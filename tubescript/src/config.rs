use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::DEFAULT_RETENTION;
use crate::error::{Error, Result};
use crate::types::primary_subtag;

/// A validated language.
///
/// Wraps a language code that has been verified against whisper.cpp's
/// supported language list. Accepts short codes ("en", "vi"), region-tagged
/// codes ("en-US") and full names ("english", "vietnamese").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    /// Short code as whisper expects it.
    code: String,
    /// Whisper internal language ID.
    id: i32,
}

impl Language {
    pub fn new(lang: &str) -> Result<Self> {
        let lower = lang.trim().to_lowercase();
        let lookup = if lower.contains(['-', '_']) {
            primary_subtag(&lower)
        } else {
            lower
        };

        match whisper_rs::get_lang_id(&lookup) {
            Some(id) => {
                let code = whisper_rs::get_lang_str(id).unwrap_or(&lookup).to_string();
                Ok(Language { code, id })
            }
            None => Err(Error::UnsupportedLanguage(lang.to_string())),
        }
    }

    /// Parse an optional caller preference. Empty and "auto" mean no preference.
    pub fn parse_preference(lang: Option<&str>) -> Result<Option<Self>> {
        match lang.map(str::trim) {
            None | Some("") => Ok(None),
            Some(l) if l.eq_ignore_ascii_case("auto") => Ok(None),
            Some(l) => Language::new(l).map(Some),
        }
    }

    /// The short language code (e.g. "en").
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// List all supported languages as (code, full_name) pairs.
    pub fn supported() -> Vec<(&'static str, &'static str)> {
        let max = whisper_rs::get_lang_max_id();
        (0..=max)
            .filter_map(|id| {
                let code = whisper_rs::get_lang_str(id)?;
                let name = whisper_rs::get_lang_str_full(id)?;
                Some((code, name))
            })
            .collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

/// Whisper model sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Model {
    Tiny,
    TinyEn,
    Base,
    BaseEn,
    Small,
    SmallEn,
    Medium,
    MediumEn,
    LargeV2,
    LargeV3,
    LargeV3Turbo,
    /// User-provided .ggml file path.
    Custom(PathBuf),
}

impl Model {
    /// Every downloadable model with its approximate size.
    pub const CATALOG: [(&'static str, &'static str); 11] = [
        ("tiny", "75 MB"),
        ("tiny.en", "75 MB"),
        ("base", "142 MB"),
        ("base.en", "142 MB"),
        ("small", "466 MB"),
        ("small.en", "466 MB"),
        ("medium", "1.5 GB"),
        ("medium.en", "1.5 GB"),
        ("large-v2", "2.9 GB"),
        ("large-v3", "2.9 GB"),
        ("large-v3-turbo", "1.6 GB"),
    ];

    /// Model filename as used by HuggingFace / whisper.cpp.
    pub fn filename(&self) -> String {
        match self {
            Model::Custom(path) => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| "custom-model".into()),
            other => format!("ggml-{}.bin", other.name()),
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        match self {
            Model::Tiny => "tiny",
            Model::TinyEn => "tiny.en",
            Model::Base => "base",
            Model::BaseEn => "base.en",
            Model::Small => "small",
            Model::SmallEn => "small.en",
            Model::Medium => "medium",
            Model::MediumEn => "medium.en",
            Model::LargeV2 => "large-v2",
            Model::LargeV3 => "large-v3",
            Model::LargeV3Turbo => "large-v3-turbo",
            Model::Custom(_) => "custom",
        }
    }

    /// Parse a catalog name (e.g. a CLI argument).
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "tiny" => Some(Model::Tiny),
            "tiny.en" => Some(Model::TinyEn),
            "base" => Some(Model::Base),
            "base.en" => Some(Model::BaseEn),
            "small" => Some(Model::Small),
            "small.en" => Some(Model::SmallEn),
            "medium" => Some(Model::Medium),
            "medium.en" => Some(Model::MediumEn),
            "large-v2" => Some(Model::LargeV2),
            "large-v3" => Some(Model::LargeV3),
            "large-v3-turbo" => Some(Model::LargeV3Turbo),
            _ => None,
        }
    }
}

/// Builder for resolver options.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub model: Model,
    pub gpu: bool,
    pub gpu_device: u32,
    pub n_threads: Option<u32>,
    pub cache_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    /// Age after which the sweep removes orphaned audio artifacts.
    pub retention: Duration,
    pub provider_timeout: Duration,
    pub download_timeout: Duration,
    pub recognition_timeout: Duration,
    /// Provider transcripts shorter than this are treated as unusable.
    pub min_transcript_chars: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            model: Model::Base,
            gpu: true,
            gpu_device: 0,
            n_threads: None,
            cache_dir: None,
            temp_dir: None,
            retention: DEFAULT_RETENTION,
            provider_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(10 * 60),
            recognition_timeout: Duration::from_secs(30 * 60),
            min_transcript_chars: 50,
        }
    }
}

impl ResolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    pub fn gpu(mut self, enabled: bool) -> Self {
        self.gpu = enabled;
        self
    }

    pub fn gpu_device(mut self, device: u32) -> Self {
        self.gpu_device = device;
        self
    }

    pub fn n_threads(mut self, n: u32) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidOption("n_threads must be at least 1".into()));
        }
        self.n_threads = Some(n);
        Ok(self)
    }

    pub fn cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    pub fn temp_dir(mut self, dir: PathBuf) -> Self {
        self.temp_dir = Some(dir);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Result<Self> {
        self.retention = non_zero(retention, "retention")?;
        Ok(self)
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.provider_timeout = non_zero(timeout, "provider_timeout")?;
        Ok(self)
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.download_timeout = non_zero(timeout, "download_timeout")?;
        Ok(self)
    }

    pub fn recognition_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.recognition_timeout = non_zero(timeout, "recognition_timeout")?;
        Ok(self)
    }

    /// Minimum provider transcript length. 0 accepts any non-placeholder text.
    pub fn min_transcript_chars(mut self, chars: usize) -> Self {
        self.min_transcript_chars = chars;
        self
    }

    /// Resolve the cache directory, defaulting to ~/.cache/tubescript/models.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("tubescript")
                .join("models")
        })
    }

    /// Resolve the artifact directory, defaulting to $TMPDIR/youtube_transcripts.
    pub fn resolve_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("youtube_transcripts"))
    }
}

fn non_zero(value: Duration, name: &str) -> Result<Duration> {
    if value.is_zero() {
        Err(Error::InvalidOption(format!("{name} must be greater than zero")))
    } else {
        Ok(value)
    }
}
