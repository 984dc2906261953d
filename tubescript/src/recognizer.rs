//! Speech recognition over extracted audio.
//!
//! The whisper model is loaded at most once per process and shared by every
//! resolver. Loading is lazy: nothing is read from disk until the first
//! extraction actually needs to recognize speech.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio;
use crate::config::{Language, Model, ResolveOptions};
use crate::error::{Error, Result};
use crate::model;

/// Text recognized from an audio file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub text: String,
    /// Language the recognizer decoded in (the hint, or what it detected).
    pub language: String,
}

/// Turns an audio file into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize speech in `audio_path`. `hint` fixes the decoding language;
    /// without it the recognizer detects one.
    async fn transcribe(&self, audio_path: &Path, hint: Option<&Language>) -> Result<Recognition>;
}

type PendingLoad<T> = Shared<BoxFuture<'static, std::result::Result<Arc<T>, String>>>;

/// A value loaded at most once and shared afterwards.
///
/// The load runs on its own task, so a caller that gives up (a timeout, a
/// dropped request) does not cancel it. Later callers join the load already
/// in flight instead of starting another. A failed load is forgotten so the
/// next call can retry.
pub struct SharedModel<T> {
    cell: OnceCell<Arc<T>>,
    pending: Mutex<Option<PendingLoad<T>>>,
}

impl<T: Send + Sync + 'static> SharedModel<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
            pending: Mutex::new(None),
        }
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut load = Some(load);
        loop {
            if let Some(value) = self.cell.get() {
                return Ok(Arc::clone(value));
            }

            let (pending, started_here) = {
                let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(value) = self.cell.get() {
                    return Ok(Arc::clone(value));
                }
                match (slot.as_ref(), load.take()) {
                    (Some(in_flight), unused) => {
                        load = unused;
                        (in_flight.clone(), false)
                    }
                    (None, Some(load)) => (slot.insert(spawn_load(load())).clone(), true),
                    (None, None) => {
                        return Err(Error::Model("model load failed".into()));
                    }
                }
            };

            let outcome = pending.clone().await;
            let mut slot = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match outcome {
                Ok(value) => {
                    let _ = self.cell.set(Arc::clone(&value));
                    *slot = None;
                    return Ok(value);
                }
                Err(message) => {
                    if slot.as_ref().is_some_and(|p| p.ptr_eq(&pending)) {
                        *slot = None;
                    }
                    // Someone else's load failed; ours has not been tried yet.
                    if started_here || load.is_none() {
                        return Err(Error::Model(message));
                    }
                }
            }
        }
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<T: Send + Sync + 'static> Default for SharedModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_load<T, Fut>(load: Fut) -> PendingLoad<T>
where
    T: Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let task = tokio::spawn(load);
    async move {
        match task.await {
            Ok(Ok(value)) => Ok(Arc::new(value)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("model loading task failed: {e}")),
        }
    }
    .boxed()
    .shared()
}

struct LoadedModel {
    context: WhisperContext,
    name: String,
}

static WHISPER_MODEL: SharedModel<LoadedModel> = SharedModel::new();

/// whisper.cpp recognizer backed by the process-wide model.
#[derive(Debug, Clone)]
pub struct WhisperRecognizer {
    model: Model,
    cache_dir: PathBuf,
    gpu: bool,
    gpu_device: u32,
    n_threads: Option<u32>,
    client: reqwest::Client,
}

impl WhisperRecognizer {
    pub fn from_options(options: &ResolveOptions) -> Self {
        Self {
            model: options.model.clone(),
            cache_dir: options.resolve_cache_dir(),
            gpu: options.gpu,
            gpu_device: options.gpu_device,
            n_threads: options.n_threads,
            client: reqwest::Client::new(),
        }
    }

    /// Load the shared model now instead of on first use.
    pub async fn preload(&self) -> Result<()> {
        self.shared_model().await.map(|_| ())
    }

    fn label(&self) -> String {
        match &self.model {
            Model::Custom(path) => path.display().to_string(),
            other => other.name().to_string(),
        }
    }

    async fn shared_model(&self) -> Result<Arc<LoadedModel>> {
        if let Model::Custom(path) = &self.model {
            if !WHISPER_MODEL.is_loaded() && !path.is_file() {
                return Err(Error::ModelNotFound { path: path.clone() });
            }
        }

        let this = self.clone();
        let loaded = WHISPER_MODEL
            .get_or_load(move || async move { this.load_model().await })
            .await?;
        let wanted = self.label();
        if loaded.name != wanted {
            warn!(
                loaded = %loaded.name,
                requested = %wanted,
                "whisper model already loaded for this process, ignoring requested model"
            );
        }
        Ok(loaded)
    }

    async fn load_model(&self) -> Result<LoadedModel> {
        let path = model::ensure_model_with(&self.client, &self.model, &self.cache_dir).await?;
        let name = self.label();
        let gpu = self.gpu;
        let gpu_device = self.gpu_device;

        tokio::task::spawn_blocking(move || {
            info!(model = %path.display(), gpu, "loading whisper model");
            let started = Instant::now();

            let mut ctx_params = WhisperContextParameters::new();
            ctx_params.use_gpu(gpu);
            ctx_params.gpu_device(gpu_device as i32);

            let context = WhisperContext::new_with_params(
                path.to_str()
                    .ok_or_else(|| Error::Model("model path contains invalid UTF-8".into()))?,
                ctx_params,
            )?;

            info!(elapsed_ms = started.elapsed().as_millis() as u64, "whisper model loaded");
            Ok(LoadedModel { context, name })
        })
        .await
        .map_err(|e| Error::Model(format!("model loading task failed: {e}")))?
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn transcribe(&self, audio_path: &Path, hint: Option<&Language>) -> Result<Recognition> {
        let loaded = self.shared_model().await?;
        let path = audio_path.to_path_buf();
        let hint = hint.map(|l| l.code().to_string());
        let n_threads = self.n_threads;

        tokio::task::spawn_blocking(move || decode(&loaded, &path, hint.as_deref(), n_threads))
            .await
            .map_err(|e| Error::Transcription(format!("recognition task failed: {e}")))?
    }
}

fn decode(
    loaded: &LoadedModel,
    audio_path: &Path,
    hint: Option<&str>,
    n_threads: Option<u32>,
) -> Result<Recognition> {
    let samples = audio::load_audio(audio_path)?;
    let mut state = loaded.context.create_state()?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 5 });
    // "auto" makes whisper detect the language and keep decoding.
    params.set_language(Some(hint.unwrap_or("auto")));
    if let Some(n) = n_threads {
        params.set_n_threads(n as i32);
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    info!(samples = samples.len(), model = %loaded.name, ?hint, "running recognition");
    state.full(params, &samples)?;

    let num_segments = state.full_n_segments();
    let mut parts = Vec::with_capacity(num_segments.max(0) as usize);
    for i in 0..num_segments {
        let segment = state
            .get_segment(i)
            .ok_or_else(|| Error::Transcription(format!("segment {i} not found")))?;
        let text = segment
            .to_str_lossy()
            .map_err(|e| Error::Transcription(format!("segment text error: {e}")))?;
        let text = text.trim();
        if !text.is_empty() {
            parts.push(text.to_string());
        }
    }

    let language = whisper_rs::get_lang_str(state.full_lang_id_from_state())
        .map(str::to_string)
        .or_else(|| hint.map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    debug!(num_segments, %language, "recognition complete");
    Ok(Recognition {
        text: parts.join(" "),
        language,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_model_loads_once_under_concurrency() {
        let shared: Arc<SharedModel<String>> = Arc::new(SharedModel::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            let loads = Arc::clone(&loads);
            handles.push(tokio::spawn(async move {
                shared
                    .get_or_load(|| async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("model".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut models = Vec::new();
        for handle in handles {
            models.push(handle.await.unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(shared.is_loaded());
    }

    #[tokio::test]
    async fn test_shared_model_retries_after_failure() {
        let shared: SharedModel<u32> = SharedModel::default();

        let first = shared
            .get_or_load(|| async { Err(Error::Model("disk on fire".into())) })
            .await;
        assert!(first.is_err());
        assert!(!shared.is_loaded());
        assert!(shared.get().is_none());

        let second = shared.get_or_load(|| async { Ok(7) }).await.unwrap();
        assert_eq!(*second, 7);
        assert_eq!(shared.get().as_deref(), Some(&7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shared_model_load_survives_caller_timeout() {
        let shared: SharedModel<String> = SharedModel::new();
        let loads = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&loads);
        let slow_load = move || async move {
            tokio::task::spawn_blocking(move || {
                counted.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(300));
                "model".to_string()
            })
            .await
            .map_err(|e| Error::Model(e.to_string()))
        };
        let first =
            tokio::time::timeout(Duration::from_millis(50), shared.get_or_load(slow_load)).await;
        assert!(first.is_err(), "first caller should have timed out");

        let counted = Arc::clone(&loads);
        let model = shared
            .get_or_load(move || async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok("second model".to_string())
            })
            .await
            .unwrap();

        assert_eq!(*model, "model");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(shared.is_loaded());
    }

    #[tokio::test]
    async fn test_shared_model_retries_failure_nobody_awaited() {
        let shared: SharedModel<u32> = SharedModel::new();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            shared.get_or_load(|| async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Err(Error::Model("out of memory".into()))
            }),
        )
        .await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let value = shared.get_or_load(|| async { Ok(3) }).await.unwrap();
        assert_eq!(*value, 3);
    }

    #[tokio::test]
    async fn test_whisper_recognizer_missing_custom_model() {
        let options = ResolveOptions::new().model(Model::Custom(PathBuf::from(
            "/nonexistent/ggml-missing.bin",
        )));
        let recognizer = WhisperRecognizer::from_options(&options);

        let err = recognizer
            .transcribe(Path::new("/nonexistent/audio.wav"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotFound { .. }));
    }
}
