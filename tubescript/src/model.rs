//! Whisper model files: lookup in the local cache and download on first use.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::Model;
use crate::error::{Error, Result};

const HUGGINGFACE_BASE: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Anything smaller is an error page, not a model.
const MIN_MODEL_BYTES: u64 = 1_000_000;

/// Ensure a model is available locally, downloading it if necessary.
/// Returns the path to the model file.
pub async fn ensure_model(model: &Model, cache_dir: &Path) -> Result<PathBuf> {
    ensure_model_with(&reqwest::Client::new(), model, cache_dir).await
}

/// Like [`ensure_model`], reusing an existing HTTP client.
pub async fn ensure_model_with(
    client: &reqwest::Client,
    model: &Model,
    cache_dir: &Path,
) -> Result<PathBuf> {
    if let Model::Custom(path) = model {
        return if path.is_file() {
            Ok(path.clone())
        } else {
            Err(Error::ModelNotFound { path: path.clone() })
        };
    }

    let filename = model.filename();
    let model_path = cache_dir.join(&filename);

    if model_path.is_file() {
        info!(path = %model_path.display(), "model already cached");
        return Ok(model_path);
    }

    tokio::fs::create_dir_all(cache_dir).await.map_err(|e| {
        Error::Model(format!(
            "failed to create cache dir {}: {e}",
            cache_dir.display()
        ))
    })?;

    let url = format!("{HUGGINGFACE_BASE}/{filename}");
    info!(%url, model = model.name(), "downloading model");
    download_model(client, &url, &model_path).await?;

    Ok(model_path)
}

async fn download_model(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .map_err(|e| Error::ModelDownload(format!("HTTP error: {e}")))?;

    let total_size = response.content_length().unwrap_or(0);
    let pb = progress_bar(total_size, dest);

    // Concurrent first-use downloads from several processes must not share a part file.
    let part = PartFile::new(dest.with_extension(format!("bin.{}.part", std::process::id())));
    let checked = match write_stream(response, part.path(), &pb).await {
        Ok(file_size) => check_size(file_size, total_size).map(|()| file_size),
        Err(e) => Err(e),
    };
    let file_size = match checked {
        Ok(size) => size,
        Err(e) => {
            pb.abandon_with_message("Download failed");
            return Err(e);
        }
    };

    tokio::fs::rename(part.path(), dest).await?;
    part.keep();
    pb.finish_with_message("Download complete");

    info!(path = %dest.display(), size = file_size, "model saved");
    Ok(())
}

/// Reject bodies that cannot be a whole model file.
fn check_size(file_size: u64, total_size: u64) -> Result<()> {
    if file_size < MIN_MODEL_BYTES {
        return Err(Error::ModelDownload(format!(
            "downloaded file too small ({file_size} bytes), likely an error page"
        )));
    }
    if total_size > 0 && file_size != total_size {
        return Err(Error::ModelDownload(format!(
            "download truncated: expected {total_size} bytes, got {file_size}"
        )));
    }
    Ok(())
}

/// A download in progress. The file is removed on drop unless kept, so a
/// cancelled or failed download leaves nothing behind in the cache.
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// The file was moved into place; nothing left to remove.
    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "failed to remove partial download"
            ),
        }
    }
}

async fn write_stream(response: reqwest::Response, path: &Path, pb: &ProgressBar) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    Ok(downloaded)
}

fn progress_bar(total_size: u64, dest: &Path) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!(
        "Downloading {}",
        dest.file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    pb
}

/// List all cached models.
pub fn list_cached_models(cache_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(cache_dir) else {
        return Vec::new();
    };

    let mut models: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
        .collect();
    models.sort();
    models
}
