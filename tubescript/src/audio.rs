use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Target sample rate for whisper.cpp.
pub(crate) const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Maximum audio duration in seconds (8 hours).
/// 8 hours at 16kHz mono f32 = ~1.8 GB.
const MAX_AUDIO_DURATION_SECS: f64 = 8.0 * 3600.0;

/// Load an extracted audio file and return 16kHz mono f32 samples ready for whisper.
///
/// Uses ffmpeg to decode, downmix to mono, and resample in one pass, so any
/// container yt-dlp hands back (wav, m4a, webm, opus, ...) works.
pub fn load_audio(path: &Path) -> Result<Vec<f32>> {
    info!(path = %path.display(), "loading audio");

    if !path.exists() {
        return Err(Error::AudioNotFound {
            path: path.to_path_buf(),
        });
    }

    let samples = decode_with_ffmpeg(path)?;

    let duration = samples.len() as f64 / WHISPER_SAMPLE_RATE as f64;
    debug!(
        samples = samples.len(),
        duration_secs = format!("{duration:.1}"),
        "decoded audio"
    );

    if duration > MAX_AUDIO_DURATION_SECS {
        return Err(Error::AudioDecode(format!(
            "audio too long ({duration:.0}s), maximum supported duration is {MAX_AUDIO_DURATION_SECS:.0}s"
        )));
    }

    Ok(samples)
}

/// Decode any audio file to 16kHz mono f32 via ffmpeg subprocess.
fn decode_with_ffmpeg(path: &Path) -> Result<Vec<f32>> {
    let output = Command::new("ffmpeg")
        .args(["-nostdin", "-threads", "0", "-i"])
        .arg(path)
        .args([
            "-f",
            "s16le",
            "-ac",
            "1",
            "-acodec",
            "pcm_s16le",
            "-ar",
            &WHISPER_SAMPLE_RATE.to_string(),
            "-",
        ])
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::AudioDecode("ffmpeg not found, install with: apt install ffmpeg".into())
            } else {
                Error::AudioDecode(format!("failed to run ffmpeg: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .trim()
            .chars()
            .rev()
            .take(500)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        return Err(Error::AudioDecode(format!("ffmpeg failed: {tail}")));
    }

    if output.stdout.is_empty() {
        return Err(Error::AudioDecode("ffmpeg produced no output".into()));
    }

    Ok(pcm_s16le_to_f32(&output.stdout))
}

/// Convert raw s16le bytes to f32 samples normalized to [-1.0, 1.0).
/// A trailing odd byte is ignored.
fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}
