use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use tubescript::{
    ArtifactManager, Error, Language, Model, ResolveOptions, Resolver, VideoId, YtDlpProvider,
};

/// How often the background sweep looks for orphaned audio while a run is in progress.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Parser)]
#[command(
    name = "tubescript",
    about = "Get a video's transcript: published captions first, local whisper transcription as fallback"
)]
struct Cli {
    /// Video id or YouTube URL.
    #[arg(required_unless_present_any = ["list_models", "download_model", "list_languages", "sweep"])]
    input: Option<String>,

    /// Preferred transcript language (e.g. "en", "vi", "vietnamese").
    #[arg(short, long)]
    language: Option<String>,

    /// Skip published captions and transcribe the audio.
    #[arg(long)]
    force_extract: bool,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Prefix text output with video id, language and source.
    #[arg(long)]
    header: bool,

    /// Print video metadata instead of the transcript.
    #[arg(long)]
    info: bool,

    /// Whisper model used when falling back to transcription.
    #[arg(short, long, default_value = "base")]
    model: String,

    /// Disable GPU acceleration.
    #[arg(long)]
    no_gpu: bool,

    /// GPU device ID.
    #[arg(long, default_value = "0")]
    gpu_device: u32,

    /// Number of threads (default: auto).
    #[arg(long)]
    threads: Option<u32>,

    /// Model cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Directory for temporary audio (default: $TMPDIR/youtube_transcripts).
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Seconds to wait for published captions.
    #[arg(long, default_value = "30")]
    provider_timeout: u64,

    /// Seconds to wait for the audio download.
    #[arg(long, default_value = "600")]
    download_timeout: u64,

    /// Seconds to wait for speech recognition.
    #[arg(long, default_value = "1800")]
    recognition_timeout: u64,

    /// Seconds before orphaned temporary audio is swept.
    #[arg(long, default_value = "3600")]
    retention: u64,

    /// Captions shorter than this many characters are ignored.
    #[arg(long, default_value = "50")]
    min_chars: usize,

    /// List available models.
    #[arg(long)]
    list_models: bool,

    /// Download a model without resolving anything.
    #[arg(long)]
    download_model: Option<String>,

    /// List supported languages.
    #[arg(long)]
    list_languages: bool,

    /// Remove stale temporary audio and exit.
    #[arg(long)]
    sweep: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tubescript=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_languages {
        println!("{:<6} LANGUAGE", "CODE");
        println!("{:<6} --------", "----");
        for (code, name) in Language::supported() {
            println!("{code:<6} {name}");
        }
        return ExitCode::SUCCESS;
    }

    let opts = match build_options(&cli) {
        Ok(o) => o,
        Err(e) => return fail(&e, cli.format),
    };

    if cli.list_models {
        list_models(&opts);
        return ExitCode::SUCCESS;
    }

    if let Some(model_name) = &cli.download_model {
        let Some(model) = Model::parse_name(model_name) else {
            eprintln!("Unknown model: {model_name}");
            eprintln!("Use --list-models to see available models");
            return ExitCode::FAILURE;
        };
        return match tubescript::model::ensure_model(&model, &opts.resolve_cache_dir()).await {
            Ok(path) => {
                println!("Model ready: {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e, cli.format),
        };
    }

    if cli.sweep {
        let manager = ArtifactManager::new(opts.resolve_temp_dir(), opts.retention);
        return match manager.sweep() {
            Ok(report) => {
                println!(
                    "Swept {}: {} removed, {} kept, {} failed",
                    manager.root().display(),
                    report.removed,
                    report.kept,
                    report.failed
                );
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e, cli.format),
        };
    }

    let Some(input) = cli.input.as_deref() else {
        eprintln!("A video id or URL is required");
        return ExitCode::from(2);
    };

    if cli.info {
        return show_info(input, cli.format).await;
    }

    let resolver = Resolver::new(&opts);
    let sweeper = resolver.artifacts().spawn_sweeper(SWEEP_INTERVAL);
    let result = resolver
        .resolve_str(input, cli.language.as_deref(), cli.force_extract)
        .await;
    sweeper.abort();

    let resolved = match result {
        Ok(r) => r,
        Err(e) => return fail(&e, cli.format),
    };

    eprintln!(
        "Transcript resolved: source: {}, language: {}, {} characters",
        resolved.source(),
        resolved.language(),
        resolved.transcript().chars().count(),
    );

    let output = match cli.format {
        OutputFormat::Text if cli.header => resolved.to_text_with_header(),
        OutputFormat::Text => resolved.transcript().to_string(),
        OutputFormat::Json => match resolved.to_json_pretty() {
            Ok(j) => j,
            Err(e) => return fail(&e, cli.format),
        },
    };
    println!("{output}");
    ExitCode::SUCCESS
}

fn build_options(cli: &Cli) -> tubescript::Result<ResolveOptions> {
    let model = match Model::parse_name(&cli.model) {
        Some(m) => m,
        None => {
            let path = PathBuf::from(&cli.model);
            if !path.exists() {
                return Err(Error::InvalidOption(format!(
                    "unknown model {:?}, use --list-models or pass a path to a ggml file",
                    cli.model
                )));
            }
            Model::Custom(path)
        }
    };

    let mut opts = ResolveOptions::new()
        .model(model)
        .gpu(!cli.no_gpu)
        .gpu_device(cli.gpu_device)
        .min_transcript_chars(cli.min_chars)
        .provider_timeout(Duration::from_secs(cli.provider_timeout))?
        .download_timeout(Duration::from_secs(cli.download_timeout))?
        .recognition_timeout(Duration::from_secs(cli.recognition_timeout))?
        .retention(Duration::from_secs(cli.retention))?;

    if let Some(n) = cli.threads {
        opts = opts.n_threads(n)?;
    }
    if let Some(dir) = &cli.cache_dir {
        opts = opts.cache_dir(dir.clone());
    }
    if let Some(dir) = &cli.temp_dir {
        opts = opts.temp_dir(dir.clone());
    }
    Ok(opts)
}

fn list_models(opts: &ResolveOptions) {
    println!("{:<16} SIZE", "MODEL");
    println!("{:<16} ----", "-----");
    for (name, size) in Model::CATALOG {
        println!("{name:<16} {size}");
    }

    let cache_dir = opts.resolve_cache_dir();
    let cached = tubescript::model::list_cached_models(&cache_dir);
    if !cached.is_empty() {
        println!("\nCached models in {}:", cache_dir.display());
        for path in cached {
            let size = std::fs::metadata(&path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_default();
            println!(
                "  {} ({})",
                path.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                size
            );
        }
    }
}

async fn show_info(input: &str, format: OutputFormat) -> ExitCode {
    let video_id = match VideoId::parse(input) {
        Ok(id) => id,
        Err(e) => return fail(&e, format),
    };
    let info = match YtDlpProvider::new().video_info(&video_id).await {
        Ok(info) => info,
        Err(e) => return fail(&e, format),
    };

    match format {
        OutputFormat::Text => print!("{}", info.summary()),
        OutputFormat::Json => match serde_json::to_string_pretty(&info) {
            Ok(j) => println!("{j}"),
            Err(e) => return fail(&Error::Json(e), format),
        },
    }
    ExitCode::SUCCESS
}

/// Report an error and pick the exit code: 2 for bad input, 1 otherwise.
fn fail(err: &Error, format: OutputFormat) -> ExitCode {
    let payload = err.to_payload();
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&payload) {
            Ok(j) => println!("{j}"),
            Err(_) => eprintln!("Error: {err}"),
        },
        OutputFormat::Text => eprintln!("Error: {err}"),
    }

    if payload.kind.is_client_error() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.0} MB", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:.0} KB", bytes as f64 / 1_000.0)
    }
}
