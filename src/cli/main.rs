//! Background removal CLI
//!
//! Removes the background of a single JPEG or PNG image and writes an RGBA PNG.

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache},
    download::{is_model_url, validate_model_url, ModelDownloader},
    loader::{ModelHandle, ModelLoader},
    processor::BackgroundRemovalProcessor,
    tracing_config::{init_cli_tracing, spans},
    utils::ExecutionProviderManager,
};
use anyhow::{Context, Result};
use clap::Parser;
use instant::Instant;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::{info, Instrument};

/// Remove image backgrounds with a semantic segmentation model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "segment-bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image (JPEG or PNG), or "-" for stdin
    #[arg(value_name = "INPUT", required_unless_present_any = ["show_providers", "only_download", "list_models", "clear_cache"])]
    pub input: Option<String>,

    /// Output PNG path, or "-" for stdout [default: <INPUT>_no_bg.png]
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Model URL, cached model id, or path to an ONNX file or model folder
    /// [default: first cached model]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Execution provider in format backend:provider (e.g., onnx:auto, onnx:cuda, tract:cpu)
    #[arg(short, long, default_value = "onnx:auto")]
    pub execution_provider: String,

    /// Bearer token for private model repositories, sent only with the download request
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Images larger than this on either side are downscaled before inference
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,

    /// Number of intra-op threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Use a custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v: debug for this crate, -vv: trace everything)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download the model given with --model and exit
    #[arg(long)]
    pub only_download: bool,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear one model) and exit
    #[arg(long)]
    pub clear_cache: bool,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    let cache = CliConfigBuilder::cache(&cli)?;

    if cli.list_models {
        return list_cached_models(&cache);
    }

    if cli.clear_cache {
        return clear_cache_models(&cli, &cache);
    }

    if cli.only_download {
        return download_model_only(&cli, cache).await;
    }

    let input = cli
        .input
        .clone()
        .context("An input image is required")?;
    let config = CliConfigBuilder::from_cli(&cli)?;

    ensure_model_available(&cli, &cache).await?;

    let device = config.execution_provider.resolve(config.backend_type);
    info!(
        backend = %config.backend_type,
        requested = %config.execution_provider,
        %device,
        "starting background removal"
    );

    let loader = ModelLoader::new(config.clone(), device)
        .context("Invalid loader configuration")?
        .with_cache(cache);
    let handle = ModelHandle::new();
    let model = handle
        .get_or_load(&loader)
        .instrument(spans::model_loading(
            &config.model_spec.source.display_name(),
            &device.to_string(),
        ))
        .await
        .context("Failed to load segmentation model")?;

    let processor = BackgroundRemovalProcessor::new(model, &config)
        .context("Failed to create background removal processor")?;

    let start_time = Instant::now();
    let input_bytes = read_input(&input).await?;
    let output_path = CliConfigBuilder::output_path(&input, cli.output.as_deref());

    let span = spans::file_processing(std::path::Path::new(&input));
    let result = tokio::task::spawn_blocking(move || {
        let _entered = span.entered();
        processor.process_bytes(&input_bytes)
    })
    .await
    .context("Processing task panicked")?
    .with_context(|| format!("Failed to remove background from {input}"))?;

    let png = result.to_png_bytes().context("Failed to encode PNG")?;
    match &output_path {
        Some(path) => {
            tokio::fs::write(path, &png)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(output = %path.display(), "saved result");
        },
        None => write_stdout(&png)?,
    }

    info!(
        "Processed {input} ({}x{}) in {:.2}s, {:.0}% in inference",
        result.original_dimensions.0,
        result.original_dimensions.1,
        start_time.elapsed().as_secs_f64(),
        result.timings.inference_ratio() * 100.0
    );

    Ok(())
}

/// Download the model named by a URL `--model` if it is not cached yet
async fn ensure_model_available(cli: &Cli, cache: &ModelCache) -> Result<()> {
    let Some(model_arg) = cli.model.as_deref() else {
        return Ok(());
    };
    if !is_model_url(model_arg) {
        return Ok(());
    }

    let model_id = ModelCache::url_to_model_id(model_arg);
    if cache.is_model_cached(&model_id) {
        return Ok(());
    }

    eprintln!("Model not cached, downloading {model_arg}");
    let downloader = ModelDownloader::with_cache(cache.clone())
        .context("Failed to create model downloader")?
        .with_credentials(CliConfigBuilder::credentials(cli));
    downloader
        .download_model(model_arg, cli.output.as_deref() != Some("-"))
        .instrument(spans::download(model_arg))
        .await
        .context("Failed to download model")?;
    Ok(())
}

fn show_provider_diagnostics() {
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("Backend and execution provider diagnostics");
    println!("System: {cpu_count} CPU cores detected\n");

    println!("Execution providers:");
    for provider in ExecutionProviderManager::list_all_providers() {
        let status = if provider.available {
            "available"
        } else {
            "not available"
        };
        println!("  {:<12} {:<14} {}", provider.name, status, provider.description);
    }

    println!("\nUsage:");
    println!("  -e onnx:auto    auto-select the best ONNX provider (default)");
    println!("  -e onnx:cuda    NVIDIA CUDA, falls back to CPU when unavailable");
    println!("  -e onnx:coreml  Apple CoreML, falls back to CPU when unavailable");
    println!("  -e tract:cpu    pure Rust backend");
}

fn list_cached_models(cache: &ModelCache) -> Result<()> {
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("Cached models in {}", cache.cache_dir().display());
    if models.is_empty() {
        println!("No cached models found.");
        println!("Download one with: segment-bgremove --only-download --model <URL>");
        return Ok(());
    }

    for model in models {
        println!("  {} ({})", model.model_id, format_size(model.size_bytes));
        if let Some(metadata) = &model.metadata {
            println!("    source: {}", metadata.source_url);
            println!("    sha256: {}", metadata.sha256);
        }
    }
    Ok(())
}

fn clear_cache_models(cli: &Cli, cache: &ModelCache) -> Result<()> {
    if let Some(model_id) = &cli.model {
        let model_id = if is_model_url(model_id) {
            ModelCache::url_to_model_id(model_id)
        } else {
            model_id.clone()
        };
        if cache
            .clear_model(&model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("Removed model: {model_id}");
        } else {
            println!("Model '{model_id}' not found in cache");
        }
        return Ok(());
    }

    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("Cache was already empty");
    } else {
        println!("Removed {} model(s): {}", removed.len(), removed.join(", "));
    }
    Ok(())
}

async fn download_model_only(cli: &Cli, cache: ModelCache) -> Result<()> {
    let model_url = cli
        .model
        .as_deref()
        .context("--only-download requires --model <URL>")?;
    validate_model_url(model_url).context("Invalid model URL")?;

    let downloader = ModelDownloader::with_cache(cache)
        .context("Failed to create model downloader")?
        .with_credentials(CliConfigBuilder::credentials(cli));

    let model_id = downloader
        .download_model(model_url, true)
        .instrument(spans::download(model_url))
        .await
        .context("Failed to download model")?;

    println!("Downloaded model: {model_id}");
    println!(
        "Cache location: {}",
        downloader.cache().get_model_path(&model_id)?.display()
    );
    Ok(())
}

async fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        return tokio::task::spawn_blocking(|| {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read stdin")?;
            Ok(buffer)
        })
        .await
        .context("Stdin reader panicked")?;
    }

    tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {input}"))
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(data).context("Failed to write to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}
