#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

//! # Segmentation Background Removal
//!
//! Removes the background of JPEG and PNG photographs with a semantic
//! segmentation network. Every pixel the network labels as any class other
//! than background is kept; everything else becomes fully transparent.
//!
//! ## Pipeline
//!
//! 1. Decode the image and downscale it so the longest edge fits
//!    [`RemovalConfig::max_dimension`] (1024 by default, Lanczos3)
//! 2. Normalize into a `(3, H, W)` tensor with the ImageNet mean and standard deviation
//! 3. Run the model once and keep the primary output (`out`, or the first output)
//! 4. Take the per-pixel argmax over classes and binarize it into a 0/255 mask
//! 5. Upscale the mask to the original size and use it as the alpha channel
//!
//! ## Features
//!
//! - **Backends**: ONNX Runtime (CPU, CUDA, `CoreML`) and Tract (pure Rust, CPU)
//! - **Model Management**: Download models over HTTPS into a local cache, with
//!   optional bearer credentials for private repositories
//! - **Shared Model**: The model is loaded once and shared across concurrent requests
//! - **History Store**: Per-user storage of original and processed images
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segment_bgremove::{
//!     remove_background_from_reader, ExecutionProvider, ModelDownloader, ModelSpec,
//!     RemovalConfig,
//! };
//! use tokio::fs::File;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let downloader = ModelDownloader::new()?;
//! let model_id = downloader
//!     .download_model("https://huggingface.co/acme/deeplabv3-onnx", true)
//!     .await?;
//!
//! let config = RemovalConfig::builder()
//!     .execution_provider(ExecutionProvider::Auto)
//!     .model_spec(ModelSpec::downloaded(model_id))
//!     .build()?;
//!
//! let file = File::open("input.jpg").await?;
//! let result = remove_background_from_reader(file, &config).await?;
//! result.save_png("output.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Serving many requests
//!
//! The convenience functions above load the model on every call. Long-running
//! services load it once through a [`ModelHandle`] and clone a
//! [`BackgroundRemovalProcessor`] per request:
//!
//! ```rust,no_run
//! use segment_bgremove::{BackgroundRemovalProcessor, ModelHandle, ModelLoader, RemovalConfig};
//!
//! # async fn example(uploads: Vec<Vec<u8>>) -> anyhow::Result<()> {
//! let config = RemovalConfig::default();
//! let device = config.execution_provider.resolve(config.backend_type);
//! let loader = ModelLoader::new(config.clone(), device)?;
//!
//! let handle = ModelHandle::new();
//! let processor = BackgroundRemovalProcessor::new(handle.get_or_load(&loader).await?, &config)?;
//!
//! for upload in uploads {
//!     let processor = processor.clone();
//!     tokio::task::spawn_blocking(move || processor.process_bytes(&upload)).await??;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Command-line interface, progress bars and tracing subscriber setup
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod download;
pub mod error;
pub mod history;
pub mod inference;
pub mod loader;
pub mod mask;
pub mod models;
pub mod processor;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::AsyncRead;

pub use backends::MockSegmentationModel;
#[cfg(feature = "onnx")]
pub use backends::OnnxSegmentationModel;
#[cfg(feature = "tract")]
pub use backends::TractSegmentationModel;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use compositor::composite;
pub use config::{BackendType, Device, ExecutionProvider, RemovalConfig, RemovalConfigBuilder};
pub use download::{validate_model_url, ModelDownloader, RepositoryCredentials};
pub use error::{BgRemovalError, Result};
pub use history::{GenerationStore, GenerationSummary, InMemoryGenerationStore};
pub use inference::{infer, SegmentationModel};
pub use loader::{ModelHandle, ModelLoader, SharedModel};
pub use mask::{argmax, binarize, derive_mask, BACKGROUND_CLASS_INDEX};
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use processor::BackgroundRemovalProcessor;
pub use types::{
    ClassIndexMap, ClassScoreMap, ProcessingTimings, RemovalResult, SegmentationMask,
};
pub use utils::{ExecutionProviderManager, ImagePreprocessor, PreparedImage, ProviderInfo};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat};

/// Remove the background from an encoded JPEG or PNG image
///
/// Loads the configured model, runs the pipeline once and returns the RGBA
/// result at the original resolution. Model loading and inference run on the
/// blocking thread pool.
///
/// # Examples
///
/// ```rust,no_run
/// use segment_bgremove::{remove_background_from_bytes, ModelSpec, RemovalConfig};
///
/// # async fn example(upload_bytes: Vec<u8>) -> anyhow::Result<()> {
/// let config = RemovalConfig::builder()
///     .model_spec(ModelSpec::external("models/deeplabv3.onnx"))
///     .build()?;
/// let result = remove_background_from_bytes(&upload_bytes, &config).await?;
/// let png = result.to_png_bytes()?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let processor = load_processor(config).await?;
    let image_bytes = image_bytes.to_vec();

    tokio::task::spawn_blocking(move || processor.process_bytes(&image_bytes))
        .await
        .map_err(|e| BgRemovalError::processing(format!("Processing task failed: {e}")))?
}

/// Remove the background from an async reader stream
///
/// The stream is read to the end before decoding.
///
/// # Examples
///
/// ```rust,no_run
/// use segment_bgremove::{remove_background_from_reader, RemovalConfig};
/// use tokio::fs::File;
///
/// # async fn example() -> anyhow::Result<()> {
/// let file = File::open("photo.jpg").await?;
/// let result = remove_background_from_reader(file, &RemovalConfig::default()).await?;
/// result.save_png("photo_no_bg.png")?;
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &RemovalConfig,
) -> Result<RemovalResult> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    remove_background_from_bytes(&buffer, config).await
}

async fn load_processor(config: &RemovalConfig) -> Result<BackgroundRemovalProcessor> {
    let device = config.execution_provider.resolve(config.backend_type);
    let loader = ModelLoader::new(config.clone(), device)?;
    let model = ModelHandle::new().get_or_load(&loader).await?;
    BackgroundRemovalProcessor::new(model, config)
}
