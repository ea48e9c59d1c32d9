//! Model downloading from remote model repositories
//!
//! Downloads a single ONNX graph into the [`ModelCache`], writing into a hidden
//! temporary directory first and renaming it into place once the transfer and
//! digest are complete.
//!
//! Repository credentials are passed explicitly through [`RepositoryCredentials`]
//! and attached only to the request that fetches the weights. Nothing here reads
//! or modifies process environment state.

use crate::cache::{CachedModelMetadata, ModelCache, METADATA_FILE_NAME};
use crate::error::{BgRemovalError, Result};
use crate::models::MODEL_FILE_NAME;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Bearer credentials for a private model repository
#[derive(Clone)]
pub struct RepositoryCredentials {
    bearer_token: String,
}

impl RepositoryCredentials {
    /// Credentials sent as `Authorization: Bearer <token>`
    pub fn bearer<S: Into<String>>(token: S) -> Self {
        Self {
            bearer_token: token.into(),
        }
    }
}

impl std::fmt::Debug for RepositoryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryCredentials")
            .field("bearer_token", &"<redacted>")
            .finish()
    }
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }

    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    credentials: Option<RepositoryCredentials>,
}

impl ModelDownloader {
    /// Create a new model downloader using the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into a specific cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            credentials: None,
        })
    }

    /// Attach credentials to the weight-fetching request
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<RepositoryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Download a model from a URL to the cache, returning its model id
    ///
    /// Accepts either a direct URL to an `.onnx` file or a Hugging Face repository
    /// URL, which resolves to `<repo>/resolve/main/model.onnx`. Already cached
    /// models are not downloaded again.
    ///
    /// # Errors
    /// - Invalid or unsupported URL
    /// - Network or HTTP errors during download
    /// - File system errors while writing the cache
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;

        let model_id = ModelCache::url_to_model_id(url);
        log::info!("Downloading model from: {url}");
        log::info!("Model ID: {model_id}");

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {model_id}");
            return Ok(model_id);
        }

        let final_dir = self.cache.get_model_path(&model_id)?;
        let temp_dir = self.create_temp_download_dir(&model_id)?;

        let progress = if show_progress {
            Some(Self::create_progress_indicator())
        } else {
            None
        };

        let download_url = resolve_download_url(url);
        match self
            .download_file(&download_url, &temp_dir, progress.as_ref())
            .await
        {
            Ok((sha256, size_bytes)) => {
                let metadata = CachedModelMetadata {
                    source_url: url.to_string(),
                    sha256,
                    size_bytes,
                    downloaded_at: chrono::Utc::now(),
                };
                let metadata_path = temp_dir.join(METADATA_FILE_NAME);
                let metadata_json = serde_json::to_string_pretty(&metadata).map_err(|e| {
                    BgRemovalError::processing(format!("Failed to serialize model metadata: {e}"))
                })?;
                fs::write(&metadata_path, metadata_json).map_err(|e| {
                    BgRemovalError::file_io_error("write model metadata", &metadata_path, &e)
                })?;

                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        BgRemovalError::file_io_error(
                            "remove existing model directory",
                            &final_dir,
                            &e,
                        )
                    })?;
                }

                fs::rename(&temp_dir, &final_dir).map_err(|e| {
                    BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
                })?;

                if let Some(pb) = progress {
                    pb.finish_with_message(format!("Downloaded {model_id}"));
                }

                log::info!("Successfully downloaded model: {model_id}");
                Ok(model_id)
            },
            Err(e) => {
                if temp_dir.exists() {
                    if let Err(cleanup_err) = fs::remove_dir_all(&temp_dir) {
                        log::warn!("Failed to cleanup temp directory: {cleanup_err}");
                    }
                }

                if let Some(pb) = progress {
                    pb.finish_with_message("Download failed".to_string());
                }

                Err(e)
            },
        }
    }

    fn create_temp_download_dir(&self, model_id: &str) -> Result<PathBuf> {
        let temp_dir = self.cache.cache_dir().join(format!(".download-{model_id}"));

        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove existing temp directory", &temp_dir, &e)
            })?;
        }

        fs::create_dir_all(&temp_dir)
            .map_err(|e| BgRemovalError::file_io_error("create temp directory", &temp_dir, &e))?;

        Ok(temp_dir)
    }

    fn create_progress_indicator() -> ProgressIndicator {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(100);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            ) {
                pb.set_style(style.progress_chars("#>-"));
            }
            ProgressIndicator::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            ProgressIndicator::NoOp
        }
    }

    /// Stream the model file into `download_dir`, returning its digest and size
    async fn download_file(
        &self,
        url: &str,
        download_dir: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<(String, u64)> {
        let local_path = download_dir.join(MODEL_FILE_NAME);
        log::debug!("Downloading: {url} -> {}", local_path.display());

        if let Some(pb) = progress {
            pb.set_message(format!("Downloading {MODEL_FILE_NAME}"));
        }

        let mut request = self.client.get(url);
        if let Some(credentials) = &self.credentials {
            request = request.bearer_auth(&credentials.bearer_token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BgRemovalError::network_error(&format!("Failed to download {url}"), e))?;

        if !response.status().is_success() {
            return Err(BgRemovalError::Network(format!(
                "HTTP error {} for {url}",
                response.status()
            )));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", &local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| BgRemovalError::Network(format!("Failed to read download stream: {e}")))?;

            if bytes_read == 0 {
                break;
            }

            let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
            hasher.update(chunk);
            file.write_all(chunk)
                .await
                .map_err(|e| BgRemovalError::file_io_error("write to file", &local_path, &e))?;

            downloaded += bytes_read as u64;

            if let Some(pb) = progress {
                if total_size.is_some() {
                    pb.set_position(downloaded);
                } else {
                    pb.set_message(format!(
                        "Downloaded {:.1} MB",
                        downloaded as f64 / 1_048_576.0
                    ));
                }
            }
        }

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", &local_path, &e))?;

        if downloaded == 0 {
            return Err(BgRemovalError::model_load(format!(
                "Downloaded model from {url} is empty"
            )));
        }

        log::debug!("Downloaded {downloaded} bytes to {}", local_path.display());
        Ok((format!("{:x}", hasher.finalize()), downloaded))
    }

    /// Verify a cached model against its recorded SHA-256 digest
    ///
    /// # Errors
    /// - Metadata or model file unreadable
    pub fn verify_cached_model(&self, model_id: &str) -> Result<bool> {
        let metadata = self.cache.read_metadata(model_id)?;
        let model_path = self.cache.get_model_path(model_id)?.join(MODEL_FILE_NAME);
        let contents = fs::read(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("read file for verification", &model_path, &e)
        })?;

        let actual_hash = format!("{:x}", Sha256::digest(&contents));
        if actual_hash == metadata.sha256 {
            Ok(true)
        } else {
            log::warn!(
                "File integrity check failed for {}: expected {}, got {actual_hash}",
                model_path.display(),
                metadata.sha256
            );
            Ok(false)
        }
    }

    /// Get the model cache for other operations
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Map a repository URL to the URL of its ONNX file
///
/// Direct `.onnx` URLs are returned unchanged.
#[must_use]
pub fn resolve_download_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if Path::new(trimmed)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("onnx"))
    {
        return trimmed.to_string();
    }

    if trimmed.starts_with(HUGGINGFACE_PREFIX) {
        format!("{trimmed}/resolve/main/{MODEL_FILE_NAME}")
    } else {
        format!("{trimmed}/{MODEL_FILE_NAME}")
    }
}

/// Validate that a URL points at a supported model repository
///
/// # Errors
/// - Empty URL
/// - Scheme other than `https`
/// - Hugging Face URL without `owner/repo`
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(BgRemovalError::invalid_config("Model URL cannot be empty"));
    }

    if !url.starts_with("https://") {
        return Err(BgRemovalError::invalid_config(format!(
            "Unsupported URL: {url}. Model repositories must be reached over https"
        )));
    }

    if let Some(repo_path) = url.strip_prefix(HUGGINGFACE_PREFIX) {
        let segments = repo_path.split('/').filter(|s| !s.is_empty()).count();
        if segments < 2 {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid Hugging Face repository URL: {url}. Expected https://huggingface.co/owner/repo"
            )));
        }
    }

    Ok(())
}

/// Whether a model argument looks like a URL rather than a path or cache id
#[must_use]
pub fn is_model_url(model_arg: &str) -> bool {
    model_arg.starts_with("https://") || model_arg.starts_with("http://")
}
