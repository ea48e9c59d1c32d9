//! Model sources and on-disk model resolution

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the ONNX graph inside a model directory
pub const MODEL_FILE_NAME: &str = "model.onnx";

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path (an `.onnx` file or a directory holding `model.onnx`)
    External(PathBuf),
    /// Downloaded model from cache by model ID
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => {
                format!("cached:{model_id}")
            },
        }
    }
}

/// Complete model specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
}

impl Default for ModelSpec {
    fn default() -> Self {
        // Resolved to the first cached model at runtime
        Self {
            source: ModelSource::Downloaded(String::new()),
        }
    }
}

impl ModelSpec {
    /// Spec for a local model file or directory
    #[must_use]
    pub fn external<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            source: ModelSource::External(path.into()),
        }
    }

    /// Spec for a model in the download cache
    #[must_use]
    pub fn downloaded<S: Into<String>>(model_id: S) -> Self {
        Self {
            source: ModelSource::Downloaded(model_id.into()),
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Resolves a [`ModelSpec`] to ONNX bytes on disk
#[derive(Debug)]
pub struct ModelManager {
    model_path: PathBuf,
    name: String,
}

impl ModelManager {
    /// Create a model manager from a model specification
    ///
    /// An empty downloaded model id picks the first cached model.
    ///
    /// # Errors
    /// - External path missing, or a directory without `model.onnx`
    /// - Downloaded model id not present in the cache, or the cache is empty
    pub fn from_spec(spec: &ModelSpec, cache: &ModelCache) -> Result<Self> {
        match &spec.source {
            ModelSource::External(path) => Self::with_external_model(path),
            ModelSource::Downloaded(model_id) if model_id.is_empty() => {
                let first = cache.first_cached_model()?.unwrap_or_default();
                Self::with_downloaded_model(cache, &first)
            },
            ModelSource::Downloaded(model_id) => Self::with_downloaded_model(cache, model_id),
        }
    }

    /// Create a model manager for a local file or model directory
    ///
    /// # Errors
    /// - Path does not exist
    /// - Directory does not contain `model.onnx`
    pub fn with_external_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BgRemovalError::model_load(format!(
                "Model path does not exist: {}",
                path.display()
            )));
        }

        let model_path = if path.is_dir() {
            path.join(MODEL_FILE_NAME)
        } else {
            path.to_path_buf()
        };

        if !model_path.is_file() {
            return Err(BgRemovalError::model_load(format!(
                "No {MODEL_FILE_NAME} found in model directory: {}",
                path.display()
            )));
        }

        let name = path
            .file_stem()
            .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().to_string());

        Ok(Self { model_path, name })
    }

    /// Create a model manager for a model held in the download cache
    ///
    /// # Errors
    /// - Empty model id
    /// - Model not cached
    pub fn with_downloaded_model(cache: &ModelCache, model_id: &str) -> Result<Self> {
        if model_id.is_empty() {
            return Err(BgRemovalError::model_load(
                "No model specified and no cached model available",
            ));
        }
        if !cache.is_model_cached(model_id) {
            return Err(BgRemovalError::model_load(format!(
                "Model '{model_id}' is not cached. Download it first with --only-download"
            )));
        }

        Ok(Self {
            model_path: cache.get_model_path(model_id)?.join(MODEL_FILE_NAME),
            name: model_id.to_string(),
        })
    }

    /// Load model data
    ///
    /// # Errors
    /// - File I/O errors when reading the ONNX graph
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path).map_err(|e| {
            BgRemovalError::model_load(format!(
                "Failed to read model '{}': {e}",
                self.model_path.display()
            ))
        })
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        let metadata = fs::metadata(&self.model_path)
            .map_err(|e| BgRemovalError::file_io_error("stat model", &self.model_path, &e))?;
        Ok(ModelInfo {
            name: self.name.clone(),
            path: self.model_path.clone(),
            size_bytes: metadata.len(),
        })
    }

    /// Path to the ONNX graph
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}
