//! Model cache management for downloaded models
//!
//! Downloaded segmentation models live in an XDG-compliant cache directory, one
//! directory per model holding `model.onnx` and a `model.json` metadata record.

use crate::error::{BgRemovalError, Result};
use crate::models::MODEL_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "SEGMENT_BGREMOVE_CACHE_DIR";

/// File name of the metadata record written next to the model
pub const METADATA_FILE_NAME: &str = "model.json";

/// Metadata recorded for every downloaded model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedModelMetadata {
    /// URL the weights were fetched from
    pub source_url: String,
    /// Hex-encoded SHA-256 of `model.onnx`
    pub sha256: String,
    /// Size of `model.onnx` in bytes
    pub size_bytes: u64,
    /// Download completion time
    pub downloaded_at: chrono::DateTime<chrono::Utc>,
}

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Metadata record, when present and readable
    pub metadata: Option<CachedModelMetadata>,
    /// Size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Create a new model cache manager
    ///
    /// Uses XDG Base Directory specification for cache location:
    /// - Linux/macOS: `~/.cache/segment-bgremove/models/`
    /// - Windows: `%LOCALAPPDATA%/segment-bgremove/models/`
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(cache_dir)
    }

    /// Create a cache rooted at `cache_root/models`
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_dir(cache_root: &Path) -> Result<Self> {
        Self::ensure_dir(cache_root.join("models"))
    }

    fn ensure_dir(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }

        Ok(Self { cache_dir })
    }

    fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("segment-bgremove")
            .join("models"))
    }

    /// Directory holding all cached models
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Generate a model ID from a URL
    ///
    /// Hugging Face URLs map to `owner--repo`; anything else maps to a short
    /// SHA-256 based identifier.
    ///
    /// # Examples
    /// ```
    /// use segment_bgremove::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id(
    ///     "https://huggingface.co/acme/deeplab-onnx/resolve/main/model.onnx",
    /// );
    /// assert_eq!(id, "acme--deeplab-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(rest) = url.strip_prefix(prefix) {
            let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).take(2).collect();
            if segments.len() == 2 {
                return segments.join("--");
            }
        }

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let hash_string = format!("url-{:x}", hasher.finalize());
        hash_string.get(..16).unwrap_or(&hash_string).to_string()
    }

    /// Check if a model is cached
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        self.get_model_path(model_id)
            .is_ok_and(|path| Self::validate_model_directory(&path))
    }

    /// Whether `model_id` names a single directory directly under the cache root
    ///
    /// Empty ids, path separators, absolute paths and ids starting with `.`
    /// (including `..` and temporary download directories) are rejected.
    #[must_use]
    pub fn is_valid_model_id(model_id: &str) -> bool {
        if model_id.is_empty() || model_id.starts_with('.') || model_id.contains(['/', '\\']) {
            return false;
        }
        let mut components = Path::new(model_id).components();
        matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
    }

    /// Get the path to a cached model directory (may not exist)
    ///
    /// # Errors
    /// - `InvalidConfig` when the id could resolve outside the cache directory
    pub fn get_model_path(&self, model_id: &str) -> Result<PathBuf> {
        if !Self::is_valid_model_id(model_id) {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid model id '{model_id}': expected a cache entry name such as owner--repo"
            )));
        }
        Ok(self.cache_dir.join(model_id))
    }

    /// Read the metadata record of a cached model
    ///
    /// # Errors
    /// - Metadata file unreadable or malformed
    pub fn read_metadata(&self, model_id: &str) -> Result<CachedModelMetadata> {
        let path = self.get_model_path(model_id)?.join(METADATA_FILE_NAME);
        let content = fs::read_to_string(&path)
            .map_err(|e| BgRemovalError::file_io_error("read model metadata", &path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            BgRemovalError::model_load(format!("Invalid metadata for '{model_id}': {e}"))
        })
    }

    /// Scan cache directory and return all available models, sorted by id
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(models);
        }

        for path in self.model_directories()? {
            let Some(model_id) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if !Self::validate_model_directory(&path) {
                log::debug!("Skipping invalid model directory: {}", path.display());
                continue;
            }

            models.push(CachedModelInfo {
                model_id: model_id.to_string(),
                metadata: self.read_metadata(model_id).ok(),
                size_bytes: Self::calculate_directory_size(&path).unwrap_or(0),
                path,
            });
        }

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Id of the first cached model, if any
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn first_cached_model(&self) -> Result<Option<String>> {
        Ok(self
            .scan_cached_models()?
            .into_iter()
            .next()
            .map(|info| info.model_id))
    }

    /// Clear all cached models, returning the removed ids
    ///
    /// # Errors
    /// - Failed to access or remove model directories
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed_models = Vec::new();

        if !self.cache_dir.exists() {
            return Ok(removed_models);
        }

        for path in self.model_directories()? {
            let model_id = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("unknown")
                .to_string();

            log::info!("Removing cached model: {model_id}");
            fs::remove_dir_all(&path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model directory", &path, &e)
            })?;
            removed_models.push(model_id);
        }

        removed_models.sort();
        Ok(removed_models)
    }

    /// Clear a specific cached model
    ///
    /// Returns `false` when the model was not cached.
    ///
    /// # Errors
    /// - `InvalidConfig` for ids that do not name a cache entry
    /// - Failed to remove model directory
    pub fn clear_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id)?;

        if !model_path.is_dir() {
            return Ok(false);
        }

        log::info!("Removing cached model: {model_id}");
        fs::remove_dir_all(&model_path).map_err(|e| {
            BgRemovalError::file_io_error("remove specific cached model", &model_path, &e)
        })?;

        Ok(true)
    }

    fn model_directories(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;

        let mut directories = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            if path.is_dir() && !Self::is_temp_directory(&path) {
                directories.push(path);
            }
        }
        Ok(directories)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        model_path.join(MODEL_FILE_NAME).is_file()
    }

    fn is_temp_directory(path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
    }

    fn calculate_directory_size(dir_path: &Path) -> Result<u64> {
        let mut total_size = 0;

        Self::visit_dir(dir_path, &mut total_size)
            .map_err(|e| BgRemovalError::file_io_error("calculate directory size", dir_path, &e))?;

        Ok(total_size)
    }

    fn visit_dir(dir: &Path, total: &mut u64) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::visit_dir(&path, total)?;
            } else {
                *total += entry.metadata()?.len();
            }
        }
        Ok(())
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS.get(unit).copied().unwrap_or("B"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_model(cache: &ModelCache, model_id: &str, bytes: &[u8]) {
        let dir = cache.get_model_path(model_id).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(MODEL_FILE_NAME), bytes).unwrap();
    }

    #[test]
    fn test_url_to_model_id() {
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/acme/seg"),
            "acme--seg"
        );
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/acme/seg/resolve/main/model.onnx"),
            "acme--seg"
        );

        let hashed = ModelCache::url_to_model_id("https://example.com/models/seg.onnx");
        assert!(hashed.starts_with("url-"));
        assert_eq!(hashed.len(), 16);
        assert_eq!(
            hashed,
            ModelCache::url_to_model_id("https://example.com/models/seg.onnx")
        );
    }

    #[test]
    fn test_scan_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();

        write_model(&cache, "b--model", b"bbbb");
        write_model(&cache, "a--model", b"aa");
        fs::create_dir_all(cache.cache_dir().join("incomplete")).unwrap();
        fs::create_dir_all(cache.cache_dir().join(".download-tmp")).unwrap();

        let models = cache.scan_cached_models().unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["a--model", "b--model"]);
        assert_eq!(models.first().unwrap().size_bytes, 2);
        assert_eq!(cache.first_cached_model().unwrap().as_deref(), Some("a--model"));

        assert!(cache.is_model_cached("a--model"));
        assert!(!cache.is_model_cached("incomplete"));
        assert!(!cache.is_model_cached(""));

        assert!(cache.clear_model("a--model").unwrap());
        assert!(!cache.clear_model("a--model").unwrap());

        let removed = cache.clear_all_models().unwrap();
        assert_eq!(removed, vec!["b--model", "incomplete"]);
        assert!(cache.scan_cached_models().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();
        write_model(&cache, "acme--seg", b"graph");

        let metadata = CachedModelMetadata {
            source_url: "https://huggingface.co/acme/seg".to_string(),
            sha256: "abc".to_string(),
            size_bytes: 5,
            downloaded_at: chrono::Utc::now(),
        };
        fs::write(
            cache.get_model_path("acme--seg").unwrap().join(METADATA_FILE_NAME),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();

        assert_eq!(cache.read_metadata("acme--seg").unwrap(), metadata);
    }

    #[test]
    fn test_model_id_validation() {
        for valid in ["acme--seg", "url-0123456789ab", "model.v2"] {
            assert!(ModelCache::is_valid_model_id(valid), "{valid}");
        }
        for invalid in ["", ".", "..", ".download-acme", "../x", "a/b", "a\\b", "/tmp/models"] {
            assert!(!ModelCache::is_valid_model_id(invalid), "{invalid}");
        }
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
