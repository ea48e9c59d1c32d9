//! Model loading and caller-owned memoization
//!
//! [`ModelLoader`] turns a [`RemovalConfig`] plus an already resolved [`Device`]
//! into a shared [`SegmentationModel`]. Loading has no side effects beyond
//! reading weights; keeping a single loaded instance around is the caller's job,
//! done through a [`ModelHandle`].

use crate::cache::ModelCache;
use crate::config::{BackendType, Device, RemovalConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::SegmentationModel;
use crate::models::{ModelManager, ModelSource};
use instant::Instant;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Shared, thread-safe model instance
pub type SharedModel = Arc<dyn SegmentationModel>;

/// Builds segmentation models for a fixed configuration and device
#[derive(Debug, Clone)]
pub struct ModelLoader {
    config: RemovalConfig,
    device: Device,
    cache: Option<ModelCache>,
}

impl ModelLoader {
    /// Create a loader bound to `device`
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Tract backend paired with an accelerator device
    pub fn new(config: RemovalConfig, device: Device) -> Result<Self> {
        config.validate()?;
        if config.backend_type == BackendType::Tract && device.is_accelerator() {
            return Err(BgRemovalError::invalid_config(format!(
                "Tract backend cannot run on {device}"
            )));
        }
        Ok(Self {
            config,
            device,
            cache: None,
        })
    }

    /// Resolve downloaded model ids against `cache` instead of the default cache
    #[must_use]
    pub fn with_cache(mut self, cache: ModelCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Device models are bound to
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Configuration this loader was built with
    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    /// Locate the weights named by the model spec
    ///
    /// An empty downloaded model id picks the first cached model.
    ///
    /// # Errors
    /// - `ModelLoad` when the weights cannot be located
    pub fn model_manager(&self) -> Result<ModelManager> {
        let spec = &self.config.model_spec;
        if let ModelSource::External(path) = &spec.source {
            return ModelManager::with_external_model(path);
        }
        match &self.cache {
            Some(cache) => ModelManager::from_spec(spec, cache),
            None => ModelManager::from_spec(spec, &ModelCache::new()?),
        }
    }

    /// Load the model into the configured backend on the injected device
    ///
    /// # Errors
    /// - `ModelLoad` when weights are missing, unreadable or incompatible, or the
    ///   backend is not compiled in
    #[instrument(skip(self), fields(backend = %self.config.backend_type, device = %self.device))]
    pub fn load_model(&self) -> Result<SharedModel> {
        let load_start = Instant::now();
        let manager = self.model_manager()?;
        tracing::info!(
            model = %self.config.model_spec.source.display_name(),
            path = %manager.model_path().display(),
            "loading segmentation model"
        );

        let model: SharedModel = match self.config.backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Arc::new(crate::backends::OnnxSegmentationModel::load(
                &manager,
                self.device,
                self.config.intra_threads,
            )?),
            #[cfg(feature = "tract")]
            BackendType::Tract => {
                Arc::new(crate::backends::TractSegmentationModel::load(&manager)?)
            },
            #[allow(unreachable_patterns)]
            other => {
                return Err(BgRemovalError::model_load(format!(
                    "Backend '{other}' is not compiled into this build"
                )));
            },
        };

        tracing::info!(
            elapsed_ms = load_start.elapsed().as_millis() as u64,
            "model ready"
        );
        Ok(model)
    }
}

/// Single-initialization cell holding the loaded model
///
/// Concurrent callers racing on the first load wait for one initialization; a
/// failed load leaves the cell empty so a later call can retry.
#[derive(Debug, Default)]
pub struct ModelHandle {
    cell: OnceCell<SharedModel>,
}

impl ModelHandle {
    /// Empty handle; the model is loaded on first use
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that already holds `model`
    #[must_use]
    pub fn preloaded(model: SharedModel) -> Self {
        Self {
            cell: OnceCell::new_with(Some(model)),
        }
    }

    /// The model, if loaded
    #[must_use]
    pub fn get(&self) -> Option<SharedModel> {
        self.cell.get().cloned()
    }

    /// Whether the model has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Return the model, loading it with `loader` on a blocking thread first if needed
    ///
    /// # Errors
    /// - Any load error from [`ModelLoader::load_model`]
    pub async fn get_or_load(&self, loader: &ModelLoader) -> Result<SharedModel> {
        let loader = loader.clone();
        self.get_or_try_init(|| async move {
            tokio::task::spawn_blocking(move || loader.load_model())
                .await
                .map_err(|e| BgRemovalError::model_load(format!("Model loading task failed: {e}")))?
        })
        .await
    }

    /// Return the model, running `init` first if the cell is empty
    ///
    /// # Errors
    /// - Whatever `init` returns
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<SharedModel>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SharedModel>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }
}
