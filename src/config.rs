//! Configuration types for background removal operations

use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};

/// Longest edge fed to the segmentation model
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Upper bound accepted for `max_dimension`
const MAX_DIMENSION_LIMIT: u32 = 16384;

/// Requested execution provider, resolved once into a [`Device`] at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl ExecutionProvider {
    /// Resolve to a concrete device for `backend_type`
    ///
    /// Probes accelerator availability, so call this once at startup and pass
    /// the result to the loader.
    #[must_use]
    pub fn resolve(self, backend_type: BackendType) -> Device {
        crate::utils::ExecutionProviderManager::resolve_device(backend_type, self)
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Concrete compute device the model is bound to
///
/// Produced by [`crate::utils::ExecutionProviderManager::resolve_device`] and
/// injected into the loader. It is never re-evaluated per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    /// General-purpose CPU
    Cpu,
    /// NVIDIA CUDA accelerator
    Cuda,
    /// Apple `CoreML` accelerator
    CoreMl,
}

impl Device {
    /// Whether this device is an accelerator rather than the CPU
    #[must_use]
    pub fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Backend type enumeration for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, CPU only)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Configuration for background removal operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Execution provider requested for inference
    pub execution_provider: ExecutionProvider,

    /// Inference backend
    pub backend_type: BackendType,

    /// Images whose width or height exceed this are downscaled before inference
    pub max_dimension: u32,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Model specification
    pub model_spec: ModelSpec,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::default(),
            backend_type: BackendType::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            intra_threads: 0,
            model_spec: ModelSpec::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use segment_bgremove::{RemovalConfig, ExecutionProvider};
    ///
    /// let config = RemovalConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .max_dimension(512)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_dimension, 512);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_dimension` is zero or larger than 16384
    /// - Tract backend combined with an accelerator provider
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_dimension == 0 || self.max_dimension > MAX_DIMENSION_LIMIT {
            return Err(crate::error::BgRemovalError::config_value_error(
                "max_dimension",
                self.max_dimension,
                "1-16384",
            ));
        }

        if self.backend_type == BackendType::Tract
            && matches!(
                self.execution_provider,
                ExecutionProvider::Cuda | ExecutionProvider::CoreMl
            )
        {
            return Err(crate::error::BgRemovalError::invalid_config(format!(
                "Tract backend only supports CPU execution, got '{}'",
                self.execution_provider
            )));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    /// Set backend type
    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    /// Set the inference resolution bound
    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    /// Set model specification
    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`RemovalConfig::validate`]
    pub fn build(self) -> crate::Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RemovalConfig::default();
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.backend_type, BackendType::Onnx);
        assert_eq!(config.max_dimension, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_dimension() {
        let result = RemovalConfig::builder().max_dimension(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_tract_requires_cpu() {
        let result = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cuda)
            .build();
        assert!(result.is_err());

        let config = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .build()
            .unwrap();
        assert_eq!(config.backend_type, BackendType::Tract);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = RemovalConfig::builder()
            .execution_provider(ExecutionProvider::CoreMl)
            .intra_threads(4)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RemovalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        assert_eq!(Device::Cuda.to_string(), "cuda");
        assert!(Device::Cuda.is_accelerator());
        assert!(!Device::Cpu.is_accelerator());
        assert_eq!(BackendType::Tract.to_string(), "tract");
    }
}
