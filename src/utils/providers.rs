//! Execution provider parsing and device resolution

use crate::{
    config::{BackendType, Device, ExecutionProvider},
    error::{BgRemovalError, Result},
};

/// Information about an execution provider
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub execution_provider: ExecutionProvider,
    pub available: bool,
    pub description: String,
}

/// Utility for parsing execution providers and resolving them to devices
pub struct ExecutionProviderManager;

impl ExecutionProviderManager {
    /// Parse execution provider string in format "backend:provider"
    ///
    /// # Examples
    /// ```rust
    /// use segment_bgremove::utils::ExecutionProviderManager;
    /// use segment_bgremove::{BackendType, ExecutionProvider};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let (backend, provider) = ExecutionProviderManager::parse_provider_string("tract:cpu")?;
    /// assert_eq!(backend, BackendType::Tract);
    /// assert_eq!(provider, ExecutionProvider::Cpu);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    /// - Unknown backend or provider name
    pub fn parse_provider_string(provider_str: &str) -> Result<(BackendType, ExecutionProvider)> {
        let Some((backend, provider)) = provider_str.split_once(':') else {
            return match provider_str {
                "onnx" => Ok((BackendType::Onnx, ExecutionProvider::Auto)),
                "tract" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(BgRemovalError::invalid_config(
                    "Invalid provider format. Use backend:provider (e.g., onnx:auto, tract:cpu)",
                )),
            };
        };

        match backend {
            "onnx" => {
                let execution_provider = match provider {
                    "auto" => ExecutionProvider::Auto,
                    "cpu" => ExecutionProvider::Cpu,
                    "cuda" => ExecutionProvider::Cuda,
                    "coreml" => ExecutionProvider::CoreMl,
                    _ => {
                        return Err(BgRemovalError::invalid_config(format!(
                            "Unknown ONNX provider: {provider}. Supported: auto, cpu, cuda, coreml"
                        )));
                    },
                };
                Ok((BackendType::Onnx, execution_provider))
            },
            "tract" => match provider {
                "cpu" => Ok((BackendType::Tract, ExecutionProvider::Cpu)),
                _ => Err(BgRemovalError::invalid_config(format!(
                    "Unknown Tract provider: {provider}. Tract only supports 'cpu'"
                ))),
            },
            _ => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend: {backend}. Supported backends: onnx, tract"
            ))),
        }
    }

    /// Resolve the requested provider to the concrete device the model binds to
    ///
    /// Called once at startup. Unavailable accelerators fall back to the CPU with
    /// a warning; `Auto` prefers CUDA, then `CoreML`, then the CPU.
    #[must_use]
    pub fn resolve_device(backend_type: BackendType, provider: ExecutionProvider) -> Device {
        if backend_type == BackendType::Tract {
            return Device::Cpu;
        }

        let device = match provider {
            ExecutionProvider::Cpu => Device::Cpu,
            ExecutionProvider::Cuda => Self::accelerator_or_cpu(Device::Cuda),
            ExecutionProvider::CoreMl => Self::accelerator_or_cpu(Device::CoreMl),
            ExecutionProvider::Auto => [Device::Cuda, Device::CoreMl]
                .into_iter()
                .find(|&device| Self::is_device_available(device))
                .unwrap_or(Device::Cpu),
        };

        tracing::info!(%provider, %device, "resolved execution device");
        device
    }

    fn accelerator_or_cpu(device: Device) -> Device {
        if Self::is_device_available(device) {
            device
        } else {
            log::warn!("{device} execution provider requested but not available, falling back to CPU");
            Device::Cpu
        }
    }

    /// Whether the ONNX runtime can execute on `device`
    #[must_use]
    pub fn is_device_available(device: Device) -> bool {
        #[cfg(feature = "onnx")]
        {
            crate::backends::OnnxSegmentationModel::is_device_available(device)
        }
        #[cfg(not(feature = "onnx"))]
        {
            device == Device::Cpu
        }
    }

    /// Get a list of all provider combinations with availability status
    #[must_use]
    pub fn list_all_providers() -> Vec<ProviderInfo> {
        let mut providers = Vec::new();

        #[cfg(feature = "onnx")]
        let onnx_availability: std::collections::HashMap<String, bool> =
            crate::backends::OnnxSegmentationModel::list_providers()
                .into_iter()
                .map(|(name, available, _)| (name.to_lowercase(), available))
                .collect();
        #[cfg(not(feature = "onnx"))]
        let onnx_availability: std::collections::HashMap<String, bool> =
            std::collections::HashMap::new();

        let onnx_suffix = if cfg!(feature = "onnx") {
            ""
        } else {
            " (feature disabled)"
        };

        let onnx_entries = [
            (ExecutionProvider::Auto, "ONNX Runtime with auto-selected provider"),
            (ExecutionProvider::Cpu, "ONNX Runtime CPU execution"),
            (ExecutionProvider::Cuda, "ONNX Runtime CUDA GPU acceleration"),
            (
                ExecutionProvider::CoreMl,
                "ONNX Runtime CoreML (Apple Silicon) acceleration",
            ),
        ];
        for (execution_provider, description) in onnx_entries {
            let available = match execution_provider {
                ExecutionProvider::Auto => onnx_availability.values().any(|&a| a),
                other => onnx_availability
                    .get(&other.to_string())
                    .copied()
                    .unwrap_or(false),
            };
            providers.push(ProviderInfo {
                name: Self::provider_to_string(BackendType::Onnx, execution_provider),
                backend_type: BackendType::Onnx,
                execution_provider,
                available,
                description: format!("{description}{onnx_suffix}"),
            });
        }

        #[cfg(feature = "tract")]
        for (name, available, description) in crate::backends::TractSegmentationModel::list_providers() {
            providers.push(ProviderInfo {
                name: format!("tract:{}", name.to_lowercase()),
                backend_type: BackendType::Tract,
                execution_provider: ExecutionProvider::Cpu,
                available,
                description,
            });
        }

        #[cfg(not(feature = "tract"))]
        providers.push(ProviderInfo {
            name: "tract:cpu".to_string(),
            backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::Cpu,
            available: false,
            description: "Pure Rust CPU inference via Tract (feature disabled)".to_string(),
        });

        providers
    }

    /// Convert backend type and execution provider back to string
    #[must_use]
    pub fn provider_to_string(backend_type: BackendType, provider: ExecutionProvider) -> String {
        format!("{backend_type}:{provider}")
    }
}
