//! ONNX Runtime backend
//!
//! Runs the segmentation graph through `ort` with optional CUDA or `CoreML`
//! acceleration. `Session::run` needs exclusive access, so the session sits
//! behind a mutex and concurrent invocations serialize on the forward pass only.

use crate::config::Device;
use crate::error::{BgRemovalError, Result};
use crate::inference::{select_primary_output, SegmentationModel};
use crate::models::ModelManager;
use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::sync::Mutex;

/// ONNX Runtime session bound to one device
#[derive(Debug)]
pub struct OnnxSegmentationModel {
    session: Mutex<Session>,
    output_name: String,
    device: Device,
    name: String,
}

impl OnnxSegmentationModel {
    /// List ONNX Runtime execution providers with availability and descriptions
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Probing ONNX Runtime providers on {} ({})",
            std::env::consts::OS,
            std::env::consts::ARCH
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                Self::is_device_available(Device::Cuda),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                Self::is_device_available(Device::CoreMl),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Whether ONNX Runtime can execute on `device` in this process
    #[must_use]
    pub fn is_device_available(device: Device) -> bool {
        match device {
            Device::Cpu => true,
            Device::Cuda => {
                OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
                    .unwrap_or(false)
            },
            Device::CoreMl => {
                OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                    .unwrap_or(false)
            },
        }
    }

    /// Build a session from the model the manager points at
    ///
    /// # Errors
    /// - `ModelLoad` when the weights cannot be read or the graph is rejected
    pub fn load(manager: &ModelManager, device: Device, intra_threads: usize) -> Result<Self> {
        let model_data = manager.load_model()?;
        let info = manager.get_info()?;

        let mut builder = Session::builder()
            .map_err(|e| BgRemovalError::model_load(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                BgRemovalError::model_load(format!("Failed to set optimization level: {e}"))
            })?;

        builder = match device {
            Device::Cpu => {
                log::info!("Using CPU execution provider");
                builder
            },
            Device::Cuda => {
                log::info!("Using CUDA execution provider");
                builder
                    .with_execution_providers([CUDAExecutionProvider::default().build()])
                    .map_err(|e| {
                        BgRemovalError::model_load(format!(
                            "Failed to set CUDA execution provider: {e}"
                        ))
                    })?
            },
            Device::CoreMl => {
                log::info!("Using CoreML execution provider");
                builder
                    .with_execution_providers([CoreMLExecutionProvider::default()
                        .with_subgraphs(true)
                        .build()])
                    .map_err(|e| {
                        BgRemovalError::model_load(format!(
                            "Failed to set CoreML execution provider: {e}"
                        ))
                    })?
            },
        };

        let intra_threads = if intra_threads > 0 {
            intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::model_load(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                BgRemovalError::model_load(format!(
                    "Incompatible model '{}': {e}",
                    manager.model_path().display()
                ))
            })?;

        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        let output_index = select_primary_output(&output_names)
            .ok_or_else(|| BgRemovalError::model_load("Model graph declares no outputs"))?;
        let output_name = output_names
            .get(output_index)
            .map(|name| (*name).to_string())
            .ok_or_else(|| BgRemovalError::model_load("Model graph declares no outputs"))?;

        log::debug!(
            "ONNX session ready: model {} ({} bytes), output '{output_name}', {intra_threads} intra-op threads",
            info.name,
            info.size_bytes
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            device,
            name: info.name,
        })
    }
}

impl SegmentationModel for OnnxSegmentationModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let input_value = Value::from_array(input.clone()).map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert input tensor: {e}"))
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| BgRemovalError::inference("ONNX session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::inference(format!("ONNX inference failed: {e}")))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| {
                BgRemovalError::inference(format!("Output '{}' not produced", self.output_name))
            })?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::inference(format!("Failed to extract output tensor: {e}")))?;

        let ndim = output.ndim();
        output
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|_| BgRemovalError::inference(format!("Expected 4D output tensor, got {ndim}D")))
    }

    fn device(&self) -> Device {
        self.device
    }

    fn name(&self) -> &str {
        &self.name
    }
}
