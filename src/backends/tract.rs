//! Tract backend
//!
//! Pure Rust inference through `tract-onnx`, CPU only. The optimized plan is
//! read-only once built, so `run` is reentrant and needs no lock.

use crate::config::Device;
use crate::error::{BgRemovalError, Result};
use crate::inference::{select_primary_output, SegmentationModel};
use crate::models::ModelManager;
use instant::Instant;
use ndarray::Array4;
use tract_onnx::prelude::*;

type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Optimized Tract plan for a segmentation graph
#[derive(Debug)]
pub struct TractSegmentationModel {
    model: TractModel,
    output_index: usize,
    name: String,
}

impl TractSegmentationModel {
    /// List Tract execution providers
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Parse, optimize and plan the model the manager points at
    ///
    /// # Errors
    /// - `ModelLoad` when the weights cannot be read or the graph is not supported
    pub fn load(manager: &ModelManager) -> Result<Self> {
        let load_start = Instant::now();
        let model_data = manager.load_model()?;
        let info = manager.get_info()?;

        log::info!("Initializing Tract backend with model {}", info.name);

        let inference_model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| BgRemovalError::model_load(format!("Failed to load ONNX model: {e}")))?;

        let output_names = output_names(&inference_model)?;
        let output_index = select_primary_output(&output_names)
            .ok_or_else(|| BgRemovalError::model_load("Model graph declares no outputs"))?;

        let model = inference_model
            .into_optimized()
            .map_err(|e| BgRemovalError::model_load(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model_load(format!("Failed to create runnable model: {e}"))
            })?;

        log::info!(
            "Tract backend initialized in {}ms",
            load_start.elapsed().as_millis()
        );

        Ok(Self {
            model,
            output_index,
            name: info.name,
        })
    }
}

fn output_names(model: &InferenceModel) -> Result<Vec<String>> {
    let outlets = model
        .output_outlets()
        .map_err(|e| BgRemovalError::model_load(format!("Failed to read model outputs: {e}")))?;

    Ok(outlets
        .iter()
        .map(|outlet| {
            model
                .outlet_label(*outlet)
                .map_or_else(|| model.node(outlet.node).name.clone(), ToString::to_string)
        })
        .collect())
}

impl SegmentationModel for TractSegmentationModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        let input_tensor = Tensor::from(input.clone());

        let outputs = self
            .model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::inference(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .nth(self.output_index)
            .ok_or_else(|| BgRemovalError::inference("No output tensor found"))?
            .into_arc_tensor();

        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::inference(format!("Failed to convert output tensor: {e}"))
        })?;

        let &[batch, classes, height, width] = output_view.shape() else {
            return Err(BgRemovalError::inference(format!(
                "Expected 4D output tensor, got {}D",
                output_view.ndim()
            )));
        };
        let output = Array4::from_shape_vec(
            (batch, classes, height, width),
            output_view.iter().copied().collect(),
        )
        .map_err(|e| BgRemovalError::inference(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            output.shape()
        );

        Ok(output)
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tract_lists_only_cpu() {
        let providers = TractSegmentationModel::list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, "CPU");
        assert!(providers[0].1);
    }

    #[test]
    fn test_load_rejects_invalid_graph() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"garbage").unwrap();

        let manager = ModelManager::with_external_model(&path).unwrap();
        assert!(matches!(
            TractSegmentationModel::load(&manager),
            Err(BgRemovalError::ModelLoad(_))
        ));
    }
}
