//! Segmentation model abstraction and the inference runner

use crate::config::Device;
use crate::error::{BgRemovalError, Result};
use crate::types::ClassScoreMap;
use ndarray::{Array3, Array4, Axis};
use tracing::instrument;

/// Output name preferred when a graph exposes several outputs
pub const PRIMARY_OUTPUT_NAME: &str = "out";

/// A loaded segmentation network in inference mode
///
/// Implementations are shared across concurrent invocations, so `forward` takes
/// `&self`; backends whose runtime needs exclusive access lock internally.
pub trait SegmentationModel: Send + Sync + std::fmt::Debug {
    /// Run the forward pass on a `(1, 3, H, W)` batch, returning the primary
    /// `(1, K, H', W')` output
    ///
    /// # Errors
    /// - Runtime or device failure during the forward pass
    /// - Output missing or not four-dimensional
    fn forward(&self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Device the model was bound to at load time
    fn device(&self) -> Device;

    /// Human-readable model name for logs
    fn name(&self) -> &str;
}

/// Index of the primary output among `names`: the one called `out` if present,
/// otherwise the first
#[must_use]
pub fn select_primary_output<S: AsRef<str>>(names: &[S]) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .iter()
            .position(|name| name.as_ref() == PRIMARY_OUTPUT_NAME)
            .unwrap_or(0),
    )
}

/// Run `model` on a single normalized image tensor
///
/// Adds the batch dimension, runs the forward pass and strips the batch
/// dimension from the primary output.
///
/// # Errors
/// - `Processing` if the tensor does not have three channels
/// - `Inference` if the forward pass fails or its output is not a batch of one
///   with at least two classes
#[instrument(skip_all, fields(model = model.name(), device = %model.device()))]
pub fn infer<M: SegmentationModel + ?Sized>(
    model: &M,
    tensor: &Array3<f32>,
) -> Result<ClassScoreMap> {
    let (channels, height, width) = tensor.dim();
    if channels != 3 {
        return Err(BgRemovalError::processing(format!(
            "Expected a 3-channel tensor, got {channels} channels"
        )));
    }

    let batched = tensor.view().insert_axis(Axis(0)).to_owned();
    tracing::debug!(height, width, "running forward pass");

    let output = model.forward(&batched)?;
    let (batch, classes, out_height, out_width) = output.dim();
    if batch != 1 {
        return Err(BgRemovalError::inference(format!(
            "Expected batch size 1 in model output, got {batch}"
        )));
    }
    tracing::debug!(classes, out_height, out_width, "forward pass complete");

    ClassScoreMap::new(output.index_axis_move(Axis(0), 0))
}
