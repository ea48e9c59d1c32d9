//! Mask derivation from class scores
//!
//! Any class other than background counts as foreground: the mask is 255 wherever
//! the winning class is not [`BACKGROUND_CLASS_INDEX`] and 0 elsewhere.

use crate::error::{BgRemovalError, Result};
use crate::types::{ClassIndexMap, ClassScoreMap, SegmentationMask};
use tracing::instrument;

/// Class index the segmentation model uses for background
///
/// Fixed by the training label set (Pascal VOC style, where 0 is background).
pub const BACKGROUND_CLASS_INDEX: usize = 0;

/// Mask value for foreground pixels
pub const FOREGROUND_VALUE: u8 = 255;

/// Mask value for background pixels
pub const BACKGROUND_VALUE: u8 = 0;

/// Per-pixel argmax over the class axis, ties resolved to the lowest index
///
/// # Errors
/// - `Processing` when the score map is too large for `u32` dimensions
pub fn argmax(scores: &ClassScoreMap) -> Result<ClassIndexMap> {
    let (width, height) = scores.dimensions();
    let dimensions = (
        u32::try_from(width)
            .map_err(|_| BgRemovalError::processing("Score map width exceeds u32"))?,
        u32::try_from(height)
            .map_err(|_| BgRemovalError::processing("Score map height exceeds u32"))?,
    );

    let array = scores.scores();
    let mut data = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let column = array.slice(ndarray::s![.., y, x]);
            let mut best_class = 0;
            let mut best_score = f32::NEG_INFINITY;
            for (class, &score) in column.iter().enumerate() {
                // Strict comparison keeps the earliest class on ties
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            data.push(best_class);
        }
    }

    Ok(ClassIndexMap { data, dimensions })
}

/// Binarize class indices into a foreground mask at the score map resolution
#[must_use]
pub fn binarize(indices: &ClassIndexMap) -> SegmentationMask {
    let data = indices
        .data
        .iter()
        .map(|&class| {
            if class == BACKGROUND_CLASS_INDEX {
                BACKGROUND_VALUE
            } else {
                FOREGROUND_VALUE
            }
        })
        .collect();
    SegmentationMask::new(data, indices.dimensions)
}

/// Derive a binary mask at `target_size` (width, height) from class scores
///
/// # Errors
/// - `Processing` on dimension overflow or inconsistent mask data
#[instrument(skip(scores), fields(classes = scores.num_classes()))]
pub fn derive_mask(scores: &ClassScoreMap, target_size: (u32, u32)) -> Result<SegmentationMask> {
    let indices = argmax(scores)?;
    let mask = binarize(&indices);
    mask.resize_nearest(target_size.0, target_size.1)
}
