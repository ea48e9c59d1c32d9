//! Alpha compositing of the source image with the foreground mask

use crate::error::{BgRemovalError, Result};
use crate::mask::FOREGROUND_VALUE;
use crate::types::SegmentationMask;
use image::{Rgba, RgbaImage, RgbImage};
use tracing::instrument;

/// Expand `source` to RGBA, opaque where the mask is foreground and fully
/// transparent elsewhere. Colour channels are copied unchanged.
///
/// # Errors
/// - `Processing` when mask and image dimensions differ
#[instrument(skip_all, fields(width = source.width(), height = source.height()))]
pub fn composite(source: &RgbImage, mask: &SegmentationMask) -> Result<RgbaImage> {
    let (width, height) = source.dimensions();
    if mask.dimensions != (width, height) {
        return Err(BgRemovalError::processing(format!(
            "Mask dimensions {}x{} do not match image dimensions {width}x{height}",
            mask.dimensions.0, mask.dimensions.1
        )));
    }

    let expected_len = width as usize * height as usize;
    if mask.data.len() != expected_len {
        return Err(BgRemovalError::processing(format!(
            "Mask holds {} values, expected {expected_len}",
            mask.data.len()
        )));
    }

    let mut output = RgbaImage::new(width, height);
    for ((target, source_pixel), &mask_value) in output
        .pixels_mut()
        .zip(source.pixels())
        .zip(mask.data.iter())
    {
        let [r, g, b] = source_pixel.0;
        let alpha = if mask_value == FOREGROUND_VALUE { u8::MAX } else { 0 };
        *target = Rgba([r, g, b, alpha]);
    }

    Ok(output)
}
