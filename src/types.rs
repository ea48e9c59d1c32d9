//! Core types for background removal operations

use crate::error::{BgRemovalError, Result};
use image::{ImageBuffer, Luma, RgbaImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Per-pixel class scores produced by the model, shape `(K, H, W)`
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScoreMap {
    scores: Array3<f32>,
}

impl ClassScoreMap {
    /// Wrap a `(K, H, W)` score array
    ///
    /// # Errors
    /// - Fewer than two classes
    /// - Zero height or width
    pub fn new(scores: Array3<f32>) -> Result<Self> {
        let (classes, height, width) = scores.dim();
        if classes < 2 {
            return Err(BgRemovalError::inference(format!(
                "Segmentation output needs at least 2 classes, got {classes}"
            )));
        }
        if height == 0 || width == 0 {
            return Err(BgRemovalError::inference(format!(
                "Segmentation output has empty spatial dimensions {width}x{height}"
            )));
        }
        Ok(Self { scores })
    }

    /// Number of classes `K`
    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.scores.dim().0
    }

    /// Spatial dimensions as (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (usize, usize) {
        let (_, height, width) = self.scores.dim();
        (width, height)
    }

    /// Raw score array
    #[must_use]
    pub fn scores(&self) -> &Array3<f32> {
        &self.scores
    }
}

/// Winning class index per pixel, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIndexMap {
    pub data: Vec<usize>,
    pub dimensions: (u32, u32),
}

impl ClassIndexMap {
    /// Class index at `(x, y)`
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<usize> {
        let index = (y as usize) * (self.dimensions.0 as usize) + x as usize;
        self.data.get(index).copied()
    }
}

/// Binary foreground mask, values in {0, 255}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values, row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Create a new segmentation mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Create mask from a grayscale image
    #[must_use]
    pub fn from_image(image: &ImageBuffer<Luma<u8>, Vec<u8>>) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// - Data length does not match dimensions
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| BgRemovalError::processing("Failed to create image from mask data"))
    }

    /// Resize with nearest-neighbour so values stay binary
    ///
    /// # Errors
    /// - Data length does not match dimensions
    pub fn resize_nearest(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }
        let current = self.to_image()?;
        let resized = image::imageops::resize(
            &current,
            new_width,
            new_height,
            image::imageops::FilterType::Nearest,
        );
        Ok(SegmentationMask::from_image(&resized))
    }

    /// Get mask statistics
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&v| v == u8::MAX).count();
        let foreground_ratio = if total_pixels == 0 {
            0.0
        } else {
            foreground_pixels as f32 / total_pixels as f32
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels: total_pixels - foreground_pixels,
            foreground_ratio,
        }
    }

    /// Save mask as PNG
    ///
    /// # Errors
    /// - Invalid mask data or file write failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_image()?
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
}

/// Timing breakdown for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Decode, downscale and normalization
    pub preprocessing_ms: u64,

    /// Forward pass
    pub inference_ms: u64,

    /// Mask derivation and compositing
    pub postprocessing_ms: u64,

    /// Total end-to-end processing time
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Share of the total spent in the forward pass
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

/// Result of a background removal operation
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA output at the original resolution
    pub image: RgbaImage,

    /// Binary mask at the original resolution
    pub mask: SegmentationMask,

    /// Original image dimensions
    pub original_dimensions: (u32, u32),

    /// Dimensions the model actually ran at
    pub inference_dimensions: (u32, u32),

    pub timings: ProcessingTimings,
}

impl RemovalResult {
    /// Output dimensions (width, height)
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Timing breakdown for this invocation
    #[must_use]
    pub fn timings(&self) -> &ProcessingTimings {
        &self.timings
    }

    /// Encode the output as PNG with its alpha channel
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buffer, image::ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    /// Save the output as PNG with alpha channel
    ///
    /// # Errors
    /// - PNG encoding or file write failure
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }

    /// One-line timing summary for logs
    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.timings;
        format!(
            "total {}ms (preprocess {}ms, inference {}ms, postprocess {}ms)",
            t.total_ms, t.preprocessing_ms, t.inference_ms, t.postprocessing_ms
        )
    }
}
