//! Image decoding and tensor preparation
//!
//! Turns raw upload bytes into the normalized `(3, H, W)` tensor the segmentation
//! model expects, downscaling large inputs while remembering the original size so
//! the mask can be rendered back at full resolution.

use crate::error::{BgRemovalError, Result};
use image::{DynamicImage, RgbImage};
use ndarray::Array3;
use std::io::{Read, Seek, SeekFrom};

/// Per-channel mean applied after scaling to `[0, 1]` (RGB order)
pub const NORMALIZATION_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation (RGB order)
pub const NORMALIZATION_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Decoded input plus the tensor derived from it
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Full-resolution RGB source
    pub source: RgbImage,
    /// Normalized tensor, shape `(3, H, W)` at the inference resolution
    pub tensor: Array3<f32>,
    /// Source dimensions (width, height)
    pub original_size: (u32, u32),
    /// Tensor dimensions (width, height)
    pub inference_size: (u32, u32),
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Decode bytes and build the normalized tensor
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a supported image
    /// - `Processing` when the computed inference size is degenerate
    pub fn preprocess(bytes: &[u8], max_dimension: u32) -> Result<PreparedImage> {
        let image = Self::decode(bytes)?;
        Self::prepare(&image, max_dimension)
    }

    /// Rewind a seekable source to its start, then preprocess its contents
    ///
    /// # Errors
    /// - `Io` when seeking or reading fails
    /// - Any error from [`ImagePreprocessor::preprocess`]
    pub fn preprocess_reader<R: Read + Seek>(
        reader: &mut R,
        max_dimension: u32,
    ) -> Result<PreparedImage> {
        let bytes = read_from_start(reader)?;
        Self::preprocess(&bytes, max_dimension)
    }

    /// Decode bytes into an image
    ///
    /// # Errors
    /// - `Decode` for empty, truncated or unsupported input
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(BgRemovalError::decode("Input is empty"));
        }
        image::load_from_memory(bytes)
            .map_err(|e| BgRemovalError::decode(format!("Failed to decode input image: {e}")))
    }

    /// Downscale and normalize an already decoded image
    ///
    /// # Errors
    /// - `Processing` when the image has a zero dimension
    pub fn prepare(image: &DynamicImage, max_dimension: u32) -> Result<PreparedImage> {
        let source = image.to_rgb8();
        let original_size = source.dimensions();
        if original_size.0 == 0 || original_size.1 == 0 {
            return Err(BgRemovalError::processing(format!(
                "Image has empty dimensions {}x{}",
                original_size.0, original_size.1
            )));
        }

        let inference_size = inference_dimensions(original_size, max_dimension);
        let tensor = if inference_size == original_size {
            image_to_tensor(&source)
        } else {
            log::debug!(
                "Downscaling {}x{} -> {}x{} for inference",
                original_size.0,
                original_size.1,
                inference_size.0,
                inference_size.1
            );
            let resized = image::imageops::resize(
                &source,
                inference_size.0,
                inference_size.1,
                image::imageops::FilterType::Lanczos3,
            );
            image_to_tensor(&resized)
        };

        Ok(PreparedImage {
            source,
            tensor,
            original_size,
            inference_size,
        })
    }
}

/// Size the model runs at: unchanged unless an edge exceeds `max_dimension`,
/// otherwise scaled so the longest edge equals it, preserving aspect ratio
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn inference_dimensions((width, height): (u32, u32), max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    let scale = f64::from(max_dimension) / f64::from(width.max(height));
    let new_width = (f64::from(width) * scale).round().max(1.0) as u32;
    let new_height = (f64::from(height) * scale).round().max(1.0) as u32;
    (new_width.min(max_dimension), new_height.min(max_dimension))
}

/// Convert an RGB image to a normalized channel-first tensor
#[must_use]
pub fn image_to_tensor(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        let channels = pixel.0.iter().zip(NORMALIZATION_MEAN).zip(NORMALIZATION_STD);
        for (channel, ((&value, mean), std)) in channels.enumerate() {
            let normalized = (f32::from(value) / 255.0 - mean) / std;
            if let Some(slot) = tensor.get_mut((channel, y as usize, x as usize)) {
                *slot = normalized;
            }
        }
    }

    tensor
}

/// Read a seekable source fully, starting from byte zero
///
/// # Errors
/// - `Io` when seeking or reading fails
pub fn read_from_start<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_inference_dimensions() {
        assert_eq!(inference_dimensions((2000, 1000), 1024), (1024, 512));
        assert_eq!(inference_dimensions((1000, 2000), 1024), (512, 1024));
        assert_eq!(inference_dimensions((800, 600), 1024), (800, 600));
        assert_eq!(inference_dimensions((1024, 1024), 1024), (1024, 1024));
        assert_eq!(inference_dimensions((5000, 1), 1024), (1024, 1));
    }

    #[test]
    fn test_preprocess_small_image_keeps_size() {
        let prepared = ImagePreprocessor::preprocess(&png_bytes(40, 30, [255, 0, 0]), 1024).unwrap();
        assert_eq!(prepared.original_size, (40, 30));
        assert_eq!(prepared.inference_size, (40, 30));
        assert_eq!(prepared.tensor.shape(), &[3, 30, 40]);
    }

    #[test]
    fn test_preprocess_downscales_large_image() {
        let prepared =
            ImagePreprocessor::preprocess(&png_bytes(2000, 1000, [0, 0, 0]), 1024).unwrap();
        assert_eq!(prepared.original_size, (2000, 1000));
        assert_eq!(prepared.inference_size, (1024, 512));
        assert_eq!(prepared.tensor.shape(), &[3, 512, 1024]);
        assert_eq!(prepared.source.dimensions(), (2000, 1000));
    }

    #[test]
    fn test_normalization_constants() {
        let prepared = ImagePreprocessor::preprocess(&png_bytes(2, 2, [255, 0, 128]), 1024).unwrap();
        let r = prepared.tensor[[0, 0, 0]];
        let g = prepared.tensor[[1, 0, 0]];
        let b = prepared.tensor[[2, 1, 1]];
        assert!((r - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((g - (0.0 - 0.456) / 0.224).abs() < 1e-5);
        assert!((b - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            ImagePreprocessor::preprocess(b"definitely not an image", 1024),
            Err(BgRemovalError::Decode(_))
        ));
        assert!(matches!(
            ImagePreprocessor::preprocess(&[], 1024),
            Err(BgRemovalError::Decode(_))
        ));
    }

    #[test]
    fn test_reader_is_rewound() {
        let mut cursor = Cursor::new(png_bytes(8, 4, [1, 2, 3]));
        cursor.seek(SeekFrom::End(0)).unwrap();
        let prepared = ImagePreprocessor::preprocess_reader(&mut cursor, 1024).unwrap();
        assert_eq!(prepared.original_size, (8, 4));
    }
}
