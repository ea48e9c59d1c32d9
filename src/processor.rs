//! End-to-end background removal pipeline
//!
//! Decode and normalize, run the segmentation model, derive the foreground mask
//! and composite it onto the full-resolution source. Each invocation owns its
//! tensors; the model is the only shared state.

use crate::compositor::composite;
use crate::config::RemovalConfig;
use crate::error::{BgRemovalError, Result};
use crate::inference::infer;
use crate::loader::SharedModel;
use crate::mask::derive_mask;
use crate::types::{ProcessingTimings, RemovalResult};
use crate::utils::preprocessing::{ImagePreprocessor, PreparedImage};
use instant::Instant;
use std::io::{Read, Seek};
use tracing::{info, instrument, span, Level};

/// Runs the segmentation pipeline against a loaded model
#[derive(Debug, Clone)]
pub struct BackgroundRemovalProcessor {
    model: SharedModel,
    max_dimension: u32,
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the inference bound from `config`
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(model: SharedModel, config: &RemovalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            max_dimension: config.max_dimension,
        })
    }

    /// The model this processor runs
    #[must_use]
    pub fn model(&self) -> &SharedModel {
        &self.model
    }

    /// Longest edge the model is run at
    #[must_use]
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Remove the background from encoded image bytes
    ///
    /// # Errors
    /// - `Decode` when the bytes are not a JPEG or PNG image
    /// - `Inference` when the forward pass fails
    /// - `Processing` on internal dimension mismatches
    #[instrument(skip_all, fields(model = self.model.name(), input_bytes = image_bytes.len()))]
    pub fn process_bytes(&self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let total_start = Instant::now();
        let prepared = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            ImagePreprocessor::preprocess(image_bytes, self.max_dimension)?
        };
        let preprocessing_ms = total_start.elapsed().as_millis() as u64;
        self.finish(prepared, preprocessing_ms, total_start)
    }

    /// Remove the background from a seekable source, read from its start
    ///
    /// # Errors
    /// - `Io` when the source cannot be read
    /// - Any error from [`BackgroundRemovalProcessor::process_bytes`]
    pub fn process_reader<R: Read + Seek>(&self, reader: &mut R) -> Result<RemovalResult> {
        let bytes = crate::utils::preprocessing::read_from_start(reader)?;
        self.process_bytes(&bytes)
    }

    /// Remove the background from an async stream, read fully into memory first
    ///
    /// # Errors
    /// - `Io` when the stream cannot be read
    /// - Any error from [`BackgroundRemovalProcessor::process_bytes`]
    pub async fn process_async_reader<R: tokio::io::AsyncRead + Unpin>(
        &self,
        mut reader: R,
    ) -> Result<RemovalResult> {
        use tokio::io::AsyncReadExt;

        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .await
            .map_err(BgRemovalError::Io)?;

        let processor = self.clone();
        tokio::task::spawn_blocking(move || processor.process_bytes(&buffer))
            .await
            .map_err(|e| BgRemovalError::processing(format!("Processing task failed: {e}")))?
    }

    fn finish(
        &self,
        prepared: PreparedImage,
        preprocessing_ms: u64,
        total_start: Instant,
    ) -> Result<RemovalResult> {
        let PreparedImage {
            source,
            tensor,
            original_size,
            inference_size,
        } = prepared;

        let inference_start = Instant::now();
        let scores = {
            let _span = span!(
                Level::INFO,
                "inference",
                width = inference_size.0,
                height = inference_size.1
            )
            .entered();
            infer(self.model.as_ref(), &tensor)?
        };
        drop(tensor);
        let inference_ms = inference_start.elapsed().as_millis() as u64;

        let postprocess_start = Instant::now();
        let (mask, image) = {
            let _span = span!(
                Level::DEBUG,
                "background_removal",
                width = original_size.0,
                height = original_size.1
            )
            .entered();
            let mask = derive_mask(&scores, original_size)?;
            let image = composite(&source, &mask)?;
            (mask, image)
        };
        let postprocessing_ms = postprocess_start.elapsed().as_millis() as u64;

        let timings = ProcessingTimings {
            preprocessing_ms,
            inference_ms,
            postprocessing_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
        };

        let result = RemovalResult {
            image,
            mask,
            original_dimensions: original_size,
            inference_dimensions: inference_size,
            timings,
        };
        info!(
            width = original_size.0,
            height = original_size.1,
            foreground_ratio = result.mask.statistics().foreground_ratio,
            "background removed in {}",
            result.timing_summary()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockSegmentationModel;
    use std::io::Cursor;
    use std::sync::Arc;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 42])
        });
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn processor(model: MockSegmentationModel) -> BackgroundRemovalProcessor {
        BackgroundRemovalProcessor::new(Arc::new(model), &RemovalConfig::default()).unwrap()
    }

    #[test]
    fn test_left_half_foreground() {
        let result = processor(MockSegmentationModel::left_half_foreground())
            .process_bytes(&png(10, 4))
            .unwrap();

        assert_eq!(result.dimensions(), (10, 4));
        assert_eq!(result.image.get_pixel(0, 0).0[3], 255);
        assert_eq!(result.image.get_pixel(9, 3).0[3], 0);
        assert_eq!(result.image.get_pixel(9, 3).0[..3], [9, 3, 42]);
    }

    #[test]
    fn test_reader_at_end_is_rewound() {
        let mut cursor = Cursor::new(png(6, 6));
        cursor.set_position(cursor.get_ref().len() as u64);

        let result = processor(MockSegmentationModel::uniform(2, 1))
            .process_reader(&mut cursor)
            .unwrap();
        assert_eq!(result.dimensions(), (6, 6));
    }

    #[test]
    fn test_inference_failure_is_reported() {
        let result = processor(MockSegmentationModel::failing("cuda error")).process_bytes(&png(4, 4));
        assert!(matches!(result, Err(BgRemovalError::Inference(_))));
    }

    #[test]
    fn test_decode_failure_skips_inference() {
        let model = Arc::new(MockSegmentationModel::uniform(2, 1));
        let processor =
            BackgroundRemovalProcessor::new(model.clone(), &RemovalConfig::default()).unwrap();

        assert!(matches!(
            processor.process_bytes(b"GIF89a nope"),
            Err(BgRemovalError::Decode(_))
        ));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_async_reader() {
        let processor = processor(MockSegmentationModel::uniform(21, 15));
        let result = processor
            .process_async_reader(Cursor::new(png(5, 3)))
            .await
            .unwrap();
        assert!(result.image.pixels().all(|p| p.0[3] == 255));
    }
}
