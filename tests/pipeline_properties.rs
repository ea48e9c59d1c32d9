//! End-to-end properties of the background removal pipeline
//!
//! All tests run against the mock model, so they exercise decoding, resizing,
//! normalization, mask derivation and compositing without model weights.

use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array3;
use segment_bgremove::{
    error::{BgRemovalError, Result},
    BackgroundRemovalProcessor, MockSegmentationModel, ModelHandle, RemovalConfig,
    SharedModel,
};
use std::io::Cursor;
use std::sync::Arc;

fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
    })
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

fn processor_with(model: SharedModel) -> BackgroundRemovalProcessor {
    BackgroundRemovalProcessor::new(model, &RemovalConfig::default()).unwrap()
}

#[test]
fn test_output_matches_input_size_and_preserves_rgb() -> Result<()> {
    let source = gradient(37, 23);
    let processor = processor_with(Arc::new(MockSegmentationModel::left_half_foreground()));

    let result = processor.process_bytes(&encode(&source, ImageFormat::Png))?;

    assert_eq!(result.image.dimensions(), (37, 23));
    assert_eq!(result.mask.dimensions, (37, 23));
    for (x, y, pixel) in result.image.enumerate_pixels() {
        assert_eq!(pixel.0[..3], source.get_pixel(x, y).0, "rgb changed at ({x}, {y})");
        assert!(pixel.0[3] == 0 || pixel.0[3] == 255);
    }
    Ok(())
}

#[test]
fn test_repeated_runs_are_identical() -> Result<()> {
    let bytes = encode(&gradient(64, 48), ImageFormat::Jpeg);
    let processor = processor_with(Arc::new(MockSegmentationModel::from_fn(
        3,
        |x, y, _, _| (x / 8 + y / 8) % 3,
    )));

    let first = processor.process_bytes(&bytes)?;
    let second = processor.process_bytes(&bytes)?;

    assert_eq!(first.image.as_raw(), second.image.as_raw());
    assert_eq!(first.mask.data, second.mask.data);
    Ok(())
}

#[test]
fn test_large_image_is_downscaled_for_inference_only() -> Result<()> {
    let bytes = encode(&gradient(2000, 1000), ImageFormat::Png);
    let model = Arc::new(MockSegmentationModel::left_half_foreground());
    let processor = processor_with(model.clone());

    let result = processor.process_bytes(&bytes)?;

    assert_eq!(result.inference_dimensions, (1024, 512));
    assert_eq!(result.original_dimensions, (2000, 1000));
    assert_eq!(result.image.dimensions(), (2000, 1000));
    assert_eq!(model.call_count(), 1);

    // The upscaled mask keeps the foreground edge at the middle column
    for (x, y, pixel) in result.image.enumerate_pixels() {
        let expected = if x < 1000 { 255 } else { 0 };
        assert_eq!(pixel.0[3], expected, "alpha at ({x}, {y})");
    }
    Ok(())
}

#[test]
fn test_small_image_is_not_upscaled() -> Result<()> {
    let bytes = encode(&gradient(300, 200), ImageFormat::Png);
    let result = processor_with(Arc::new(MockSegmentationModel::uniform(2, 1))).process_bytes(&bytes)?;

    assert_eq!(result.inference_dimensions, (300, 200));
    Ok(())
}

#[test]
fn test_all_background_is_fully_transparent() -> Result<()> {
    let bytes = encode(&gradient(16, 16), ImageFormat::Png);
    let result = processor_with(Arc::new(MockSegmentationModel::uniform(21, 0))).process_bytes(&bytes)?;

    assert!(result.image.pixels().all(|p| p.0[3] == 0));
    assert_eq!(result.mask.statistics().foreground_pixels, 0);
    Ok(())
}

#[test]
fn test_any_non_background_class_is_foreground() -> Result<()> {
    let bytes = encode(&gradient(16, 16), ImageFormat::Png);
    for class in [1, 7, 20] {
        let result =
            processor_with(Arc::new(MockSegmentationModel::uniform(21, class))).process_bytes(&bytes)?;
        assert!(
            result.image.pixels().all(|p| p.0[3] == 255),
            "class {class} should be opaque"
        );
    }
    Ok(())
}

#[test]
fn test_tied_scores_resolve_to_background() -> Result<()> {
    let bytes = encode(&gradient(4, 4), ImageFormat::Png);
    let scores = Array3::from_elem((3, 4, 4), 0.5_f32);
    let result = processor_with(Arc::new(MockSegmentationModel::from_scores(scores))).process_bytes(&bytes)?;

    assert!(result.image.pixels().all(|p| p.0[3] == 0));
    Ok(())
}

#[test]
fn test_malformed_input_never_reaches_model() {
    let model = Arc::new(MockSegmentationModel::uniform(2, 1));
    let processor = processor_with(model.clone());

    for input in [&b""[..], b"not an image", b"\x89PNG\r\n\x1a\n truncated"] {
        let err = processor.process_bytes(input).unwrap_err();
        assert!(matches!(err, BgRemovalError::Decode(_)), "got {err:?}");
    }
    assert_eq!(model.call_count(), 0);
}

#[test]
fn test_single_class_output_is_rejected() {
    let bytes = encode(&gradient(4, 4), ImageFormat::Png);
    let scores = Array3::from_elem((1, 4, 4), 1.0_f32);
    let err = processor_with(Arc::new(MockSegmentationModel::from_scores(scores)))
        .process_bytes(&bytes)
        .unwrap_err();

    assert!(matches!(err, BgRemovalError::Inference(_)), "got {err:?}");
}

#[test]
fn test_png_output_round_trips_through_decoder() -> Result<()> {
    let bytes = encode(&gradient(12, 9), ImageFormat::Png);
    let result = processor_with(Arc::new(MockSegmentationModel::left_half_foreground())).process_bytes(&bytes)?;

    let decoded = image::load_from_memory(&result.to_png_bytes()?)?.to_rgba8();
    assert_eq!(decoded.as_raw(), result.image.as_raw());
    Ok(())
}

#[test]
fn test_concurrent_requests_share_one_model() {
    let model = Arc::new(MockSegmentationModel::left_half_foreground());
    let processor = processor_with(model.clone());
    let bytes = Arc::new(encode(&gradient(40, 30), ImageFormat::Png));
    let expected = processor.process_bytes(&bytes).unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let processor = processor.clone();
            let bytes = Arc::clone(&bytes);
            std::thread::spawn(move || processor.process_bytes(&bytes).unwrap())
        })
        .collect();

    for worker in workers {
        let result = worker.join().unwrap();
        assert_eq!(result.image.as_raw(), expected.image.as_raw());
    }
    assert_eq!(model.call_count(), 9);
}

#[tokio::test]
async fn test_model_handle_initializes_once_under_contention() {
    let handle = Arc::new(ModelHandle::new());
    let loads = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let handle = Arc::clone(&handle);
            let loads = Arc::clone(&loads);
            tokio::spawn(async move {
                handle
                    .get_or_try_init(|| async move {
                        loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        let model: SharedModel = Arc::new(MockSegmentationModel::uniform(2, 1));
                        Ok(model)
                    })
                    .await
            })
        })
        .collect();

    let mut models = Vec::new();
    for task in tasks {
        models.push(task.await.unwrap().unwrap());
    }

    assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(models.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}
