//! Generation history around the processing pipeline

use image::{ImageFormat, Rgb, RgbImage};
use segment_bgremove::{
    error::{BgRemovalError, Result},
    BackgroundRemovalProcessor, GenerationStore, InMemoryGenerationStore, MockSegmentationModel,
    RemovalConfig,
};
use std::io::Cursor;
use std::sync::Arc;

fn upload() -> Vec<u8> {
    let image = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

#[test]
fn test_upload_is_kept_when_processing_fails() -> Result<()> {
    let store = InMemoryGenerationStore::new();
    let processor = BackgroundRemovalProcessor::new(
        Arc::new(MockSegmentationModel::failing("device lost")),
        &RemovalConfig::default(),
    )?;

    let original = upload();
    let id = store.create(1, original.clone())?;
    assert!(processor.process_bytes(&original).is_err());

    assert_eq!(store.original(1, id)?, original);
    assert!(store.processed(1, id)?.is_empty());
    assert_eq!(store.list(1)?.len(), 1);
    Ok(())
}

#[test]
fn test_processed_result_is_attached() -> Result<()> {
    let store = InMemoryGenerationStore::new();
    let processor = BackgroundRemovalProcessor::new(
        Arc::new(MockSegmentationModel::left_half_foreground()),
        &RemovalConfig::default(),
    )?;

    let original = upload();
    let id = store.create(1, original.clone())?;
    let png = processor.process_bytes(&original)?.to_png_bytes()?;
    store.attach_processed(1, id, png.clone())?;

    let stored = image::load_from_memory(&store.processed(1, id)?)?.to_rgba8();
    assert_eq!(stored.dimensions(), (8, 8));
    assert_eq!(stored.get_pixel(0, 0).0, [10, 20, 30, 255]);
    assert_eq!(stored.get_pixel(7, 0).0, [10, 20, 30, 0]);
    Ok(())
}

#[test]
fn test_listing_is_newest_first_and_per_user() -> Result<()> {
    let store = InMemoryGenerationStore::new();
    let first = store.create(1, b"one".to_vec())?;
    let other = store.create(2, b"other".to_vec())?;
    let second = store.create(1, b"two".to_vec())?;

    let ids: Vec<_> = store.list(1)?.into_iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![second, first]);

    let ids: Vec<_> = store.list(2)?.into_iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![other]);

    assert!(store.list(3)?.is_empty());
    Ok(())
}

#[test]
fn test_delete_removes_only_own_generation() -> Result<()> {
    let store = InMemoryGenerationStore::new();
    let mine = store.create(1, b"mine".to_vec())?;
    let theirs = store.create(2, b"theirs".to_vec())?;

    assert!(matches!(store.delete(1, theirs), Err(BgRemovalError::NotFound(_))));
    store.delete(1, mine)?;

    assert!(matches!(store.original(1, mine), Err(BgRemovalError::NotFound(_))));
    assert!(matches!(store.delete(1, mine), Err(BgRemovalError::NotFound(_))));
    assert_eq!(store.original(2, theirs)?, b"theirs");
    Ok(())
}

#[test]
fn test_ids_are_not_reused_after_delete() -> Result<()> {
    let store = InMemoryGenerationStore::new();
    let first = store.create(1, Vec::new())?;
    store.delete(1, first)?;
    let second = store.create(1, Vec::new())?;
    assert!(second > first);
    Ok(())
}

#[test]
fn test_store_is_shareable_across_threads() {
    let store: Arc<dyn GenerationStore> = Arc::new(InMemoryGenerationStore::new());

    let writers: Vec<_> = (0..4_u64)
        .map(|user| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    store.create(user, vec![0; 4]).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    for user in 0..4 {
        assert_eq!(store.list(user).unwrap().len(), 10);
    }
}
