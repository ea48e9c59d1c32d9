//! Model cache, downloader bookkeeping and loader resolution against a temp cache

use chrono::Utc;
use segment_bgremove::{
    cache::{CachedModelMetadata, METADATA_FILE_NAME},
    config::{BackendType, Device, ExecutionProvider, RemovalConfig},
    download::{is_model_url, resolve_download_url},
    error::{BgRemovalError, Result},
    models::MODEL_FILE_NAME,
    validate_model_url, ModelCache, ModelDownloader, ModelLoader, ModelManager, ModelSpec,
};
use sha2::{Digest, Sha256};
use std::fs;
use tempfile::TempDir;

fn seed_model(cache: &ModelCache, model_id: &str, graph: &[u8]) {
    let dir = cache.get_model_path(model_id).unwrap();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(MODEL_FILE_NAME), graph).unwrap();

    let metadata = CachedModelMetadata {
        source_url: format!("https://huggingface.co/{}", model_id.replace("--", "/")),
        sha256: format!("{:x}", Sha256::digest(graph)),
        size_bytes: graph.len() as u64,
        downloaded_at: Utc::now(),
    };
    fs::write(
        dir.join(METADATA_FILE_NAME),
        serde_json::to_vec_pretty(&metadata).unwrap(),
    )
    .unwrap();
}

fn tract_config(model_spec: ModelSpec) -> RemovalConfig {
    RemovalConfig::builder()
        .backend_type(BackendType::Tract)
        .execution_provider(ExecutionProvider::Cpu)
        .model_spec(model_spec)
        .build()
        .unwrap()
}

#[test]
fn test_loader_falls_back_to_first_cached_model() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(temp_dir.path())?;
    seed_model(&cache, "zeta--seg", b"z");
    seed_model(&cache, "acme--seg", b"a");

    let loader = ModelLoader::new(tract_config(ModelSpec::default()), Device::Cpu)?
        .with_cache(cache.clone());
    let manager = loader.model_manager()?;

    assert_eq!(
        manager.model_path(),
        cache.get_model_path("acme--seg")?.join(MODEL_FILE_NAME)
    );
    assert_eq!(manager.get_info()?.name, "acme--seg");
    Ok(())
}

#[test]
fn test_loader_resolves_named_cached_model() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(temp_dir.path())?;
    seed_model(&cache, "acme--seg", b"a");
    seed_model(&cache, "zeta--seg", b"zz");

    let loader = ModelLoader::new(tract_config(ModelSpec::downloaded("zeta--seg")), Device::Cpu)?
        .with_cache(cache);
    let info = loader.model_manager()?.get_info()?;

    assert_eq!(info.name, "zeta--seg");
    assert_eq!(info.size_bytes, 2);
    Ok(())
}

#[test]
fn test_external_directory_uses_model_onnx() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join(MODEL_FILE_NAME), b"graph").unwrap();

    let manager = ModelManager::with_external_model(temp_dir.path())?;
    assert_eq!(manager.model_path(), temp_dir.path().join(MODEL_FILE_NAME));
    assert_eq!(manager.load_model()?, b"graph");
    Ok(())
}

#[test]
fn test_verify_detects_tampered_weights() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(temp_dir.path())?;
    seed_model(&cache, "acme--seg", b"original graph");

    let downloader = ModelDownloader::with_cache(cache.clone())?;
    assert!(downloader.verify_cached_model("acme--seg")?);

    fs::write(
        cache.get_model_path("acme--seg")?.join(MODEL_FILE_NAME),
        b"tampered graph",
    )
    .unwrap();
    assert!(!downloader.verify_cached_model("acme--seg")?);
    Ok(())
}

#[test]
fn test_listing_reports_metadata() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(temp_dir.path())?;
    seed_model(&cache, "acme--seg", b"graph");

    let models = cache.scan_cached_models()?;
    assert_eq!(models.len(), 1);
    let metadata = models.first().and_then(|m| m.metadata.clone()).unwrap();
    assert_eq!(metadata.source_url, "https://huggingface.co/acme/seg");
    assert_eq!(metadata.size_bytes, 5);
    Ok(())
}

#[test]
fn test_clear_model_stays_inside_cache() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(&temp_dir.path().join("cache"))?;
    seed_model(&cache, "acme--seg", b"graph");

    let outside = TempDir::new().unwrap();
    fs::write(outside.path().join("keep.txt"), b"keep").unwrap();
    let sibling = temp_dir.path().join("sibling");
    fs::create_dir_all(&sibling).unwrap();

    let absolute = outside.path().to_string_lossy().to_string();
    for model_id in [absolute.as_str(), "../../sibling", "..", ".", "acme--seg/.."] {
        let err = cache.clear_model(model_id).unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)), "{model_id}: {err:?}");
        assert!(cache.get_model_path(model_id).is_err());
        assert!(!cache.is_model_cached(model_id));
    }

    assert!(outside.path().join("keep.txt").is_file());
    assert!(sibling.is_dir());
    assert!(cache.is_model_cached("acme--seg"));

    let err = ModelManager::with_downloaded_model(&cache, "../cache/models/acme--seg").unwrap_err();
    assert!(matches!(err, BgRemovalError::ModelLoad(_)));

    assert!(cache.clear_model("acme--seg")?);
    assert!(!cache.clear_model("acme--seg")?);
    Ok(())
}

#[tokio::test]
async fn test_cached_url_is_not_downloaded_again() -> Result<()> {
    let temp_dir = TempDir::new().unwrap();
    let cache = ModelCache::with_dir(temp_dir.path())?;
    seed_model(&cache, "acme--seg", b"graph");

    // Served from cache, so no request is made
    let downloader = ModelDownloader::with_cache(cache)?;
    let model_id = downloader
        .download_model("https://huggingface.co/acme/seg", false)
        .await?;
    assert_eq!(model_id, "acme--seg");
    Ok(())
}

#[test]
fn test_model_url_handling() {
    assert!(is_model_url("https://huggingface.co/acme/seg"));
    assert!(!is_model_url("models/seg.onnx"));
    assert!(!is_model_url("acme--seg"));

    assert!(validate_model_url("https://huggingface.co/acme/seg").is_ok());
    assert!(validate_model_url("https://huggingface.co/acme").is_err());
    assert!(validate_model_url("http://example.com/seg.onnx").is_err());
    assert!(validate_model_url("").is_err());

    assert_eq!(
        resolve_download_url("https://example.com/models/seg.onnx"),
        "https://example.com/models/seg.onnx"
    );
    assert_eq!(
        resolve_download_url("https://example.com/models/seg/"),
        "https://example.com/models/seg/model.onnx"
    );
}
