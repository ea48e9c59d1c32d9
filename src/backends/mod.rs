//! Segmentation model backends
//!
//! - ONNX Runtime (accelerator support)
//! - Tract (pure Rust, CPU only)
//! - Mock (fixed scores for tests and benchmarks)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod mock;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxSegmentationModel;

#[cfg(feature = "tract")]
pub use self::tract::TractSegmentationModel;

pub use self::mock::MockSegmentationModel;
