//! Shared utilities for preprocessing and provider handling

pub mod preprocessing;
pub mod providers;

pub use preprocessing::{ImagePreprocessor, PreparedImage};
pub use providers::{ExecutionProviderManager, ProviderInfo};
