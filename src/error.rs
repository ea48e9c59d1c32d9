//! Error types for background removal operations

use thiserror::Error;

/// Result type alias for background removal operations
pub type Result<T> = std::result::Result<T, BgRemovalError>;

/// Error taxonomy for the segmentation pipeline and its collaborators
#[derive(Error, Debug)]
pub enum BgRemovalError {
    /// Input bytes are not a decodable image
    #[error("Decode error: {0}")]
    Decode(String),

    /// Pretrained weights unreachable or incompatible
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Device or runtime failure during the forward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Network errors while fetching model weights
    #[error("Network error: {0}")]
    Network(String),

    /// Internal shape or dimension mismatches between pipeline stages
    #[error("Processing error: {0}")]
    Processing(String),

    /// Lookup of a stored generation failed
    #[error("Not found: {0}")]
    NotFound(String),
}

impl BgRemovalError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new model load error
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Self::Processing(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a network error from an underlying `reqwest` failure
    pub fn network_error(context: &str, error: reqwest::Error) -> Self {
        Self::Network(format!("{context}: {error}"))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }

    /// Whether this error means the model is unusable and requests must fail closed
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ModelLoad(_))
    }
}
