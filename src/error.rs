//! Error types for decoding and configuration.

use thiserror::Error;

/// Errors produced by a decode call.
///
/// Collaborator failures are carried verbatim; the decoder never retries
/// and never returns partial state alongside an error.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Non-positive window size, hand count or dof count.
    #[error("invalid decoder configuration: {0}")]
    Configuration(String),

    /// Sequences or collaborator outputs with inconsistent shapes.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("model inference failed: {0:#}")]
    Model(anyhow::Error),

    #[error("sampling failed: {0:#}")]
    Sampler(anyhow::Error),
}

impl From<ndarray::ShapeError> for DecodeError {
    fn from(err: ndarray::ShapeError) -> Self {
        DecodeError::Shape(err.to_string())
    }
}

/// Errors produced while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Convenience result alias for decoding.
pub type Result<T> = std::result::Result<T, DecodeError>;
