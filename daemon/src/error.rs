//! Error types for zelland

use thiserror::Error;

/// Main error type for the zelland library
#[derive(Error, Debug)]
pub enum Error {
    /// Asset missing or expired, or a file that does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed envelope bytes or malformed sidecar content
    #[error("decode error: {0}")]
    Decode(String),

    /// Caller is not allowed to use the endpoint
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Bad request body or unusable input
    #[error("validation error: {0}")]
    Validation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::Decode(err.to_string())
    }
}

/// Result type alias for zelland
pub type Result<T> = std::result::Result<T, Error>;
