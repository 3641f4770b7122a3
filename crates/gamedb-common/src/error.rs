//! Error types shared across GameDB crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, GamedbError>;

#[derive(Error, Debug)]
pub enum GamedbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid payload handle: {0}")]
    InvalidHandle(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GamedbError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
