//! Error types shared across callsync crates

use thiserror::Error;

/// Result type alias for shared callsync operations
pub type Result<T> = std::result::Result<T, CallsyncError>;

/// Errors raised by shared helpers
#[derive(Error, Debug)]
pub enum CallsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CallsyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
