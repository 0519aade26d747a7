//! Server error types.

use thiserror::Error;

/// Errors of the daemon glue.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("core error: {0}")]
    Core(#[from] insteon_core::CoreError),

    #[error("storage error: {0}")]
    Storage(#[from] insteon_storage::StorageError),

    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("unknown gateway: {0}")]
    UnknownGateway(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ServerError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServerError::Io(_) | ServerError::Serial(_) => true,
            ServerError::Core(e) => e.is_retryable(),
            _ => false,
        }
    }
}
