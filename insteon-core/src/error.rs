//! Core error types.

use crate::x10::X10Address;
use insteon_protocol::{Address, ProtocolError};
use thiserror::Error;

/// Errors from the protocol engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("device not found: {address}")]
    DeviceNotFound { address: Address },

    #[error("device already exists: {address}")]
    DeviceExists { address: Address },

    #[error("X10 device not found: {address}")]
    X10DeviceNotFound { address: X10Address },

    #[error("X10 device already exists: {address}")]
    X10DeviceExists { address: X10Address },

    #[error("invalid X10 address: {value}")]
    InvalidX10Address { value: String },

    #[error("link record not found: {key}")]
    RecordNotFound { key: String },

    #[error("invalid link record: {reason}")]
    InvalidRecord { reason: String },

    #[error("unknown device command: {command}")]
    UnknownCommand { command: String },

    #[error("command '{command}' does not apply to device {address}")]
    CommandNotApplicable { command: String, address: Address },

    #[error("invalid snapshot: {reason}")]
    InvalidSnapshot { reason: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Transport(_))
    }

    /// Returns a stable error code for status reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            CoreError::DeviceExists { .. } => "DEVICE_EXISTS",
            CoreError::X10DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            CoreError::X10DeviceExists { .. } => "DEVICE_EXISTS",
            CoreError::InvalidX10Address { .. } => "BAD_REQUEST",
            CoreError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            CoreError::InvalidRecord { .. } => "BAD_REQUEST",
            CoreError::UnknownCommand { .. } => "UNKNOWN_COMMAND",
            CoreError::CommandNotApplicable { .. } => "UNKNOWN_COMMAND",
            CoreError::InvalidSnapshot { .. } => "BAD_SNAPSHOT",
            CoreError::Protocol(_) => "PROTOCOL_ERROR",
            CoreError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}
