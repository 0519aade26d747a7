//! Protocol error types.

use thiserror::Error;

/// Errors raised while parsing or constructing PLM frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame does not start with sync byte: {0:#04x}")]
    MissingSync(u8),

    #[error("unknown PLM command byte: {0:#04x}")]
    UnknownCommand(u8),

    #[error("frame {name} has invalid length {len}")]
    InvalidLength { name: &'static str, len: usize },

    #[error("frame {0} cannot be sent by the host")]
    NotSendable(&'static str),

    #[error("field {field:?} is not part of frame {name}")]
    FieldNotInSchema { field: crate::Field, name: &'static str },

    #[error("invalid node address: {0}")]
    InvalidAddress(String),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),
}
