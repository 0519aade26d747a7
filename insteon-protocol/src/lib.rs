//! # insteon-protocol
//!
//! Wire protocol of the Insteon Power-Line Modem (PLM) serial interface.
//!
//! This crate provides:
//! - Byte framing of the unprefixed PLM stream
//! - The static frame schema table keyed by command byte
//! - Named field access over received and host-built frames
//! - The embedded device message view (flags byte, hops, user data, checksum)
//! - Declarative outbound frame construction

pub mod address;
pub mod codec;
pub mod error;
pub mod frame;
pub mod insteon;
pub mod message;
pub mod schema;

pub use address::Address;
pub use codec::{apply_checksum, encode_fields, encode_insteon_send, FieldValue};
pub use error::ProtocolError;
pub use frame::{Framer, FramerOutput};
pub use insteon::{checksum, InsteonMessage, MessageFlags, MessageType, NackReason};
pub use message::{Direction, PlmMessage, PlmResponse};
pub use schema::{schema_for, Field, FrameLength, FrameSchema, NackAction, PlmCommand};

/// Default serial speed of a PLM.
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// TCP port of the PLM bridge inside an Insteon Hub.
pub const DEFAULT_HUB_PORT: u16 = 9761;
