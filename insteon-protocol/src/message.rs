//! Structured access to PLM frames.

use crate::error::ProtocolError;
use crate::insteon::{InsteonMessage, MessageFlags};
use crate::schema::{
    schema_for, Field, FrameSchema, PlmCommand, RESP_ACK, RESP_BAD_COMMAND, RESP_NACK, SYNC,
};
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Which side produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Received from the PLM.
    Inbound,
    /// Built by the host for transmission.
    Outbound,
}

/// Response byte of an echoed host frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlmResponse {
    Ack,
    Nack,
    BadCommand,
}

/// A PLM frame with schema-driven named field access.
#[derive(Clone)]
pub struct PlmMessage {
    raw: BytesMut,
    schema: &'static FrameSchema,
    direction: Direction,
}

impl PlmMessage {
    /// Wraps a complete frame received from the PLM.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let sync = *frame.first().ok_or(ProtocolError::MissingSync(0))?;
        if sync != SYNC {
            return Err(ProtocolError::MissingSync(sync));
        }
        let code = *frame.get(1).ok_or(ProtocolError::MissingSync(sync))?;
        let schema = schema_for(code).ok_or(ProtocolError::UnknownCommand(code))?;
        if !schema.recv_len.is_valid(frame.len()) {
            return Err(ProtocolError::InvalidLength {
                name: schema.name,
                len: frame.len(),
            });
        }
        Ok(Self {
            raw: BytesMut::from(frame),
            schema,
            direction: Direction::Inbound,
        })
    }

    /// Allocates a zero-filled host frame with sync and command bytes set.
    pub fn outbound(command: PlmCommand, extended: bool) -> Result<Self, ProtocolError> {
        let schema = command.schema();
        let len = schema
            .send_len
            .ok_or(ProtocolError::NotSendable(schema.name))?
            .for_extended(extended);
        let mut raw = BytesMut::zeroed(len);
        raw[0] = SYNC;
        raw[1] = command.code();
        Ok(Self {
            raw,
            schema,
            direction: Direction::Outbound,
        })
    }

    pub fn command(&self) -> PlmCommand {
        self.schema.command
    }

    pub fn schema(&self) -> &'static FrameSchema {
        self.schema
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.raw)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.raw)
    }

    /// Value of a named field, or `None` when the field is not part of this
    /// frame kind or lies beyond the bytes actually present.
    pub fn get(&self, field: Field) -> Option<u8> {
        let outbound = self.direction == Direction::Outbound;
        let pos = self.schema.offset(field, outbound, self.raw.len())?;
        self.raw.get(pos).copied()
    }

    pub fn set(&mut self, field: Field, value: u8) -> Result<(), ProtocolError> {
        let outbound = self.direction == Direction::Outbound;
        let pos = self
            .schema
            .offset(field, outbound, self.raw.len())
            .ok_or(ProtocolError::FieldNotInSchema {
                field,
                name: self.schema.name,
            })?;
        self.raw[pos] = value;
        Ok(())
    }

    /// Classifies the response byte of an echoed host frame.
    pub fn response(&self) -> Option<PlmResponse> {
        if self.direction != Direction::Inbound {
            return None;
        }
        let pos = self.schema.response_offset(self.raw.len())?;
        match *self.raw.get(pos)? {
            RESP_ACK => Some(PlmResponse::Ack),
            RESP_NACK => Some(PlmResponse::Nack),
            RESP_BAD_COMMAND => Some(PlmResponse::BadCommand),
            _ => None,
        }
    }

    /// Device message view for frames that carry one.
    pub fn insteon(&self) -> Option<InsteonMessage<'_>> {
        InsteonMessage::new(self)
    }

    /// Rewrites the flags byte of a device send.
    pub fn set_flags(&mut self, flags: MessageFlags) -> Result<(), ProtocolError> {
        self.set(Field::MsgFlags, flags.to_byte())
    }

    /// Whether this received frame is the PLM echo of `sent`.
    ///
    /// Echoes one byte longer than the sent frame repeat it byte for byte
    /// ahead of the response byte. Other echoes only repeat the command byte.
    pub fn echoes(&self, sent: &PlmMessage) -> bool {
        if self.direction != Direction::Inbound || self.command() != sent.command() {
            return false;
        }
        if self.raw.len() == sent.raw.len() + 1 {
            self.raw[..sent.raw.len()] == sent.raw[..]
        } else {
            true
        }
    }

    /// Hex fingerprint with the hop bits of the flags byte cleared, shared by
    /// every retransmitted copy of the same device message.
    pub fn fingerprint(&self) -> String {
        let mut bytes = self.raw.to_vec();
        if let Some(pos) = self.schema.offset(Field::MsgFlags, false, bytes.len()) {
            bytes[pos] &= 0xF0;
        }
        hex::encode_upper(bytes)
    }
}

impl fmt::Debug for PlmMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlmMessage")
            .field("name", &self.schema.name)
            .field("direction", &self.direction)
            .field("raw", &self.to_hex())
            .finish()
    }
}

impl PartialEq for PlmMessage {
    fn eq(&self, other: &Self) -> bool {
        self.direction == other.direction && self.raw == other.raw
    }
}

impl Eq for PlmMessage {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::insteon::MessageType;

    fn unhex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_parse_standard_received() {
        let msg = PlmMessage::parse(&unhex("02501122334455662B0000")).unwrap();
        assert_eq!(msg.command(), PlmCommand::InsteonReceived);
        let insteon = msg.insteon().unwrap();
        assert_eq!(insteon.from(), Some(Address::new(0x11, 0x22, 0x33)));
        assert_eq!(insteon.to(), Some(Address::new(0x44, 0x55, 0x66)));
        assert_eq!(insteon.cmd1(), 0x00);
        assert_eq!(insteon.cmd2(), 0x00);
        assert_eq!(insteon.message_type(), MessageType::DirectAck);
        assert_eq!(msg.get(Field::Usr(1)), None);
        assert_eq!(msg.get(Field::LinkFlags), None);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            PlmMessage::parse(&unhex("0350")).unwrap_err(),
            ProtocolError::MissingSync(0x03)
        );
        assert_eq!(
            PlmMessage::parse(&unhex("02FF")).unwrap_err(),
            ProtocolError::UnknownCommand(0xFF)
        );
        assert!(matches!(
            PlmMessage::parse(&unhex("0250112233")),
            Err(ProtocolError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_response_position_shifts_for_extended_echo() {
        let standard = PlmMessage::parse(&unhex("02621CB587052BFB06")).unwrap();
        assert_eq!(standard.response(), Some(PlmResponse::Ack));

        let mut ext = unhex("02621CB5871F2F00");
        ext.extend_from_slice(&[0u8; 14]);
        ext.push(0x15);
        let extended = PlmMessage::parse(&ext).unwrap();
        assert_eq!(extended.len(), 23);
        assert_eq!(extended.response(), Some(PlmResponse::Nack));

        let bad = PlmMessage::parse(&unhex("02690F")).unwrap();
        assert_eq!(bad.response(), Some(PlmResponse::BadCommand));
    }

    #[test]
    fn test_outbound_frame_and_echo() {
        let mut sent = PlmMessage::outbound(PlmCommand::InsteonSend, false).unwrap();
        sent.set(Field::ToAddrHi, 0x1C).unwrap();
        sent.set(Field::ToAddrMid, 0xB5).unwrap();
        sent.set(Field::ToAddrLow, 0x87).unwrap();
        sent.set(Field::MsgFlags, 0x05).unwrap();
        sent.set(Field::Cmd1, 0x2B).unwrap();
        sent.set(Field::Cmd2, 0xFB).unwrap();
        assert_eq!(sent.as_bytes(), unhex("02621CB587052BFB").as_slice());
        assert!(sent.set(Field::Usr(1), 0).is_err());
        assert_eq!(sent.response(), None);

        let echo = PlmMessage::parse(&unhex("02621CB587052BFB06")).unwrap();
        assert!(echo.echoes(&sent));

        let other = PlmMessage::parse(&unhex("02621CB587052BFC06")).unwrap();
        assert!(!other.echoes(&sent));
    }

    #[test]
    fn test_info_echo_matches_by_command() {
        let sent = PlmMessage::outbound(PlmCommand::PlmInfo, false).unwrap();
        let reply = PlmMessage::parse(&unhex("0260AABBCC03150006")).unwrap();
        assert!(reply.echoes(&sent));
        assert_eq!(reply.get(Field::DevCat), Some(0x03));
    }

    #[test]
    fn test_receive_only_frames_are_not_sendable() {
        assert_eq!(
            PlmMessage::outbound(PlmCommand::InsteonReceived, false).unwrap_err(),
            ProtocolError::NotSendable("insteon_received")
        );
    }

    #[test]
    fn test_fingerprint_ignores_hops() {
        let a = PlmMessage::parse(&unhex("02501122334455662F1100")).unwrap();
        let b = PlmMessage::parse(&unhex("0250112233445566231100")).unwrap();
        let c = PlmMessage::parse(&unhex("0250112233445566231300")).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
