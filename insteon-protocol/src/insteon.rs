//! Device-to-device message carried inside PLM frames.
//!
//! Flags byte layout:
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//! +-----------+---+-------+-------+
//! | msg type  |ext| hops  |  max  |
//! |           |   | left  | hops  |
//! +-----------+---+-------+-------+
//! ```

use crate::address::Address;
use crate::message::PlmMessage;
use crate::schema::{Field, PlmCommand};
use serde::{Deserialize, Serialize};

/// Message type carried in the top three bits of the flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Direct,
    DirectAck,
    AllLinkCleanup,
    AllLinkCleanupAck,
    Broadcast,
    DirectNack,
    AllLinkBroadcast,
    AllLinkCleanupNack,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => MessageType::Direct,
            1 => MessageType::DirectAck,
            2 => MessageType::AllLinkCleanup,
            3 => MessageType::AllLinkCleanupAck,
            4 => MessageType::Broadcast,
            5 => MessageType::DirectNack,
            6 => MessageType::AllLinkBroadcast,
            _ => MessageType::AllLinkCleanupNack,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            MessageType::Direct => 0,
            MessageType::DirectAck => 1,
            MessageType::AllLinkCleanup => 2,
            MessageType::AllLinkCleanupAck => 3,
            MessageType::Broadcast => 4,
            MessageType::DirectNack => 5,
            MessageType::AllLinkBroadcast => 6,
            MessageType::AllLinkCleanupNack => 7,
        }
    }
}

/// Decoded flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFlags {
    pub message_type: MessageType,
    pub extended: bool,
    pub hops_left: u8,
    pub max_hops: u8,
}

impl MessageFlags {
    pub const MAX_HOPS: u8 = 3;

    pub fn new(message_type: MessageType, extended: bool, hops: u8) -> Self {
        let hops = hops.min(Self::MAX_HOPS);
        Self {
            message_type,
            extended,
            hops_left: hops,
            max_hops: hops,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            message_type: MessageType::from_bits(byte >> 5),
            extended: byte & 0x10 != 0,
            hops_left: (byte >> 2) & 0x03,
            max_hops: byte & 0x03,
        }
    }

    /// Packs the flags. Hop counts above three are clamped.
    pub fn to_byte(&self) -> u8 {
        (self.message_type.bits() << 5)
            | if self.extended { 0x10 } else { 0 }
            | (self.hops_left.min(Self::MAX_HOPS) << 2)
            | self.max_hops.min(Self::MAX_HOPS)
    }

    /// Hops consumed on the way here.
    pub fn hops_used(&self) -> u8 {
        self.max_hops.saturating_sub(self.hops_left)
    }
}

/// Two's complement checksum of the command and user bytes of an extended
/// message. Adding it to the covered bytes yields zero modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Reason code of a direct NACK, carried in cmd_2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NackReason {
    AddressNotFound,
    NoLoad,
    ChecksumInvalid,
    Pending,
    IllegalValue,
    Unspecified,
}

impl NackReason {
    pub fn from_cmd2(cmd2: u8) -> Self {
        match cmd2 {
            0xFF => NackReason::AddressNotFound,
            0xFE => NackReason::NoLoad,
            0xFD => NackReason::ChecksumInvalid,
            0xFC => NackReason::Pending,
            0xFB => NackReason::IllegalValue,
            _ => NackReason::Unspecified,
        }
    }

    /// Whether sending the same message again can succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, NackReason::ChecksumInvalid | NackReason::Unspecified)
    }
}

/// Read-only view of the device message embedded in a 0x50, 0x51 or 0x62 frame.
#[derive(Debug, Clone, Copy)]
pub struct InsteonMessage<'a> {
    frame: &'a PlmMessage,
}

impl<'a> InsteonMessage<'a> {
    pub(crate) fn new(frame: &'a PlmMessage) -> Option<Self> {
        match frame.command() {
            PlmCommand::InsteonReceived
            | PlmCommand::InsteonExtReceived
            | PlmCommand::InsteonSend => {
                Some(Self { frame })
            }
            _ => None,
        }
    }

    pub fn flags(&self) -> MessageFlags {
        MessageFlags::from_byte(self.frame.get(Field::MsgFlags).unwrap_or(0))
    }

    pub fn message_type(&self) -> MessageType {
        self.flags().message_type
    }

    /// Sender address. Absent on host-originated sends.
    pub fn from(&self) -> Option<Address> {
        self.address(Field::FromAddrHi, Field::FromAddrMid, Field::FromAddrLow)
    }

    pub fn to(&self) -> Option<Address> {
        self.address(Field::ToAddrHi, Field::ToAddrMid, Field::ToAddrLow)
    }

    pub fn cmd1(&self) -> u8 {
        self.frame.get(Field::Cmd1).unwrap_or(0)
    }

    pub fn cmd2(&self) -> u8 {
        self.frame.get(Field::Cmd2).unwrap_or(0)
    }

    pub fn is_extended(&self) -> bool {
        self.flags().extended
    }

    /// The fourteen user data bytes of an extended message.
    pub fn user_data(&self) -> Option<[u8; 14]> {
        let mut out = [0u8; 14];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.frame.get(Field::Usr(i as u8 + 1))?;
        }
        Some(out)
    }

    pub fn usr(&self, n: u8) -> Option<u8> {
        self.frame.get(Field::Usr(n))
    }

    /// Verifies the extended message checksum held in `usr_14`.
    pub fn checksum_valid(&self) -> bool {
        match self.user_data() {
            Some(user) => {
                let mut covered = vec![self.cmd1(), self.cmd2()];
                covered.extend_from_slice(&user[..13]);
                checksum(&covered) == user[13]
            }
            None => false,
        }
    }

    fn address(&self, hi: Field, mid: Field, low: Field) -> Option<Address> {
        Some(Address::new(
            self.frame.get(hi)?,
            self.frame.get(mid)?,
            self.frame.get(low)?,
        ))
    }
}
