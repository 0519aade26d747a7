//! Outbound frame construction from declarative field lists.
//!
//! Command definitions describe each byte either as a constant or as a
//! function of the destination node, so the same static table can produce
//! frames that depend on per-node state (on-level, link table cursor).

use crate::address::Address;
use crate::error::ProtocolError;
use crate::insteon::{checksum, MessageFlags};
use crate::message::PlmMessage;
use crate::schema::{Field, PlmCommand};
use std::fmt;

/// Value of one declared field.
pub enum FieldValue<N: ?Sized> {
    Constant(u8),
    Computed(fn(&N) -> u8),
}

impl<N: ?Sized> FieldValue<N> {
    pub fn resolve(&self, node: &N) -> u8 {
        match self {
            FieldValue::Constant(value) => *value,
            FieldValue::Computed(provider) => provider(node),
        }
    }
}

impl<N: ?Sized> Clone for FieldValue<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N: ?Sized> Copy for FieldValue<N> {}

impl<N: ?Sized> fmt::Debug for FieldValue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Constant(value) => write!(f, "Constant({value:#04x})"),
            FieldValue::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Writes every declared field of `fields` into `msg`.
pub fn encode_fields<N: ?Sized>(
    msg: &mut PlmMessage,
    fields: &[(Field, FieldValue<N>)],
    node: &N,
) -> Result<(), ProtocolError> {
    for (field, value) in fields {
        msg.set(*field, value.resolve(node))?;
    }
    Ok(())
}

/// Builds a 0x62 device send addressed to `to`.
pub fn encode_insteon_send<N: ?Sized>(
    to: Address,
    flags: MessageFlags,
    fields: &[(Field, FieldValue<N>)],
    node: &N,
) -> Result<PlmMessage, ProtocolError> {
    let mut msg = PlmMessage::outbound(PlmCommand::InsteonSend, flags.extended)?;
    msg.set(Field::ToAddrHi, to.hi())?;
    msg.set(Field::ToAddrMid, to.mid())?;
    msg.set(Field::ToAddrLow, to.low())?;
    msg.set_flags(flags)?;
    encode_fields(&mut msg, fields, node)?;
    Ok(msg)
}

/// Stores the checksum of cmd_1, cmd_2 and usr_1..usr_13 in usr_14.
pub fn apply_checksum(msg: &mut PlmMessage) -> Result<(), ProtocolError> {
    let mut covered = Vec::with_capacity(15);
    for field in [Field::Cmd1, Field::Cmd2] {
        covered.push(msg.get(field).unwrap_or(0));
    }
    for n in 1..=13 {
        let value = msg.get(Field::Usr(n)).ok_or(ProtocolError::FieldNotInSchema {
            field: Field::Usr(n),
            name: msg.schema().name,
        })?;
        covered.push(value);
    }
    msg.set(Field::Usr(14), checksum(&covered))
}
