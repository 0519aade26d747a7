//! Typed report of everything noteworthy an engine observed.
//!
//! Events are logged when emitted and accumulated per gateway until the
//! owner drains them.

use crate::conversation::Label;
use crate::node::NodeId;
use crate::queue::MessageToken;
use crate::scheduler::{AckTier, FailureReason};
use crate::x10::{X10Address, X10Command};
use insteon_protocol::{Address, MessageType, NackReason};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// Bytes dropped while looking for a frame start.
    BytesDiscarded { bytes: String },
    UnknownCommand { code: u8, bytes: String },
    MalformedFrame { bytes: String, reason: String },
    GatewayBusy,
    /// An echo that does not belong to the in-flight message.
    SpuriousEcho { frame: String },
    GatewayNack { command: &'static str },
    BadCommand { command: &'static str },
    Retry {
        node: NodeId,
        token: MessageToken,
        tier: AckTier,
        attempt: u8,
    },
    MessageFailed {
        node: NodeId,
        token: MessageToken,
        reason: FailureReason,
    },
    SequenceLockReleased { token: MessageToken },
    DeviceNack {
        address: Address,
        cmd1: u8,
        reason: NackReason,
    },
    UnknownDevice { address: Address },
    DuplicateSuppressed { address: Address },
    InvalidChecksum { address: Address },
    UnexpectedAck { address: Address, cmd1: u8 },
    ConversationExpired {
        node: NodeId,
        label: Label,
        pending: usize,
    },
    AldbScanComplete { node: NodeId, records: usize },
    LinkWriteFailed {
        group: u8,
        address: Address,
        controller: bool,
    },
    TriggerExpired { name: String },
    ButtonEvent { event: u8 },
    UserReset,
    AllLinkComplete {
        link_code: u8,
        group: u8,
        address: Address,
    },
    AllLinkCleanFailed { group: u8, address: Address },
    AllLinkCleanStatus { success: bool },
    /// A device announced itself or acted on its own.
    DeviceMessage {
        address: Address,
        message_type: MessageType,
        cmd1: u8,
        cmd2: u8,
    },
    X10Received { raw: u8, flags: u8 },
    /// An X10 command for a known X10 device.
    X10Command {
        address: X10Address,
        command: X10Command,
    },
    UnknownX10Device { address: X10Address },
    /// An X10 command whose house code differs from the last address heard.
    X10HouseMismatch {
        expected: Option<X10Address>,
        raw: u8,
    },
}

impl NetworkEvent {
    /// Snake-case name of the variant, as used in the serialized form.
    pub fn kind(&self) -> &'static str {
        match self {
            NetworkEvent::BytesDiscarded { .. } => "bytes_discarded",
            NetworkEvent::UnknownCommand { .. } => "unknown_command",
            NetworkEvent::MalformedFrame { .. } => "malformed_frame",
            NetworkEvent::GatewayBusy => "gateway_busy",
            NetworkEvent::SpuriousEcho { .. } => "spurious_echo",
            NetworkEvent::GatewayNack { .. } => "gateway_nack",
            NetworkEvent::BadCommand { .. } => "bad_command",
            NetworkEvent::Retry { .. } => "retry",
            NetworkEvent::MessageFailed { .. } => "message_failed",
            NetworkEvent::SequenceLockReleased { .. } => "sequence_lock_released",
            NetworkEvent::DeviceNack { .. } => "device_nack",
            NetworkEvent::UnknownDevice { .. } => "unknown_device",
            NetworkEvent::DuplicateSuppressed { .. } => "duplicate_suppressed",
            NetworkEvent::InvalidChecksum { .. } => "invalid_checksum",
            NetworkEvent::UnexpectedAck { .. } => "unexpected_ack",
            NetworkEvent::ConversationExpired { .. } => "conversation_expired",
            NetworkEvent::AldbScanComplete { .. } => "aldb_scan_complete",
            NetworkEvent::LinkWriteFailed { .. } => "link_write_failed",
            NetworkEvent::TriggerExpired { .. } => "trigger_expired",
            NetworkEvent::ButtonEvent { .. } => "button_event",
            NetworkEvent::UserReset => "user_reset",
            NetworkEvent::AllLinkComplete { .. } => "all_link_complete",
            NetworkEvent::AllLinkCleanFailed { .. } => "all_link_clean_failed",
            NetworkEvent::AllLinkCleanStatus { .. } => "all_link_clean_status",
            NetworkEvent::DeviceMessage { .. } => "device_message",
            NetworkEvent::X10Received { .. } => "x10_received",
            NetworkEvent::X10Command { .. } => "x10_command",
            NetworkEvent::UnknownX10Device { .. } => "unknown_x10_device",
            NetworkEvent::X10HouseMismatch { .. } => "x10_house_mismatch",
        }
    }

    /// Whether the event reports a failure rather than normal progress.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            NetworkEvent::UnknownCommand { .. }
                | NetworkEvent::MalformedFrame { .. }
                | NetworkEvent::GatewayNack { .. }
                | NetworkEvent::BadCommand { .. }
                | NetworkEvent::MessageFailed { .. }
                | NetworkEvent::DeviceNack { .. }
                | NetworkEvent::UnknownDevice { .. }
                | NetworkEvent::UnknownX10Device { .. }
                | NetworkEvent::X10HouseMismatch { .. }
                | NetworkEvent::InvalidChecksum { .. }
                | NetworkEvent::ConversationExpired { .. }
                | NetworkEvent::LinkWriteFailed { .. }
                | NetworkEvent::TriggerExpired { .. }
                | NetworkEvent::AllLinkCleanFailed { .. }
        )
    }
}

impl fmt::Display for NetworkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEvent::BytesDiscarded { bytes } => write!(f, "discarded bytes {bytes}"),
            NetworkEvent::UnknownCommand { code, bytes } => {
                write!(f, "unknown command byte {code:#04x}, dropped {bytes}")
            }
            NetworkEvent::MalformedFrame { bytes, reason } => {
                write!(f, "malformed frame {bytes}: {reason}")
            }
            NetworkEvent::GatewayBusy => f.write_str("gateway busy, backing off"),
            NetworkEvent::SpuriousEcho { frame } => write!(f, "spurious gateway ack {frame}"),
            NetworkEvent::GatewayNack { command } => write!(f, "gateway sent NACK to {command}"),
            NetworkEvent::BadCommand { command } => {
                write!(f, "gateway rejected {command} as bad command")
            }
            NetworkEvent::Retry {
                node,
                token,
                tier,
                attempt,
            } => write!(f, "{node} message {token} not acked ({tier:?}), retry {attempt}"),
            NetworkEvent::MessageFailed { node, token, reason } => {
                write!(f, "{node} message {token} abandoned: {reason:?}")
            }
            NetworkEvent::SequenceLockReleased { token } => {
                write!(f, "sequence lock of {token} expired")
            }
            NetworkEvent::DeviceNack { address, cmd1, reason } => {
                write!(f, "device {address} sent NACK to {cmd1:#04x}: {reason:?}")
            }
            NetworkEvent::UnknownDevice { address } => {
                write!(f, "message from unknown device {address}")
            }
            NetworkEvent::DuplicateSuppressed { address } => {
                write!(f, "skipped duplicate from {address}")
            }
            NetworkEvent::InvalidChecksum { address } => {
                write!(f, "bad extended checksum from {address}")
            }
            NetworkEvent::UnexpectedAck { address, cmd1 } => {
                write!(f, "ignored unexpected ack {cmd1:#04x} from {address}")
            }
            NetworkEvent::ConversationExpired { node, label, pending } => {
                write!(f, "{node} conversation '{label}' expired with {pending} queued")
            }
            NetworkEvent::AldbScanComplete { node, records } => {
                write!(f, "{node} link table read, {records} records")
            }
            NetworkEvent::LinkWriteFailed {
                group,
                address,
                controller,
            } => {
                let role = if *controller { "controller" } else { "responder" };
                write!(f, "gateway {role} link to {address} group {group} failed")
            }
            NetworkEvent::TriggerExpired { name } => write!(f, "trigger '{name}' expired"),
            NetworkEvent::ButtonEvent { event } => write!(f, "gateway button event {event:#04x}"),
            NetworkEvent::UserReset => f.write_str("gateway was manually reset"),
            NetworkEvent::AllLinkComplete {
                link_code,
                group,
                address,
            } => write!(f, "all-link complete with {address} group {group} code {link_code:#04x}"),
            NetworkEvent::AllLinkCleanFailed { group, address } => {
                write!(f, "device {address} failed to ack group {group} cleanup")
            }
            NetworkEvent::AllLinkCleanStatus { success } => {
                write!(f, "group send {}", if *success { "succeeded" } else { "failed" })
            }
            NetworkEvent::DeviceMessage {
                address,
                message_type,
                cmd1,
                cmd2,
            } => write!(f, "{message_type:?} from {address}: {cmd1:#04x} {cmd2:#04x}"),
            NetworkEvent::X10Received { raw, flags } => {
                write!(f, "x10 {raw:#04x} flags {flags:#04x}")
            }
            NetworkEvent::X10Command { address, command } => {
                write!(f, "x10 device {address} received {}", command.name())
            }
            NetworkEvent::UnknownX10Device { address } => {
                write!(f, "x10 command for unknown device {address}")
            }
            NetworkEvent::X10HouseMismatch { expected, raw } => match expected {
                Some(address) => {
                    write!(f, "ignored x10 {raw:#04x}, expected house {}", address.house())
                }
                None => write!(f, "ignored x10 {raw:#04x} without a preceding address"),
            },
        }
    }
}
