//! Device messages relayed by the gateway.

use super::{Dispatch, Plm};
use crate::commands;
use crate::dispatch::{route_direct_ack, AckAction, AckContext};
use crate::event::NetworkEvent;
use crate::node::{attr, Node, NodeId};
use crate::queue::MessageToken;
use crate::scheduler::{AckTier, FailureReason};
use insteon_protocol::{Address, Field, MessageFlags, MessageType, NackReason, PlmMessage};
use std::time::{Duration, Instant};

/// The device message a direct ack or nack may answer.
pub(super) struct SentInfo {
    pub token: MessageToken,
    pub command: Option<&'static str>,
    pub message: PlmMessage,
}

impl SentInfo {
    fn cmd1(&self) -> Option<u8> {
        self.message.get(Field::Cmd1)
    }

    fn cmd2(&self) -> Option<u8> {
        self.message.get(Field::Cmd2)
    }
}

impl Plm {
    fn hop_delay(&self, flags: &MessageFlags) -> Duration {
        self.config.hop_delay(flags.extended)
    }

    /// The in-flight message to `address` still waiting for its device ack.
    pub(super) fn awaiting_device_ack(&self, address: Address) -> Option<SentInfo> {
        let flight = self.slot.current()?;
        if flight.origin != NodeId::Device(address)
            || !flight.gateway_ack
            || flight.device_ack
            || !flight.outbound.delivery.expects_device_ack
        {
            return None;
        }
        let device = self.devices.get(&address)?;
        if device.last_sent() != Some(flight.outbound.token) {
            return None;
        }
        Some(SentInfo {
            token: flight.outbound.token,
            command: flight.outbound.delivery.command,
            message: flight.outbound.message.clone(),
        })
    }

    pub(super) fn handle_device_message(&mut self, msg: &PlmMessage, now: Instant) -> Dispatch {
        let Some(view) = msg.insteon() else {
            return Dispatch::Suppressed;
        };
        let Some(from) = view.from() else {
            return Dispatch::Suppressed;
        };
        let flags = view.flags();
        let hop_delay = self.hop_delay(&flags);

        let Some(device) = self.devices.get_mut(&from) else {
            self.emit(NetworkEvent::UnknownDevice { address: from });
            return Dispatch::Suppressed;
        };
        let expires = now + hop_delay * u32::from(flags.hops_left);
        if device.recent_mut().check_and_insert(msg.fingerprint(), now, expires) {
            self.emit(NetworkEvent::DuplicateSuppressed { address: from });
            return Dispatch::Suppressed;
        }
        device.record_hops(flags.hops_used());
        let checked = device.engine_version().is_some_and(|v| v >= 2);
        if view.is_extended() && checked && !view.checksum_valid() {
            self.emit(NetworkEvent::InvalidChecksum { address: from });
        }

        let (cmd1, cmd2) = (view.cmd1(), view.cmd2());
        match flags.message_type {
            MessageType::DirectAck => self.handle_direct_ack(from, &flags, cmd1, cmd2, now),
            MessageType::DirectNack => self.handle_direct_nack(from, &flags, cmd1, cmd2, now),
            MessageType::Broadcast => {
                self.slot.hold_for(now, hop_delay * u32::from(flags.hops_left));
                if let (Some(to), Some(device)) = (view.to(), self.devices.get_mut(&from)) {
                    device.set_identity(to.hi(), to.mid(), to.low());
                }
                self.emit(NetworkEvent::DeviceMessage {
                    address: from,
                    message_type: flags.message_type,
                    cmd1,
                    cmd2,
                });
            }
            MessageType::AllLinkBroadcast | MessageType::AllLinkCleanup => {
                self.slot.hold_for(now, hop_delay * u32::from(flags.hops_left));
                self.emit(NetworkEvent::DeviceMessage {
                    address: from,
                    message_type: flags.message_type,
                    cmd1,
                    cmd2,
                });
            }
            MessageType::AllLinkCleanupAck => self.handle_cleanup_ack(from, cmd1, cmd2, now),
            MessageType::AllLinkCleanupNack => self.emit(NetworkEvent::DeviceNack {
                address: from,
                cmd1,
                reason: NackReason::from_cmd2(cmd2),
            }),
            MessageType::Direct => {
                tracing::debug!(
                    "[{}] Direct message from {}: {:#04x} {:#04x}",
                    self.name,
                    from,
                    cmd1,
                    cmd2
                );
            }
        }
        Dispatch::Handled
    }

    fn handle_direct_ack(
        &mut self,
        from: Address,
        flags: &MessageFlags,
        cmd1: u8,
        cmd2: u8,
        now: Instant,
    ) {
        let hop_delay = self.hop_delay(flags);
        let hold = hop_delay * u32::from(flags.hops_left)
            + hop_delay * (u32::from(flags.max_hops) + 1) * 2;
        self.slot.hold_for(now, hold);

        let Some(sent) = self.awaiting_device_ack(from) else {
            self.emit(NetworkEvent::UnexpectedAck { address: from, cmd1 });
            return;
        };

        let action = if sent.command == Some(commands::LIGHT_STATUS_REQUEST) {
            if let Some(device) = self.devices.get_mut(&from) {
                device.set_attribute(attr::ALDB_DELTA, cmd1);
                device.set_attribute(attr::STATUS, cmd2);
            }
            None
        } else {
            let ctx = self.devices.get(&from).map(|device| AckContext {
                dev_cat: device.dev_cat(),
                sub_cat: device.sub_cat(),
                firmware: device.firmware(),
                sent_cmd2: sent.cmd2(),
            });
            match ctx.and_then(|ctx| route_direct_ack(cmd1, &ctx)) {
                Some(action) => Some(action),
                None if sent.cmd1() == Some(cmd1) => None,
                None => {
                    self.emit(NetworkEvent::UnexpectedAck { address: from, cmd1 });
                    return;
                }
            }
        };

        if let Some(flight) = self.slot.current_mut() {
            flight.device_ack = true;
        }
        self.complete_if_resolved(now);

        if let Some(action) = action {
            self.apply_ack_action(from, action, cmd2, &sent, now);
        }
    }

    fn apply_ack_action(
        &mut self,
        from: Address,
        action: AckAction,
        cmd2: u8,
        sent: &SentInfo,
        now: Instant,
    ) {
        tracing::debug!("[{}] Ack {:?} from {} with {:#04x}", self.name, action, from, cmd2);
        match action {
            AckAction::EngineVersion => {
                let deferred = match self.devices.get_mut(&from) {
                    Some(device) => {
                        device.set_attribute(attr::ENGINE_VERSION, cmd2);
                        device.scan_deferred()
                    }
                    None => false,
                };
                if deferred {
                    if let Err(e) = self.query_device_aldb(from, now) {
                        tracing::warn!(
                            "[{}] Failed to start link table read of {}: {}",
                            self.name,
                            from,
                            e
                        );
                    }
                }
            }
            AckAction::OperatingFlags => {
                if let Some(device) = self.devices.get_mut(&from) {
                    device.set_attribute(attr::OPERATING_FLAGS, cmd2);
                }
            }
            AckAction::AldbDelta => {
                if let Some(device) = self.devices.get_mut(&from) {
                    device.set_attribute(attr::ALDB_DELTA, cmd2);
                }
            }
            AckAction::SetAddressMsb => self.on_set_msb_ack(from, cmd2, now),
            AckAction::PeekByte => {
                if sent.command == Some(commands::PEEK_ONE_BYTE) {
                    self.on_peek_ack(from, cmd2, now);
                }
            }
            AckAction::AldbAccess => {
                if sent.command == Some(commands::WRITE_ALDB) {
                    self.on_write_ack(from, &sent.message);
                }
            }
        }
    }

    fn handle_direct_nack(
        &mut self,
        from: Address,
        flags: &MessageFlags,
        cmd1: u8,
        cmd2: u8,
        now: Instant,
    ) {
        let hold = self.hop_delay(flags) * u32::from(flags.hops_left);
        self.slot.hold_for(now, hold);

        let reason = NackReason::from_cmd2(cmd2);
        self.emit(NetworkEvent::DeviceNack {
            address: from,
            cmd1,
            reason,
        });

        let Some(sent) = self.awaiting_device_ack(from) else {
            return;
        };
        let Some(mut flight) = self.slot.take() else {
            return;
        };
        if reason.is_retryable()
            && flight.outbound.device_retries < self.config.max_device_retries
        {
            flight.outbound.device_retries += 1;
            self.emit(NetworkEvent::Retry {
                node: flight.origin,
                token: sent.token,
                tier: AckTier::Device,
                attempt: flight.outbound.device_retries,
            });
            self.requeue(flight.origin, flight.outbound, now);
        } else {
            self.message_failed(
                flight.origin,
                &flight.outbound,
                FailureReason::DeviceNack { reason },
            );
        }
    }

    /// A device acked the cleanup of a group send: cleanups still queued for
    /// the same command are no longer needed.
    fn handle_cleanup_ack(&mut self, from: Address, cmd1: u8, cmd2: u8, now: Instant) {
        let is_cleanup = |command: Option<&'static str>| {
            matches!(command, Some(commands::ON_CLEANUP) | Some(commands::OFF_CLEANUP))
        };
        let same_command = |msg: &PlmMessage| {
            msg.get(Field::Cmd1) == Some(cmd1) && msg.get(Field::Cmd2) == Some(cmd2)
        };

        if let Some(device) = self.devices.get_mut(&from) {
            let removed = device
                .core_mut()
                .queue
                .retain(|o| !(is_cleanup(o.delivery.command) && same_command(&o.message)));
            if removed > 0 {
                tracing::debug!("[{}] Dropped {} queued cleanups to {}", self.name, removed, from);
            }
        }

        let last_sent = self.devices.get(&from).and_then(|d| d.last_sent());
        if let Some(flight) = self.slot.current_mut() {
            if flight.origin == NodeId::Device(from)
                && last_sent == Some(flight.outbound.token)
                && is_cleanup(flight.outbound.delivery.command)
                && same_command(&flight.outbound.message)
            {
                flight.device_ack = true;
            }
        }
        self.complete_if_resolved(now);
    }
}
