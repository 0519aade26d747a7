//! Protocol engine of one gateway.
//!
//! A [`Plm`] owns the gateway node, every device reached through it, the
//! single send slot and the inbound framer. It is driven from outside: bytes
//! read from the transport go into [`Plm::receive`], and [`Plm::poll_send`]
//! yields the next frame to write. Time is always passed in, which keeps the
//! engine deterministic under test.

mod device_rx;
mod gateway_rx;
mod scan;
mod x10_rx;

use crate::config::EngineConfig;
use crate::conversation::Label;
use crate::device::DeviceNode;
use crate::error::CoreError;
use crate::event::NetworkEvent;
use crate::gateway::{GatewayNode, LinkRequest, PendingLink};
use crate::node::{Node, NodeId, NodeSnapshot};
use crate::queue::{Delivery, MessageToken, Outbound};
use crate::scheduler::{AckTier, FailureReason, InFlight, SendSlot, UnackedAction};
use crate::status::{DeviceStatus, GatewayStatus, InFlightStatus, X10Status};
use crate::transport::Transport;
use crate::trigger::{self, TriggerManager};
use crate::x10::{X10Address, X10Device};
use bytes::Bytes;
use insteon_protocol::{Address, Field, Framer, FramerOutput, PlmCommand, PlmMessage};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

/// Events kept before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 1024;

const READ_CHUNK: usize = 256;

/// Whether a frame reached its handler, and so may fire triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Handled,
    Suppressed,
}

struct Candidate {
    id: NodeId,
    expired: Option<(Label, usize)>,
    head: Option<Instant>,
}

fn candidate<N: Node>(node: &mut N, now: Instant, timeout: Duration) -> Candidate {
    let id = node.id();
    let core = node.core_mut();
    let (expired, head) = core.candidate(now, timeout);
    let expired = expired.map(|e| {
        let pending = core.queue.pending(&e.label).count();
        (e.label, pending)
    });
    Candidate { id, expired, head }
}

fn triggers_of(plm: &mut Plm) -> &mut TriggerManager<Plm> {
    &mut plm.triggers
}

/// Host-side engine for one Power-Line Modem.
pub struct Plm {
    name: String,
    config: EngineConfig,
    gateway: GatewayNode,
    devices: BTreeMap<Address, DeviceNode>,
    x10_devices: BTreeMap<X10Address, X10Device>,
    /// Last X10 address heard or sent; X10 commands apply to it.
    x10_last: Option<X10Address>,
    slot: SendSlot,
    framer: Framer,
    triggers: TriggerManager<Plm>,
    events: VecDeque<NetworkEvent>,
    next_token: u64,
}

impl Plm {
    pub fn new(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            gateway: GatewayNode::new(),
            devices: BTreeMap::new(),
            x10_devices: BTreeMap::new(),
            x10_last: None,
            slot: SendSlot::new(),
            framer: Framer::new(),
            triggers: TriggerManager::new(),
            events: VecDeque::new(),
            next_token: 1,
        }
    }

    /// Rebuilds an engine from a saved snapshot. Queues and in-flight state
    /// are never persisted, so the engine starts idle.
    pub fn from_snapshot(
        name: impl Into<String>,
        config: EngineConfig,
        snapshot: &NodeSnapshot,
    ) -> Result<Self, CoreError> {
        let mut plm = Self::new(name, config);
        let core = plm.gateway.core_mut();
        for (attr, value) in snapshot.attributes.iter() {
            core.attributes.set(attr.clone(), value.clone());
        }
        core.aldb.load_snapshot(&snapshot.aldb)?;

        for (id, device) in &snapshot.devices {
            if let Ok(address) = id.parse::<Address>() {
                let node = DeviceNode::from_snapshot(address, device, &plm.config.hops)?;
                plm.devices.insert(address, node);
                continue;
            }
            let address: X10Address = id.parse().map_err(|_| CoreError::InvalidSnapshot {
                reason: format!("bad device address '{id}'"),
            })?;
            plm.x10_devices.insert(address, X10Device::from_snapshot(address, device));
        }
        Ok(plm)
    }

    /// Gateway attributes and link table with every device nested under
    /// `Devices`. X10 devices are keyed by their house and unit code.
    pub fn snapshot(&self) -> NodeSnapshot {
        let mut snapshot = self.gateway.snapshot();
        snapshot.devices = self
            .devices
            .iter()
            .map(|(address, device)| (address.to_string(), device.snapshot()))
            .chain(
                self.x10_devices
                    .iter()
                    .map(|(address, device)| (address.to_string(), device.snapshot())),
            )
            .collect();
        snapshot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &GatewayNode {
        &self.gateway
    }

    pub fn device(&self, address: Address) -> Option<&DeviceNode> {
        self.devices.get(&address)
    }

    pub fn device_mut(&mut self, address: Address) -> Option<&mut DeviceNode> {
        self.devices.get_mut(&address)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceNode> {
        self.devices.values()
    }

    /// Registers a device reached through this gateway.
    pub fn add_device(&mut self, address: Address) -> Result<&mut DeviceNode, CoreError> {
        if self.devices.contains_key(&address) {
            return Err(CoreError::DeviceExists { address });
        }
        tracing::info!("[{}] Added device {}", self.name, address);
        let node = DeviceNode::new(address, &self.config.hops);
        Ok(self.devices.entry(address).or_insert(node))
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.slot.current()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    pub fn events(&self) -> impl Iterator<Item = &NetworkEvent> {
        self.events.iter()
    }

    /// Removes and returns every accumulated event, oldest first.
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn emit(&mut self, event: NetworkEvent) {
        if event.is_failure() {
            tracing::warn!("[{}] {}", self.name, event);
        } else {
            tracing::debug!("[{}] {}", self.name, event);
        }
        if self.events.len() >= EVENT_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn allocate_token(&mut self) -> MessageToken {
        let token = MessageToken(self.next_token);
        self.next_token += 1;
        token
    }

    fn device_or_err(&mut self, address: Address) -> Result<&mut DeviceNode, CoreError> {
        self.devices
            .get_mut(&address)
            .ok_or(CoreError::DeviceNotFound { address })
    }

    pub(crate) fn queue_gateway(
        &mut self,
        message: PlmMessage,
        label: Label,
        delivery: Delivery,
        now: Instant,
    ) -> MessageToken {
        let token = self.allocate_token();
        tracing::debug!(
            "[{}] Queued {} as {} under '{}'",
            self.name,
            message.to_hex(),
            token,
            label
        );
        let outbound = Outbound::new(token, message, label, delivery, now);
        self.gateway.core_mut().enqueue(outbound);
        token
    }

    pub(crate) fn queue_device(
        &mut self,
        address: Address,
        command: &str,
        overrides: &[(Field, u8)],
        label: Label,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let (message, delivery) = self.device_or_err(address)?.build_command(command, overrides)?;
        let token = self.allocate_token();
        tracing::debug!(
            "[{}] Queued {} to {} as {} under '{}'",
            self.name,
            command,
            address,
            token,
            label
        );
        let outbound = Outbound::new(token, message, label, delivery, now);
        self.device_or_err(address)?.core_mut().enqueue(outbound);
        Ok(token)
    }

    /// Queues the catalog command `command` to a device.
    pub fn send_command(
        &mut self,
        address: Address,
        command: &str,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        self.queue_device(address, command, &[], Label::DEFAULT, now)
    }

    /// Queues a catalog command with field overrides under a conversation
    /// label.
    pub fn send_device_command(
        &mut self,
        address: Address,
        command: &str,
        overrides: &[(Field, u8)],
        label: Label,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        self.queue_device(address, command, overrides, label, now)
    }

    /// Asks the gateway for its address and identity.
    pub fn query_plm_info(&mut self, now: Instant) -> Result<MessageToken, CoreError> {
        let message = PlmMessage::outbound(PlmCommand::PlmInfo, false)?;
        Ok(self.queue_gateway(message, Label::DEFAULT, Delivery::gateway_only(), now))
    }

    /// Asks the gateway for its configuration flags.
    pub fn query_plm_config(&mut self, now: Instant) -> Result<MessageToken, CoreError> {
        let message = PlmMessage::outbound(PlmCommand::GetConfig, false)?;
        Ok(self.queue_gateway(message, Label::DEFAULT, Delivery::gateway_only(), now))
    }

    /// Writes a link into the gateway's table, adding or modifying depending
    /// on the cached table.
    pub fn write_link(
        &mut self,
        request: LinkRequest,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        self.queue_link_write(request, false, now)
    }

    fn queue_link_write(
        &mut self,
        request: LinkRequest,
        repaired: bool,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let message = self.gateway.build_link_write(&request)?;
        let token = self.queue_gateway(message, Label::DEFAULT, Delivery::gateway_only(), now);
        self.gateway.track_link_write(token, PendingLink { request, repaired });
        Ok(token)
    }

    /// Sends an all-link command to `group`, then cleanups to every device
    /// the gateway controls in it.
    pub fn send_group_command(
        &mut self,
        group: u8,
        cmd1: u8,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let mut message = PlmMessage::outbound(PlmCommand::AllLinkSend, false)?;
        message.set(Field::Group, group)?;
        message.set(Field::Cmd1, cmd1)?;
        message.set(Field::Cmd2, 0x00)?;
        let delivery = Delivery {
            command: None,
            expects_device_ack: false,
            seq_lock: Some(self.config.group_send_lock()),
        };
        let token = self.queue_gateway(message, Label::ALL_LINK_SEND, delivery, now);

        let cleanup = match cmd1 {
            0x11 => crate::commands::ON_CLEANUP,
            0x13 => crate::commands::OFF_CLEANUP,
            _ => return Ok(token),
        };
        for address in self.gateway.controlled_in_group(group) {
            if !self.devices.contains_key(&address) {
                tracing::debug!(
                    "[{}] No device {} for group {} cleanup",
                    self.name,
                    address,
                    group
                );
                continue;
            }
            self.queue_device(address, cleanup, &[(Field::Cmd2, group)], Label::DEFAULT, now)?;
        }
        Ok(token)
    }

    /// Feeds bytes read from the transport.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) {
        self.framer.extend(bytes);
        while let Some(output) = self.framer.decode() {
            match output {
                FramerOutput::Frame(frame) => self.process_frame(&frame, now),
                FramerOutput::Busy => {
                    self.slot.hold_for(now, self.config.busy_backoff());
                    self.emit(NetworkEvent::GatewayBusy);
                }
                FramerOutput::Discarded(bytes) => self.emit(NetworkEvent::BytesDiscarded {
                    bytes: hex::encode_upper(&bytes),
                }),
                FramerOutput::UnknownCommand { code, discarded } => {
                    self.emit(NetworkEvent::UnknownCommand {
                        code,
                        bytes: hex::encode_upper(&discarded),
                    })
                }
            }
        }
    }

    fn process_frame(&mut self, frame: &[u8], now: Instant) {
        self.slot.hold_for(now, self.config.inbound_hold());
        let msg = match PlmMessage::parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.emit(NetworkEvent::MalformedFrame {
                    bytes: hex::encode_upper(frame),
                    reason: e.to_string(),
                });
                return;
            }
        };
        tracing::debug!("[{}] Received {} {}", self.name, msg.command().name(), msg.to_hex());

        if self.dispatch(&msg, now) == Dispatch::Handled {
            trigger::fire(self, triggers_of, &msg, now);
        }
    }

    fn dispatch(&mut self, msg: &PlmMessage, now: Instant) -> Dispatch {
        if msg.schema().send_len.is_some() {
            self.handle_echo(msg, now);
            return Dispatch::Handled;
        }
        match msg.command() {
            PlmCommand::InsteonReceived | PlmCommand::InsteonExtReceived => {
                return self.handle_device_message(msg, now);
            }
            PlmCommand::AllLinkComplete => self.handle_all_link_complete(msg),
            PlmCommand::ButtonEvent => {
                let event = msg.get(Field::BtnEvent).unwrap_or(0);
                self.emit(NetworkEvent::ButtonEvent { event });
            }
            PlmCommand::UserReset => {
                self.gateway.core_mut().aldb.clear();
                self.emit(NetworkEvent::UserReset);
            }
            PlmCommand::AllLinkCleanFailed => {
                let group = msg.get(Field::Group).unwrap_or(0);
                let address = address_of(
                    msg,
                    [Field::FailAddrHi, Field::FailAddrMid, Field::FailAddrLow],
                );
                self.emit(NetworkEvent::AllLinkCleanFailed { group, address });
            }
            PlmCommand::AllLinkRecord => self.handle_link_record(msg, now),
            PlmCommand::AllLinkCleanStatus => self.handle_clean_status(msg),
            PlmCommand::X10Received => self.handle_x10(msg),
            other => tracing::debug!("[{}] No handler for {}", self.name, other.name()),
        }
        Dispatch::Handled
    }

    /// Drops triggers whose lifetime ran out.
    pub fn purge_triggers(&mut self, now: Instant) {
        for name in self.triggers.purge_expired(now) {
            self.emit(NetworkEvent::TriggerExpired { name });
        }
    }

    /// Applies ack timeouts to the in-flight message.
    pub fn check_unacked(&mut self, now: Instant) {
        match self.slot.check_unacked(now, &self.config) {
            UnackedAction::None => {}
            UnackedAction::Resend { origin, outbound, tier } => {
                let attempt = match tier {
                    AckTier::Gateway => outbound.gateway_retries,
                    AckTier::Device => outbound.device_retries,
                };
                self.emit(NetworkEvent::Retry {
                    node: origin,
                    token: outbound.token,
                    tier,
                    attempt,
                });
                self.requeue(origin, outbound, now);
            }
            UnackedAction::Failed { origin, outbound, reason } => {
                self.message_failed(origin, &outbound, reason)
            }
            UnackedAction::LockReleased { outbound, .. } => {
                self.emit(NetworkEvent::SequenceLockReleased { token: outbound.token });
            }
        }
    }

    fn requeue(&mut self, origin: NodeId, outbound: Outbound, now: Instant) {
        match origin {
            NodeId::Gateway => self.gateway.core_mut().requeue(outbound, now),
            NodeId::Device(address) => match self.devices.get_mut(&address) {
                Some(device) => device.core_mut().requeue(outbound, now),
                None => tracing::warn!(
                    "[{}] Dropped retry of {} to removed device {}",
                    self.name,
                    outbound.token,
                    address
                ),
            },
            NodeId::X10(address) => match self.x10_devices.get_mut(&address) {
                Some(device) => device.core_mut().requeue(outbound, now),
                None => tracing::warn!(
                    "[{}] Dropped retry of {} to removed X10 device {}",
                    self.name,
                    outbound.token,
                    address
                ),
            },
        }
    }

    fn message_failed(&mut self, origin: NodeId, outbound: &Outbound, reason: FailureReason) {
        self.emit(NetworkEvent::MessageFailed {
            node: origin,
            token: outbound.token,
            reason,
        });
        if let Some(pending) = self.gateway.take_link_write(outbound.token) {
            self.emit(NetworkEvent::LinkWriteFailed {
                group: pending.request.group,
                address: pending.request.address,
                controller: pending.request.controller,
            });
        }
    }

    /// Fails whatever occupies the send slot.
    fn fail_in_flight(&mut self, reason: FailureReason) {
        if let Some(flight) = self.slot.take() {
            self.message_failed(flight.origin, &flight.outbound, reason);
        }
    }

    /// Vacates the send slot once every acknowledgement arrived and keeps the
    /// message's conversation alive.
    fn complete_if_resolved(&mut self, now: Instant) {
        let Some(flight) = self.slot.take_if_resolved() else {
            return;
        };
        tracing::debug!(
            "[{}] {} message {} complete",
            self.name,
            flight.origin,
            flight.outbound.token
        );
        let label = &flight.outbound.label;
        match flight.origin {
            NodeId::Gateway => self.gateway.core_mut().refresh(label, now),
            NodeId::Device(address) => {
                if let Some(device) = self.devices.get_mut(&address) {
                    device.core_mut().refresh(label, now);
                }
            }
            NodeId::X10(address) => {
                if let Some(device) = self.x10_devices.get_mut(&address) {
                    device.core_mut().refresh(label, now);
                }
            }
        }
    }

    /// Picks the node whose next eligible message is oldest. Expired
    /// conversations are reported on the way. The gateway wins ties.
    fn next_origin(&mut self, now: Instant) -> Option<NodeId> {
        let timeout = self.config.conversation_timeout();
        let mut candidates = Vec::with_capacity(self.devices.len() + self.x10_devices.len() + 1);
        candidates.push(candidate(&mut self.gateway, now, timeout));
        for device in self.devices.values_mut() {
            candidates.push(candidate(device, now, timeout));
        }
        for device in self.x10_devices.values_mut() {
            candidates.push(candidate(device, now, timeout));
        }

        let mut best: Option<(NodeId, Instant)> = None;
        for c in candidates {
            if let Some((label, pending)) = c.expired {
                self.emit(NetworkEvent::ConversationExpired {
                    node: c.id,
                    label,
                    pending,
                });
            }
            if let Some(head) = c.head {
                if best.map_or(true, |(_, oldest)| head < oldest) {
                    best = Some((c.id, head));
                }
            }
        }
        best.map(|(id, _)| id)
    }

    /// Takes the next message to transmit, if the slot allows one.
    pub fn poll_send(&mut self, now: Instant) -> Option<Bytes> {
        if !self.slot.can_send(now) {
            return None;
        }
        let origin = self.next_origin(now)?;
        let outbound = match origin {
            NodeId::Gateway => self.gateway.core_mut().pop_eligible(now),
            NodeId::Device(address) => {
                let device = self.devices.get_mut(&address)?;
                let outbound = device.core_mut().pop_eligible(now);
                if let Some(outbound) = &outbound {
                    device.set_last_sent(outbound.token);
                }
                outbound
            }
            NodeId::X10(address) => {
                self.x10_devices.get_mut(&address)?.core_mut().pop_eligible(now)
            }
        }?;

        let bytes = outbound.message.to_bytes();
        tracing::debug!(
            "[{}] Sending {} ({}) for {}",
            self.name,
            outbound.message.to_hex(),
            outbound.token,
            origin
        );
        self.slot.occupy(InFlight::new(outbound, origin, now));
        Some(bytes)
    }

    /// One pass of the engine loop: drain the transport, expire triggers and
    /// timeouts, then write at most one frame. Returns whether a frame was
    /// written.
    pub fn poll<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now: Instant,
    ) -> Result<bool, CoreError> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = transport.read_available(&mut buf)?;
            if n == 0 {
                break;
            }
            self.receive(&buf[..n], now);
        }

        self.purge_triggers(now);
        self.check_unacked(now);

        match self.poll_send(now) {
            Some(frame) => {
                transport.write_frame(&frame)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Point-in-time view of the engine.
    pub fn status(&self) -> GatewayStatus {
        let in_flight = self.slot.current().map(|flight| InFlightStatus {
            token: flight.outbound.token,
            node: flight.origin,
            command: flight
                .outbound
                .delivery
                .command
                .unwrap_or_else(|| flight.outbound.message.command().name()),
            gateway_ack: flight.gateway_ack,
            device_ack: flight.device_ack,
            gateway_retries: flight.outbound.gateway_retries,
            device_retries: flight.outbound.device_retries,
        });
        GatewayStatus {
            name: self.name.clone(),
            address: self.gateway.address(),
            attributes: self.gateway.attributes().clone(),
            aldb_records: self.gateway.aldb().len(),
            conversation: self.gateway.active_label().clone(),
            queued: self.gateway.core().queue.len(),
            in_flight,
            triggers: self.triggers.len(),
            events: self.events.len(),
            devices: self.devices.values().map(DeviceStatus::from_device).collect(),
            x10_devices: self.x10_devices.values().map(X10Status::from_device).collect(),
        }
    }
}

pub(crate) fn address_of(msg: &PlmMessage, fields: [Field; 3]) -> Address {
    let [hi, mid, low] = fields.map(|f| msg.get(f).unwrap_or(0));
    Address::new(hi, mid, low)
}
