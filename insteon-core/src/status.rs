//! Serializable snapshots of engine state for status reporting.

use crate::conversation::Label;
use crate::device::DeviceNode;
use crate::node::{Attributes, Node, NodeId};
use crate::queue::MessageToken;
use crate::x10::{X10Address, X10Device};
use insteon_protocol::Address;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct InFlightStatus {
    pub token: MessageToken,
    pub node: NodeId,
    pub command: &'static str,
    pub gateway_ack: bool,
    pub device_ack: bool,
    pub gateway_retries: u8,
    pub device_retries: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub address: Address,
    pub attributes: Attributes,
    pub aldb_records: usize,
    pub conversation: Label,
    pub queued: usize,
    pub smart_hops: u8,
    /// Hops used by recent inbound messages, oldest first.
    pub hop_history: Vec<u8>,
}

impl DeviceStatus {
    pub fn from_device(device: &DeviceNode) -> Self {
        Self {
            address: device.address(),
            attributes: device.attributes().clone(),
            aldb_records: device.aldb().len(),
            conversation: device.active_label().clone(),
            queued: device.core().queue.len(),
            smart_hops: device.smart_hops(),
            hop_history: device.hops().history().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct X10Status {
    pub address: X10Address,
    pub status: Option<String>,
    pub queued: usize,
}

impl X10Status {
    pub fn from_device(device: &X10Device) -> Self {
        Self {
            address: device.address(),
            status: device.status().map(str::to_string),
            queued: device.core().queue.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub name: String,
    pub address: Option<Address>,
    pub attributes: Attributes,
    pub aldb_records: usize,
    pub conversation: Label,
    pub queued: usize,
    pub in_flight: Option<InFlightStatus>,
    pub triggers: usize,
    /// Events accumulated and not yet drained.
    pub events: usize,
    pub devices: Vec<DeviceStatus>,
    pub x10_devices: Vec<X10Status>,
}

impl GatewayStatus {
    pub fn device(&self, address: Address) -> Option<&DeviceStatus> {
        self.devices.iter().find(|d| d.address == address)
    }
}
