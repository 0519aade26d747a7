//! X10 modules behind the gateway.
//!
//! The PLM relays X10 traffic as an address frame followed by a command
//! frame. The engine remembers the last address it heard or sent and
//! applies the next command to it when the house codes agree.

use super::Plm;
use crate::conversation::Label;
use crate::error::CoreError;
use crate::event::NetworkEvent;
use crate::node::Node;
use crate::queue::{Delivery, MessageToken, Outbound};
use crate::x10::{X10Address, X10Command, X10Device, X10_FLAGS_ADDRESS};
use insteon_protocol::{Field, PlmMessage};
use std::time::Instant;

impl Plm {
    pub fn x10_device(&self, address: X10Address) -> Option<&X10Device> {
        self.x10_devices.get(&address)
    }

    pub fn x10_devices(&self) -> impl Iterator<Item = &X10Device> {
        self.x10_devices.values()
    }

    /// Registers an X10 module reached through this gateway.
    pub fn add_x10_device(&mut self, address: X10Address) -> Result<&mut X10Device, CoreError> {
        if self.x10_devices.contains_key(&address) {
            return Err(CoreError::X10DeviceExists { address });
        }
        tracing::info!("[{}] Added X10 device {}", self.name, address);
        Ok(self.x10_devices.entry(address).or_insert(X10Device::new(address)))
    }

    /// The X10 address the next command frame applies to.
    pub fn last_x10_address(&self) -> Option<X10Address> {
        self.x10_last
    }

    /// Queues the address frame and the command frame for an X10 module.
    /// Returns the token of the command frame.
    pub fn send_x10_command(
        &mut self,
        address: X10Address,
        command: X10Command,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let device = self
            .x10_devices
            .get(&address)
            .ok_or(CoreError::X10DeviceNotFound { address })?;
        let [address_frame, command_frame] = device.build_command(command)?;

        self.queue_x10(address, address_frame, now)?;
        let token = self.queue_x10(address, command_frame, now)?;
        self.x10_last = Some(address);
        if let Some(device) = self.x10_devices.get_mut(&address) {
            device.set_status(command);
        }
        Ok(token)
    }

    fn queue_x10(
        &mut self,
        address: X10Address,
        message: PlmMessage,
        now: Instant,
    ) -> Result<MessageToken, CoreError> {
        let token = self.allocate_token();
        let device = self
            .x10_devices
            .get_mut(&address)
            .ok_or(CoreError::X10DeviceNotFound { address })?;
        tracing::debug!(
            "[{}] Queued {} to X10 {} as {}",
            self.name,
            message.to_hex(),
            address,
            token
        );
        let outbound = Outbound::new(token, message, Label::DEFAULT, Delivery::gateway_only(), now);
        device.core_mut().enqueue(outbound);
        Ok(token)
    }

    /// The PLM needs a pause after echoing an X10 frame before it accepts
    /// the next one.
    pub(super) fn on_x10_ack(&mut self, now: Instant) {
        self.slot.hold_for(now, self.config.x10_send_hold());
    }

    pub(super) fn handle_x10(&mut self, msg: &PlmMessage) {
        let raw = msg.get(Field::RawX10).unwrap_or(0);
        let flags = msg.get(Field::X10Flags).unwrap_or(0);
        self.emit(NetworkEvent::X10Received { raw, flags });

        if flags == X10_FLAGS_ADDRESS {
            self.x10_last = Some(X10Address::from_byte(raw));
            return;
        }

        let expected = self.x10_last;
        let Some(address) = expected.filter(|a| a.house_byte() == raw & 0xF0) else {
            self.emit(NetworkEvent::X10HouseMismatch { expected, raw });
            return;
        };
        let command = X10Command::from_code(raw);
        match self.x10_devices.get_mut(&address) {
            Some(device) => {
                device.set_status(command);
                self.emit(NetworkEvent::X10Command { address, command });
            }
            None => self.emit(NetworkEvent::UnknownX10Device { address }),
        }
    }
}
