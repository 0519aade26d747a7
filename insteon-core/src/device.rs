//! Network device node.

use crate::aldb::{AldbCursor, KeyStyle};
use crate::commands::{self, CommandSpec};
use crate::config::HopConfig;
use crate::dedup::RecentMessages;
use crate::error::CoreError;
use crate::hops::HopTracker;
use crate::node::{attr, Node, NodeCore, NodeId, NodeSnapshot};
use crate::queue::{Delivery, MessageToken};
use insteon_protocol::{
    apply_checksum, encode_insteon_send, Address, Field, MessageFlags, PlmMessage,
};

/// On-level sent by `on` when none is configured.
pub const DEFAULT_ON_LEVEL: u8 = 0xFF;

/// Link table access dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Engine version 0: set-address plus single byte peeks.
    Legacy,
    /// Engine version 1 and later: whole records over extended messages.
    Extended,
}

/// A device on the Insteon network, reached through the gateway.
#[derive(Debug)]
pub struct DeviceNode {
    address: Address,
    core: NodeCore,
    cursor: AldbCursor,
    hops: HopTracker,
    recent: RecentMessages,
    last_sent: Option<MessageToken>,
    scan_deferred: bool,
}

impl DeviceNode {
    pub fn new(address: Address, hops: &HopConfig) -> Self {
        let mut core = NodeCore::new(KeyStyle::Memory);
        core.attributes.set_text(attr::ADDRESS, address.to_string());
        Self {
            address,
            core,
            cursor: AldbCursor::START,
            hops: HopTracker::new(hops),
            recent: RecentMessages::new(),
            last_sent: None,
            scan_deferred: false,
        }
    }

    /// Rebuilds a device from its snapshot.
    pub fn from_snapshot(
        address: Address,
        snapshot: &NodeSnapshot,
        hops: &HopConfig,
    ) -> Result<Self, CoreError> {
        let mut device = Self::new(address, hops);
        for (name, value) in snapshot.attributes.iter() {
            device.core.attributes.set(name.clone(), value.clone());
        }
        device.core.attributes.set_text(attr::ADDRESS, address.to_string());
        device.core.aldb.load_snapshot(&snapshot.aldb)?;
        Ok(device)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn dev_cat(&self) -> Option<u8> {
        self.core.attributes.get_u8(attr::DEV_CAT)
    }

    pub fn sub_cat(&self) -> Option<u8> {
        self.core.attributes.get_u8(attr::SUB_CAT)
    }

    pub fn firmware(&self) -> Option<u8> {
        self.core.attributes.get_u8(attr::FIRMWARE)
    }

    pub fn engine_version(&self) -> Option<u8> {
        self.core.attributes.get_u8(attr::ENGINE_VERSION)
    }

    pub fn on_level(&self) -> u8 {
        self.core.attributes.get_u8(attr::ON_LEVEL).unwrap_or(DEFAULT_ON_LEVEL)
    }

    /// Group announced by `enter_link_mode`.
    pub fn link_group(&self) -> u8 {
        self.core.attributes.get_u8(attr::LINK_GROUP).unwrap_or(0)
    }

    pub fn set_identity(&mut self, dev_cat: u8, sub_cat: u8, firmware: u8) {
        let attributes = &mut self.core.attributes;
        attributes.set_u8(attr::DEV_CAT, dev_cat);
        attributes.set_u8(attr::SUB_CAT, sub_cat);
        attributes.set_u8(attr::FIRMWARE, firmware);
    }

    pub fn set_attribute(&mut self, name: &str, value: u8) {
        self.core.attributes.set_u8(name, value);
    }

    /// Link table dialect, once the engine version is known.
    pub fn scan_mode(&self) -> Option<ScanMode> {
        self.engine_version().map(|v| if v == 0 { ScanMode::Legacy } else { ScanMode::Extended })
    }

    pub fn cursor(&self) -> AldbCursor {
        self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut AldbCursor {
        &mut self.cursor
    }

    pub fn scan_deferred(&self) -> bool {
        self.scan_deferred
    }

    pub fn set_scan_deferred(&mut self, deferred: bool) {
        self.scan_deferred = deferred;
    }

    pub fn smart_hops(&self) -> u8 {
        self.hops.smart_hops()
    }

    pub fn hops(&self) -> &HopTracker {
        &self.hops
    }

    pub fn record_hops(&mut self, hops_used: u8) {
        self.hops.record(hops_used);
    }

    pub fn recent_mut(&mut self) -> &mut RecentMessages {
        &mut self.recent
    }

    pub fn last_sent(&self) -> Option<MessageToken> {
        self.last_sent
    }

    pub fn set_last_sent(&mut self, token: MessageToken) {
        self.last_sent = Some(token);
    }

    /// Catalog entry for `name` applicable to this device.
    pub fn command_spec(&self, name: &str) -> Result<&'static CommandSpec, CoreError> {
        commands::lookup(name, self.dev_cat(), self.sub_cat(), self.firmware()).ok_or_else(|| {
            if commands::is_known(name) {
                CoreError::CommandNotApplicable {
                    command: name.to_string(),
                    address: self.address,
                }
            } else {
                CoreError::UnknownCommand {
                    command: name.to_string(),
                }
            }
        })
    }

    /// Encodes the catalog command `name` addressed to this device.
    ///
    /// `overrides` are written after the declared fields. Extended messages
    /// to engine version 2 devices get the checksum in `usr_14`.
    pub fn build_command(
        &self,
        name: &str,
        overrides: &[(Field, u8)],
    ) -> Result<(PlmMessage, Delivery), CoreError> {
        let spec = self.command_spec(name)?;
        let flags = MessageFlags::new(spec.message_type, spec.extended, self.smart_hops());
        let mut message = encode_insteon_send(self.address, flags, spec.fields, self)?;
        for (field, value) in overrides {
            message.set(*field, *value)?;
        }
        if spec.extended && self.engine_version().is_some_and(|v| v >= 2) {
            apply_checksum(&mut message)?;
        }
        Ok((message, Delivery::device(spec.name)))
    }
}

impl Node for DeviceNode {
    fn id(&self) -> NodeId {
        NodeId::Device(self.address)
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::AttrValue;
    use insteon_protocol::MessageType;

    fn device() -> DeviceNode {
        DeviceNode::new(Address::new(0x11, 0x22, 0x33), &HopConfig::default())
    }

    #[test]
    fn test_on_uses_on_level() {
        let mut node = device();
        node.set_identity(0x01, 0x20, 0x41);
        let (msg, delivery) = node.build_command(commands::ON, &[]).unwrap();
        assert_eq!(msg.get(Field::Cmd1), Some(0x11));
        assert_eq!(msg.get(Field::Cmd2), Some(0xFF));
        assert_eq!(delivery.command, Some(commands::ON));
        assert!(delivery.expects_device_ack);

        node.set_attribute(attr::ON_LEVEL, 0x80);
        let (msg, _) = node.build_command(commands::ON, &[]).unwrap();
        assert_eq!(msg.get(Field::Cmd2), Some(0x80));
    }

    #[test]
    fn test_smart_hops_in_flags() {
        let mut node = device();
        let (msg, _) = node.build_command(commands::ID_REQUEST, &[]).unwrap();
        assert_eq!(msg.get(Field::MsgFlags), Some(0x0F));

        node.record_hops(1);
        node.record_hops(0);
        let (msg, _) = node.build_command(commands::ID_REQUEST, &[]).unwrap();
        let flags = msg.insteon().unwrap().flags();
        assert_eq!((flags.max_hops, flags.hops_left), (1, 1));
        assert_eq!(flags.message_type, MessageType::Direct);
    }

    #[test]
    fn test_read_aldb_uses_cursor_and_checksum() {
        let mut node = device();
        node.set_attribute(attr::ENGINE_VERSION, 2);
        *node.cursor_mut() = AldbCursor { msb: 0x0F, lsb: 0xE8 };
        let (msg, _) = node.build_command(commands::READ_ALDB, &[]).unwrap();
        assert_eq!(msg.len(), 22);
        let view = msg.insteon().unwrap();
        assert_eq!(view.usr(3), Some(0x0F));
        assert_eq!(view.usr(4), Some(0xE8));
        assert_eq!(view.usr(5), Some(0x01));
        let user = view.user_data().unwrap();
        let sum = user
            .iter()
            .fold(view.cmd1().wrapping_add(view.cmd2()), |a, b| a.wrapping_add(*b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_no_checksum_for_older_engines() {
        let mut node = device();
        node.set_attribute(attr::ENGINE_VERSION, 1);
        let (msg, _) = node.build_command(commands::READ_ALDB, &[]).unwrap();
        assert_eq!(msg.insteon().unwrap().usr(14), Some(0));
    }

    #[test]
    fn test_inapplicable_and_unknown_commands() {
        let node = device();
        assert!(matches!(
            node.build_command(commands::LIGHT_STATUS_REQUEST, &[]),
            Err(CoreError::CommandNotApplicable { .. })
        ));
        assert!(matches!(
            node.build_command("dance", &[]),
            Err(CoreError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_overrides_follow_declared_fields() {
        let node = device();
        let (msg, _) = node.build_command(commands::OFF_CLEANUP, &[(Field::Cmd2, 0x05)]).unwrap();
        assert_eq!(msg.get(Field::Cmd2), Some(0x05));
        assert_eq!(msg.insteon().unwrap().message_type(), MessageType::AllLinkCleanup);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut node = device();
        node.set_identity(0x02, 0x2A, 0x43);
        node.core_mut().aldb.edit(
            crate::aldb::AldbKey::memory(0x0F, 0xFF),
            crate::aldb::LinkRecord::from_hex("A2014455660000FF").unwrap(),
        );
        let snapshot = node.snapshot();
        assert_eq!(snapshot.attributes.get(attr::ADDRESS), Some(&AttrValue::Text("112233".into())));

        let restored =
            DeviceNode::from_snapshot(node.address(), &snapshot, &HopConfig::default()).unwrap();
        assert_eq!(restored.dev_cat(), Some(0x02));
        assert_eq!(restored.firmware(), Some(0x43));
        assert_eq!(restored.aldb().len(), 1);
    }
}
