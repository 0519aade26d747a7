//! Catalog of device commands.
//!
//! Entries are looked up by name; the first entry whose applicability filter
//! accepts the device's category, subcategory and firmware wins, so specific
//! entries must precede catch-all ones.

use crate::device::DeviceNode;
use insteon_protocol::{Field, FieldValue, MessageType};

/// Filter over one identifying byte of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Any,
    OneOf(&'static [u8]),
}

impl Match {
    /// An unknown value only satisfies `Any`.
    pub fn matches(&self, value: Option<u8>) -> bool {
        match self {
            Match::Any => true,
            Match::OneOf(values) => value.is_some_and(|v| values.contains(&v)),
        }
    }
}

/// Devices a catalog entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applicability {
    pub dev_cat: Match,
    pub sub_cat: Match,
    pub firmware: Match,
}

impl Applicability {
    pub const ANY: Applicability = Applicability {
        dev_cat: Match::Any,
        sub_cat: Match::Any,
        firmware: Match::Any,
    };

    pub const fn dev_cat(values: &'static [u8]) -> Self {
        Self {
            dev_cat: Match::OneOf(values),
            sub_cat: Match::Any,
            firmware: Match::Any,
        }
    }

    pub fn accepts(&self, dev_cat: Option<u8>, sub_cat: Option<u8>, firmware: Option<u8>) -> bool {
        self.dev_cat.matches(dev_cat)
            && self.sub_cat.matches(sub_cat)
            && self.firmware.matches(firmware)
    }
}

/// One catalog entry.
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub applies: Applicability,
    pub message_type: MessageType,
    pub extended: bool,
    pub fields: &'static [(Field, FieldValue<DeviceNode>)],
}

impl CommandSpec {
    pub fn cmd1(&self) -> Option<u8> {
        self.fields.iter().find_map(|(field, value)| match (field, value) {
            (Field::Cmd1, FieldValue::Constant(v)) => Some(*v),
            _ => None,
        })
    }
}

pub const PRODUCT_DATA_REQUEST: &str = "product_data_request";
pub const ENTER_LINK_MODE: &str = "enter_link_mode";
pub const GET_ENGINE_VERSION: &str = "get_engine_version";
pub const ID_REQUEST: &str = "id_request";
pub const ON: &str = "on";
pub const OFF: &str = "off";
pub const ON_CLEANUP: &str = "on_cleanup";
pub const OFF_CLEANUP: &str = "off_cleanup";
pub const LIGHT_STATUS_REQUEST: &str = "light_status_request";
pub const GET_OPERATING_FLAGS: &str = "get_operating_flags";
pub const GET_ALDB_DELTA: &str = "get_aldb_delta";
pub const SET_ADDRESS_MSB: &str = "set_address_msb";
pub const PEEK_ONE_BYTE: &str = "peek_one_byte";
pub const READ_ALDB: &str = "read_aldb";
pub const WRITE_ALDB: &str = "write_aldb";

fn on_level(node: &DeviceNode) -> u8 {
    node.on_level()
}

fn link_group(node: &DeviceNode) -> u8 {
    node.link_group()
}

fn cursor_msb(node: &DeviceNode) -> u8 {
    node.cursor().msb
}

fn cursor_lsb(node: &DeviceNode) -> u8 {
    node.cursor().lsb
}

use Field::{Cmd1, Cmd2, Usr};
use FieldValue::{Computed, Constant};

macro_rules! command {
    ($name:expr, $applies:expr, $kind:ident, $extended:literal, [$($field:expr),* $(,)?]) => {
        CommandSpec {
            name: $name,
            applies: $applies,
            message_type: MessageType::$kind,
            extended: $extended,
            fields: &[$($field),*],
        }
    };
    ($name:expr, $applies:expr, [$($field:expr),* $(,)?]) => {
        command!($name, $applies, Direct, false, [$($field),*])
    };
}

const DIMMERS: Applicability = Applicability::dev_cat(&[0x01]);
const SWITCHES: Applicability = Applicability::dev_cat(&[0x02]);
const LIGHTING: Applicability = Applicability::dev_cat(&[0x01, 0x02]);
const ANY: Applicability = Applicability::ANY;

/// Every known device command.
pub static DEVICE_COMMANDS: &[CommandSpec] = &[
    command!(PRODUCT_DATA_REQUEST, ANY, [(Cmd1, Constant(0x03)), (Cmd2, Constant(0x00))]),
    command!(
        ENTER_LINK_MODE,
        ANY,
        Direct,
        true,
        [(Cmd1, Constant(0x09)), (Cmd2, Computed(link_group))]
    ),
    command!(GET_ENGINE_VERSION, ANY, [(Cmd1, Constant(0x0D)), (Cmd2, Constant(0x00))]),
    command!(ID_REQUEST, ANY, [(Cmd1, Constant(0x10)), (Cmd2, Constant(0x00))]),
    command!(ON, DIMMERS, [(Cmd1, Constant(0x11)), (Cmd2, Computed(on_level))]),
    command!(ON, SWITCHES, [(Cmd1, Constant(0x11)), (Cmd2, Constant(0xFF))]),
    command!(ON, ANY, [(Cmd1, Constant(0x11)), (Cmd2, Computed(on_level))]),
    command!(OFF, ANY, [(Cmd1, Constant(0x13)), (Cmd2, Constant(0x00))]),
    command!(
        ON_CLEANUP,
        ANY,
        AllLinkCleanup,
        false,
        [(Cmd1, Constant(0x11)), (Cmd2, Constant(0x00))]
    ),
    command!(
        OFF_CLEANUP,
        ANY,
        AllLinkCleanup,
        false,
        [(Cmd1, Constant(0x13)), (Cmd2, Constant(0x00))]
    ),
    command!(LIGHT_STATUS_REQUEST, LIGHTING, [(Cmd1, Constant(0x19)), (Cmd2, Constant(0x00))]),
    command!(GET_OPERATING_FLAGS, ANY, [(Cmd1, Constant(0x1F)), (Cmd2, Constant(0x00))]),
    command!(GET_ALDB_DELTA, ANY, [(Cmd1, Constant(0x1F)), (Cmd2, Constant(0x01))]),
    command!(SET_ADDRESS_MSB, ANY, [(Cmd1, Constant(0x28)), (Cmd2, Computed(cursor_msb))]),
    command!(PEEK_ONE_BYTE, ANY, [(Cmd1, Constant(0x2B)), (Cmd2, Computed(cursor_lsb))]),
    command!(
        READ_ALDB,
        ANY,
        Direct,
        true,
        [
            (Cmd1, Constant(0x2F)),
            (Cmd2, Constant(0x00)),
            (Usr(3), Computed(cursor_msb)),
            (Usr(4), Computed(cursor_lsb)),
            (Usr(5), Constant(0x01)),
        ]
    ),
    command!(
        WRITE_ALDB,
        ANY,
        Direct,
        true,
        [
            (Cmd1, Constant(0x2F)),
            (Cmd2, Constant(0x00)),
            (Usr(2), Constant(0x02)),
            (Usr(5), Constant(0x08)),
        ]
    ),
];

/// First entry named `name` that applies to a device with the given
/// identifying bytes.
pub fn lookup(
    name: &str,
    dev_cat: Option<u8>,
    sub_cat: Option<u8>,
    firmware: Option<u8>,
) -> Option<&'static CommandSpec> {
    DEVICE_COMMANDS
        .iter()
        .find(|spec| spec.name == name && spec.applies.accepts(dev_cat, sub_cat, firmware))
}

/// Whether any entry carries `name`.
pub fn is_known(name: &str) -> bool {
    DEVICE_COMMANDS.iter().any(|spec| spec.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specific_entry_wins() {
        let spec = lookup(ON, Some(0x02), Some(0x2A), Some(0x41)).unwrap();
        assert!(matches!(spec.fields[1], (Cmd2, Constant(0xFF))));

        let spec = lookup(ON, Some(0x01), None, None).unwrap();
        assert!(matches!(spec.fields[1], (Cmd2, Computed(_))));
    }

    #[test]
    fn test_unknown_category_only_matches_any() {
        assert!(lookup(LIGHT_STATUS_REQUEST, None, None, None).is_none());
        assert!(lookup(LIGHT_STATUS_REQUEST, Some(0x07), None, None).is_none());
        assert!(lookup(LIGHT_STATUS_REQUEST, Some(0x02), None, None).is_some());
        assert!(lookup(ON, None, None, None).is_some());
        assert!(is_known(LIGHT_STATUS_REQUEST));
        assert!(!is_known("dance"));
    }

    #[test]
    fn test_catalog_command_bytes() {
        let expected = [
            (PRODUCT_DATA_REQUEST, 0x03),
            (ENTER_LINK_MODE, 0x09),
            (GET_ENGINE_VERSION, 0x0D),
            (ID_REQUEST, 0x10),
            (OFF, 0x13),
            (GET_OPERATING_FLAGS, 0x1F),
            (GET_ALDB_DELTA, 0x1F),
            (SET_ADDRESS_MSB, 0x28),
            (PEEK_ONE_BYTE, 0x2B),
            (READ_ALDB, 0x2F),
            (WRITE_ALDB, 0x2F),
        ];
        for (name, cmd1) in expected {
            let spec = lookup(name, Some(0x01), Some(0x20), Some(0x41)).unwrap();
            assert_eq!(spec.cmd1(), Some(cmd1), "{name}");
        }
        assert!(lookup(READ_ALDB, None, None, None).unwrap().extended);
        assert_eq!(
            lookup(OFF_CLEANUP, None, None, None).unwrap().message_type,
            MessageType::AllLinkCleanup
        );
    }
}
