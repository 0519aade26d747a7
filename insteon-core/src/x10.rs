//! X10 devices reached through the PLM's power-line bridge.
//!
//! An X10 address is a single byte: house code in the high nibble, unit
//! code in the low nibble. Both nibbles use the scrambled X10 code table,
//! so house `A` is 0x6 and unit 1 is 0x6 as well.
//!
//! A command travels as two `x10_send` frames: the address with flags
//! 0x00, then the house code combined with the function code with flags
//! 0x80.

use crate::aldb::KeyStyle;
use crate::error::CoreError;
use crate::node::{attr, Node, NodeCore, NodeId, NodeSnapshot};
use insteon_protocol::{Field, PlmCommand, PlmMessage};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// `x10_flags` of a frame carrying an address.
pub const X10_FLAGS_ADDRESS: u8 = 0x00;
/// `x10_flags` of a frame carrying a house code and function.
pub const X10_FLAGS_COMMAND: u8 = 0x80;

/// Nibble of house `A` + i and of unit i + 1.
const CODES: [u8; 16] = [
    0x6, 0xE, 0x2, 0xA, 0x1, 0x9, 0x5, 0xD, 0x7, 0xF, 0x3, 0xB, 0x0, 0x8, 0x4, 0xC,
];

fn index_of(nibble: u8) -> usize {
    CODES.iter().position(|c| *c == nibble & 0x0F).unwrap_or(0)
}

/// House and unit code of an X10 device, displayed as `A1` to `P16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct X10Address(u8);

impl X10Address {
    /// Address of unit `unit` (1 to 16) in house `house` (`A` to `P`).
    pub fn new(house: char, unit: u8) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidX10Address {
            value: format!("{house}{unit}"),
        };
        let house_idx = (house.to_ascii_uppercase() as u32)
            .checked_sub('A' as u32)
            .filter(|i| *i < 16)
            .ok_or_else(invalid)?;
        let unit_idx = unit.checked_sub(1).filter(|i| *i < 16).ok_or_else(invalid)?;
        Ok(Self(CODES[house_idx as usize] << 4 | CODES[unit_idx as usize]))
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    /// House code nibble, left in place.
    pub fn house_byte(self) -> u8 {
        self.0 & 0xF0
    }

    pub fn house(self) -> char {
        (b'A' + index_of(self.0 >> 4) as u8) as char
    }

    pub fn unit(self) -> u8 {
        index_of(self.0) as u8 + 1
    }
}

impl fmt::Display for X10Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.house(), self.unit())
    }
}

impl FromStr for X10Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidX10Address { value: s.to_string() };
        let mut chars = s.chars();
        let house = chars.next().ok_or_else(invalid)?;
        let unit: u8 = chars.as_str().parse().map_err(|_| invalid())?;
        Self::new(house, unit).map_err(|_| invalid())
    }
}

impl Serialize for X10Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for X10Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// X10 function codes, carried in the low nibble of a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum X10Command {
    AllUnitsOff,
    AllLightsOn,
    On,
    Off,
    Dim,
    Bright,
    AllLightsOff,
    ExtendedCode,
    HailRequest,
    HailAck,
    #[serde(rename = "preset_dim_1")]
    PresetDim1,
    #[serde(rename = "preset_dim_2")]
    PresetDim2,
    ExtendedData,
    StatusOn,
    StatusOff,
    StatusRequest,
}

impl X10Command {
    const ALL: [X10Command; 16] = [
        X10Command::AllUnitsOff,
        X10Command::AllLightsOn,
        X10Command::On,
        X10Command::Off,
        X10Command::Dim,
        X10Command::Bright,
        X10Command::AllLightsOff,
        X10Command::ExtendedCode,
        X10Command::HailRequest,
        X10Command::HailAck,
        X10Command::PresetDim1,
        X10Command::PresetDim2,
        X10Command::ExtendedData,
        X10Command::StatusOn,
        X10Command::StatusOff,
        X10Command::StatusRequest,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Function in the low nibble of `byte`.
    pub fn from_code(byte: u8) -> Self {
        Self::ALL[usize::from(byte & 0x0F)]
    }

    pub fn name(self) -> &'static str {
        match self {
            X10Command::AllUnitsOff => "all_units_off",
            X10Command::AllLightsOn => "all_lights_on",
            X10Command::On => "on",
            X10Command::Off => "off",
            X10Command::Dim => "dim",
            X10Command::Bright => "bright",
            X10Command::AllLightsOff => "all_lights_off",
            X10Command::ExtendedCode => "extended_code",
            X10Command::HailRequest => "hail_request",
            X10Command::HailAck => "hail_ack",
            X10Command::PresetDim1 => "preset_dim_1",
            X10Command::PresetDim2 => "preset_dim_2",
            X10Command::ExtendedData => "extended_data",
            X10Command::StatusOn => "status_on",
            X10Command::StatusOff => "status_off",
            X10Command::StatusRequest => "status_request",
        }
    }
}

impl FromStr for X10Command {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .ok_or_else(|| CoreError::UnknownCommand { command: s.to_string() })
    }
}

fn x10_frame(raw: u8, flags: u8) -> Result<PlmMessage, CoreError> {
    let mut message = PlmMessage::outbound(PlmCommand::X10Send, false)?;
    message.set(Field::RawX10, raw)?;
    message.set(Field::X10Flags, flags)?;
    Ok(message)
}

/// An X10 module. It has no link table; its state is the last command sent
/// to it or heard for it.
#[derive(Debug)]
pub struct X10Device {
    address: X10Address,
    core: NodeCore,
}

impl X10Device {
    pub fn new(address: X10Address) -> Self {
        let mut core = NodeCore::new(KeyStyle::Position);
        core.attributes.set_text(attr::ADDRESS, address.to_string());
        Self { address, core }
    }

    pub fn from_snapshot(address: X10Address, snapshot: &NodeSnapshot) -> Self {
        let mut device = Self::new(address);
        for (name, value) in snapshot.attributes.iter() {
            device.core.attributes.set(name.clone(), value.clone());
        }
        device.core.attributes.set_text(attr::ADDRESS, address.to_string());
        device
    }

    pub fn address(&self) -> X10Address {
        self.address
    }

    /// Name of the last command, if any.
    pub fn status(&self) -> Option<&str> {
        self.core.attributes.get_text(attr::STATUS)
    }

    pub fn set_status(&mut self, command: X10Command) {
        self.core.attributes.set_text(attr::STATUS, command.name());
    }

    /// The address frame and the command frame for `command`.
    pub fn build_command(&self, command: X10Command) -> Result<[PlmMessage; 2], CoreError> {
        Ok([
            x10_frame(self.address.byte(), X10_FLAGS_ADDRESS)?,
            x10_frame(self.address.house_byte() | command.code(), X10_FLAGS_COMMAND)?,
        ])
    }
}

impl Node for X10Device {
    fn id(&self) -> NodeId {
        NodeId::X10(self.address)
    }

    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }
}
