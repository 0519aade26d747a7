//! Three byte Insteon node addresses.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Address of a node on the Insteon network, displayed as six upper-case hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 3]);

impl Address {
    pub const fn new(hi: u8, mid: u8, low: u8) -> Self {
        Self([hi, mid, low])
    }

    pub fn hi(&self) -> u8 {
        self.0[0]
    }

    pub fn mid(&self) -> u8 {
        self.0[1]
    }

    pub fn low(&self) -> u8 {
        self.0[2]
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != '.' && *c != ':').collect();
        let bytes =
            hex::decode(&cleaned).map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        match bytes.as_slice() {
            [hi, mid, low] => Ok(Self([*hi, *mid, *low])),
            _ => Err(ProtocolError::InvalidAddress(s.to_string())),
        }
    }
}

impl From<[u8; 3]> for Address {
    fn from(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let addr = Address::new(0x1A, 0x2b, 0x03);
        assert_eq!(addr.to_string(), "1A2B03");
        assert_eq!("1a2b03".parse::<Address>().unwrap(), addr);
        assert_eq!("1A.2B.03".parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("1A2B".parse::<Address>().is_err());
        assert!("1A2B0304".parse::<Address>().is_err());
        assert!("zzzzzz".parse::<Address>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = Address::new(0x11, 0x22, 0x33);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"112233\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
