//! Link-layer addresses and their type tags.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

use crate::core::bluetooth::error::BleError;

static ADDRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}):([0-9A-Fa-f]{2}):([0-9A-Fa-f]{2}):([0-9A-Fa-f]{2}):([0-9A-Fa-f]{2}):([0-9A-Fa-f]{2})$")
        .expect("address pattern is a valid regex")
});

/// The address type tag carried next to every address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddressType {
    #[serde(alias = "BLE_GAP_ADDR_TYPE_PUBLIC")]
    Public,
    #[serde(alias = "BLE_GAP_ADDR_TYPE_RANDOM_STATIC")]
    RandomStatic,
    #[serde(alias = "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_RESOLVABLE")]
    RandomPrivateResolvable,
    #[serde(alias = "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_NON_RESOLVABLE")]
    RandomPrivateNonResolvable,
}

impl AddressType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::RandomStatic => "random-static",
            Self::RandomPrivateResolvable => "random-private-resolvable",
            Self::RandomPrivateNonResolvable => "random-private-non-resolvable",
        }
    }

    pub fn is_random(&self) -> bool {
        !matches!(self, Self::Public)
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddressType {
    type Err = BleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" | "BLE_GAP_ADDR_TYPE_PUBLIC" => Ok(Self::Public),
            "random-static" | "BLE_GAP_ADDR_TYPE_RANDOM_STATIC" => Ok(Self::RandomStatic),
            "random-private-resolvable" | "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_RESOLVABLE" => {
                Ok(Self::RandomPrivateResolvable)
            }
            "random-private-non-resolvable" | "BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_NON_RESOLVABLE" => {
                Ok(Self::RandomPrivateNonResolvable)
            }
            other => Err(BleError::InvalidParameter(format!(
                "unknown address type: {other}"
            ))),
        }
    }
}

/// A 6-byte address plus its type. Octets are stored in the order they are
/// written, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BleAddress {
    #[serde(rename = "address", serialize_with = "serialize_octets")]
    octets: [u8; 6],
    #[serde(rename = "type")]
    address_type: AddressType,
}

fn serialize_octets<S: Serializer>(octets: &[u8; 6], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_octets(octets))
}

fn format_octets(octets: &[u8; 6]) -> String {
    octets
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

impl BleAddress {
    pub const fn new(octets: [u8; 6], address_type: AddressType) -> Self {
        Self {
            octets,
            address_type,
        }
    }

    /// Parses `FF:11:22:33:AA:CE`-style text.
    pub fn parse(text: &str, address_type: AddressType) -> Result<Self, BleError> {
        let caps = ADDRESS_PATTERN.captures(text.trim()).ok_or_else(|| {
            BleError::InvalidParameter(format!("malformed address: {text:?}"))
        })?;
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            // Each group is exactly two hex digits, so this cannot overflow.
            *octet = u8::from_str_radix(&caps[i + 1], 16)
                .map_err(|e| BleError::InvalidParameter(e.to_string()))?;
        }
        Ok(Self::new(octets, address_type))
    }

    pub fn octets(&self) -> [u8; 6] {
        self.octets
    }

    pub fn address_type(&self) -> AddressType {
        self.address_type
    }

    /// Checks the two most significant bits against the type tag and rejects
    /// random addresses whose remaining bits are all zero or all one.
    pub fn validate(&self) -> Result<(), BleError> {
        if self.address_type == AddressType::Public {
            return Ok(());
        }

        let tag = self.octets[0] >> 6;
        let expected = match self.address_type {
            AddressType::RandomStatic => 0b11,
            AddressType::RandomPrivateResolvable => 0b01,
            AddressType::RandomPrivateNonResolvable => 0b00,
            AddressType::Public => unreachable!(),
        };
        if tag != expected {
            return Err(BleError::InvalidParameter(format!(
                "{self} does not carry the {:#04b} tag required for {}",
                expected, self.address_type
            )));
        }

        let mut random = self.octets;
        random[0] &= 0x3F;
        let all_zero = random.iter().all(|b| *b == 0);
        let all_one = random[0] == 0x3F && random[1..].iter().all(|b| *b == 0xFF);
        if all_zero || all_one {
            return Err(BleError::InvalidParameter(format!(
                "random part of {self} must not be all zeros or all ones"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_octets(&self.octets))
    }
}
