//! Bluetooth device representation and related functionality

use serde::Serialize;

use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::types::ConnectionHandle;

/// A remote device as reported by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    /// The link-layer address of the device
    pub address: BleAddress,
    /// The advertised name, if one was seen
    pub name: Option<String>,
    /// The signal strength (RSSI) of the device, for discovery reports
    pub rssi: Option<i8>,
    /// Controller-assigned handle, present once a link exists
    pub connection_handle: Option<ConnectionHandle>,
}

impl Device {
    /// Creates a new Device instance
    pub fn new(address: BleAddress, name: Option<String>, rssi: Option<i8>) -> Self {
        Self {
            address,
            name,
            rssi,
            connection_handle: None,
        }
    }

    /// A connected peer with its link handle
    pub fn connected(address: BleAddress, handle: ConnectionHandle) -> Self {
        Self {
            address,
            name: None,
            rssi: None,
            connection_handle: Some(handle),
        }
    }

    /// Returns true if the device advertised a name containing `needle`
    pub fn name_contains(&self, needle: &str) -> bool {
        self.name
            .as_ref()
            .map(|name| name.contains(needle))
            .unwrap_or(false)
    }
}
