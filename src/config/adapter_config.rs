use serde::{Deserialize, Serialize};

use crate::core::bluetooth::{
    AdapterProfile, AddressType, BleAddress, BleError, EnableOptions, Role, TransportConfig,
    DEFAULT_CENTRAL_ADDRESS, DEFAULT_CENTRAL_NAME, DEFAULT_PERIPHERAL_ADDRESS,
    DEFAULT_PERIPHERAL_NAME,
};

/// Identity given to one adapter during configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// GAP device name
    pub name: String,
    /// Colon-separated address, most significant octet first
    pub address: String,
    pub address_type: AddressType,
}

impl AdapterConfig {
    pub fn default_central() -> Self {
        Self {
            name: DEFAULT_CENTRAL_NAME.to_string(),
            address: DEFAULT_CENTRAL_ADDRESS.to_string(),
            address_type: AddressType::RandomStatic,
        }
    }

    pub fn default_peripheral() -> Self {
        Self {
            name: DEFAULT_PERIPHERAL_NAME.to_string(),
            address: DEFAULT_PERIPHERAL_ADDRESS.to_string(),
            address_type: AddressType::RandomStatic,
        }
    }

    pub fn ble_address(&self) -> Result<BleAddress, BleError> {
        BleAddress::parse(&self.address, self.address_type)
    }

    /// Builds the orchestrator profile for `role`.
    pub fn to_profile(
        &self,
        role: Role,
        transport: &TransportConfig,
        enable: &EnableOptions,
    ) -> Result<AdapterProfile, BleError> {
        Ok(AdapterProfile {
            role,
            name: self.name.clone(),
            address: self.ble_address()?,
            transport: transport.clone(),
            enable: enable.clone(),
        })
    }
}
