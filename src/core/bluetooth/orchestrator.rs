//! Per-role configuration sequence
//! This module chains adapter commands into "bring the adapter to Ready and
//! perform the role action", stopping at the first failure.

use log::info;

use crate::core::bluetooth::adapter::AdapterHandle;
use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::advertising::AdvertisingData;
use crate::core::bluetooth::error::Result;
use crate::core::bluetooth::types::{
    AdvertisingParams, Capabilities, ConnectionParams, EnableOptions, Role, ScanParams,
    TransportConfig,
};

/// Everything needed to bring one adapter to Ready
#[derive(Debug, Clone)]
pub struct AdapterProfile {
    pub role: Role,
    pub name: String,
    pub address: BleAddress,
    pub transport: TransportConfig,
    pub enable: EnableOptions,
}

/// The role action performed once the adapter is Ready
#[derive(Debug, Clone)]
pub enum RolePlan {
    Peripheral {
        advertising: AdvertisingData,
        scan_response: AdvertisingData,
        params: AdvertisingParams,
        max_payload_size: u16,
    },
    Central {
        peer: BleAddress,
        scan: ScanParams,
        connection: ConnectionParams,
        max_payload_size: u16,
    },
}

impl RolePlan {
    pub fn role(&self) -> Role {
        match self {
            Self::Peripheral { .. } => Role::Peripheral,
            Self::Central { .. } => Role::Central,
        }
    }
}

/// Orchestrator for one adapter and its profile
pub struct ConnectionOrchestrator {
    adapter: AdapterHandle,
    profile: AdapterProfile,
}

impl ConnectionOrchestrator {
    pub fn new(adapter: AdapterHandle, profile: AdapterProfile) -> Self {
        Self { adapter, profile }
    }

    pub fn adapter(&self) -> &AdapterHandle {
        &self.adapter
    }

    pub fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn prefix(&self) -> &'static str {
        self.profile.role.log_prefix()
    }

    /// Opens the adapter and configures it up to Ready.
    pub async fn bring_up(&self) -> Result<Capabilities> {
        let profile = &self.profile;
        info!("{} opening adapter {}", self.prefix(), self.adapter.instance_id());
        self.adapter.open(profile.transport.clone()).await?;

        info!("{} enabling radio stack", self.prefix());
        let capabilities = self
            .adapter
            .enable_radio_stack(profile.enable.clone())
            .await?;

        info!("{} setting address {}", self.prefix(), profile.address);
        self.adapter.set_address(profile.address).await?;

        info!("{} setting name {}", self.prefix(), profile.name);
        self.adapter.set_name(&profile.name).await?;

        info!("{} adapter ready", self.prefix());
        Ok(capabilities)
    }

    /// Performs the role action on an adapter that is already Ready.
    pub async fn perform(&self, plan: &RolePlan, capabilities: &Capabilities) -> Result<()> {
        match plan {
            RolePlan::Peripheral {
                advertising,
                scan_response,
                params,
                max_payload_size,
            } => {
                info!("{} staging advertising payload", self.prefix());
                self.adapter
                    .set_advertising_payload(advertising, scan_response)
                    .await?;

                info!(
                    "{} starting advertising, interval {} ms, timeout {} s",
                    self.prefix(),
                    params.interval_ms,
                    params.timeout_secs
                );
                self.adapter.start_advertising(*params).await?;

                self.apply_max_payload_size(*max_payload_size, capabilities)
                    .await
            }
            RolePlan::Central {
                peer,
                scan,
                connection,
                max_payload_size,
            } => {
                self.apply_max_payload_size(*max_payload_size, capabilities)
                    .await?;

                info!("{} connecting to {}", self.prefix(), peer);
                self.adapter.connect(*peer, *scan, *connection).await
            }
        }
    }

    /// The whole chain: bring up, then perform the role action.
    pub async fn run(&self, plan: &RolePlan) -> Result<Capabilities> {
        let capabilities = self.bring_up().await?;
        self.perform(plan, &capabilities).await?;
        Ok(capabilities)
    }

    async fn apply_max_payload_size(&self, size: u16, capabilities: &Capabilities) -> Result<()> {
        if !capabilities.supports_extended_payload() {
            info!(
                "{} firmware API v{} has no extended payloads, keeping default size",
                self.prefix(),
                capabilities.api_version
            );
            return Ok(());
        }
        info!("{} setting max payload size {}", self.prefix(), size);
        self.adapter.set_max_payload_size(size).await
    }
}
