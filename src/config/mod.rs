pub mod adapter_config;

use std::path::Path;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::adapter_config::AdapterConfig;
use crate::core::bluetooth::{
    AdvertisingData, AdvertisingParams, ConnectionParams, EnableOptions, ScanParams,
    TransportConfig, DEFAULT_LINK_TIMEOUT_SECS, DEFAULT_MAX_PAYLOAD_SIZE,
};

/// What a controller `Error` event does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Any `Error` event ends the session.
    #[default]
    Fatal,
    /// `Error` events are logged and otherwise ignored.
    Tolerate,
}

/// Settings for the in-process simulated controllers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of controllers the simulated enumerator reports
    pub adapter_count: usize,
    /// Firmware API version the simulated controllers negotiate
    pub api_version: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            adapter_count: 2,
            api_version: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub radio: EnableOptions,
    pub central: AdapterConfig,
    pub peripheral: AdapterConfig,
    pub advertising: AdvertisingParams,
    pub advertising_data: AdvertisingData,
    pub scan_response: AdvertisingData,
    pub scan: ScanParams,
    pub connection: ConnectionParams,
    pub max_payload_size: u16,
    /// How long to wait for both sides to report the link
    pub link_timeout_secs: u64,
    /// How long a single controller command may take
    pub command_timeout_ms: u64,
    pub error_policy: ErrorPolicy,
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    pub simulation: SimulationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            transport: TransportConfig::default(),
            radio: EnableOptions::default(),
            central: AdapterConfig::default_central(),
            peripheral: AdapterConfig::default_peripheral(),
            advertising: AdvertisingParams::default(),
            advertising_data: AdvertisingData::with_tx_power(20),
            scan_response: AdvertisingData::default(),
            scan: ScanParams::default(),
            connection: ConnectionParams::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            link_timeout_secs: DEFAULT_LINK_TIMEOUT_SECS,
            command_timeout_ms: 5_000,
            error_policy: ErrorPolicy::default(),
            log_level: "info".to_string(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config from `path`, using defaults if the file is missing.
    pub async fn load_config(path: impl AsRef<Path>) -> Result<Self> {
        let file_path = path.as_ref();

        if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(file_path)
            .await
            .with_context(|| format!("reading {}", file_path.display()))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("parsing {}", file_path.display()))?;

        info!("Config loaded from {:?}", file_path);
        Ok(config)
    }

    /// Saves the config to `path` as pretty-printed JSON.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<()> {
        let file_path = path.as_ref();
        if let Some(dir) = file_path.parent().filter(|dir| !dir.exists()) {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;
                info!("Created config directory {:?}", dir);
            }
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(file_path, config_json).await?;

        info!("Config saved to {:?}.", file_path);
        Ok(())
    }
}
