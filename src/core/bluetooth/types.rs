//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::constants::*;
use crate::core::bluetooth::error::BleError;

/// Configuration progress of one adapter. Variants are declared in the only
/// order they may be reached, so `<` means "earlier in the sequence".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfigurationState {
    Closed,
    Opened,
    RadioEnabled,
    Addressed,
    Named,
    Ready,
}

impl ConfigurationState {
    /// The state a successful configuration step moves to, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Closed => Some(Self::Opened),
            Self::Opened => Some(Self::RadioEnabled),
            Self::RadioEnabled => Some(Self::Addressed),
            Self::Addressed => Some(Self::Named),
            Self::Named => Some(Self::Ready),
            Self::Ready => None,
        }
    }
}

/// What a fully configured adapter is currently doing over the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RoleAction {
    #[default]
    None,
    Advertising,
    Scanning,
}

/// Which side of a link an adapter plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Central,
    Peripheral,
}

impl Role {
    /// Prefix used when logging this role's events.
    pub fn log_prefix(&self) -> &'static str {
        match self {
            Self::Central => "#CENTRAL",
            Self::Peripheral => "#PERIPH",
        }
    }
}

/// Per-link identifier assigned by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionHandle(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
}

/// Serial settings handed to the transport on `open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub baud_rate: u32,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub flow_control: FlowControl,
    /// Interval at which the controller batches events, 0 = immediately
    #[serde(default)]
    pub event_interval_ms: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            flow_control: FlowControl::None,
            event_interval_ms: 0,
        }
    }
}

/// Radio stack options for `enable_radio_stack`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableOptions {
    pub connection_count: u8,
    pub attribute_table_size: u32,
}

impl Default for EnableOptions {
    fn default() -> Self {
        Self {
            connection_count: 1,
            attribute_table_size: 0x580,
        }
    }
}

/// Parameters negotiated when the radio stack is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Firmware API generation
    pub api_version: u8,
    /// Lowest RAM address left for the application by the radio stack
    pub app_ram_base: u32,
}

impl Capabilities {
    pub fn supports_extended_payload(&self) -> bool {
        self.api_version >= EXTENDED_PAYLOAD_API_VERSION
    }
}

fn check_range(what: &str, value: f64, min: f64, max: f64) -> Result<(), BleError> {
    if !(min..=max).contains(&value) {
        return Err(BleError::InvalidParameter(format!(
            "{what} {value} outside {min}..={max}"
        )));
    }
    Ok(())
}

/// Advertising interval in milliseconds and timeout in seconds (0 = none).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvertisingParams {
    pub interval_ms: f64,
    pub timeout_secs: u16,
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            interval_ms: 100.0,
            timeout_secs: 100,
        }
    }
}

impl AdvertisingParams {
    pub fn validate(&self) -> Result<(), BleError> {
        check_range(
            "advertising interval",
            self.interval_ms,
            MIN_ADV_INTERVAL_MS,
            MAX_ADV_INTERVAL_MS,
        )?;
        if self.timeout_secs > MAX_ADV_TIMEOUT_SECS {
            return Err(BleError::InvalidParameter(format!(
                "advertising timeout {}s exceeds {}s",
                self.timeout_secs, MAX_ADV_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

/// Scan parameters, also used to bound a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub active: bool,
    pub interval_ms: f64,
    pub window_ms: f64,
    /// 0 = scan until stopped
    pub timeout_secs: u16,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            active: false,
            interval_ms: 100.0,
            window_ms: 50.0,
            timeout_secs: 20,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> Result<(), BleError> {
        check_range(
            "scan interval",
            self.interval_ms,
            MIN_SCAN_INTERVAL_MS,
            MAX_SCAN_INTERVAL_MS,
        )?;
        check_range(
            "scan window",
            self.window_ms,
            MIN_SCAN_INTERVAL_MS,
            self.interval_ms,
        )
    }
}

/// Requested connection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub min_conn_interval_ms: f64,
    pub max_conn_interval_ms: f64,
    pub slave_latency: u16,
    pub conn_sup_timeout_ms: u32,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            min_conn_interval_ms: 7.5,
            max_conn_interval_ms: 7.5,
            slave_latency: 0,
            conn_sup_timeout_ms: 4000,
        }
    }
}

impl ConnectionParams {
    pub fn validate(&self) -> Result<(), BleError> {
        check_range(
            "min connection interval",
            self.min_conn_interval_ms,
            MIN_CONN_INTERVAL_MS,
            MAX_CONN_INTERVAL_MS,
        )?;
        check_range(
            "max connection interval",
            self.max_conn_interval_ms,
            self.min_conn_interval_ms,
            MAX_CONN_INTERVAL_MS,
        )?;
        if self.slave_latency > MAX_SLAVE_LATENCY {
            return Err(BleError::InvalidParameter(format!(
                "slave latency {} exceeds {}",
                self.slave_latency, MAX_SLAVE_LATENCY
            )));
        }
        if !(MIN_SUP_TIMEOUT_MS..=MAX_SUP_TIMEOUT_MS).contains(&self.conn_sup_timeout_ms) {
            return Err(BleError::InvalidParameter(format!(
                "supervision timeout {}ms outside {}..={}",
                self.conn_sup_timeout_ms, MIN_SUP_TIMEOUT_MS, MAX_SUP_TIMEOUT_MS
            )));
        }
        // The link must survive a full latency window on both sides.
        let min_timeout =
            (1.0 + f64::from(self.slave_latency)) * self.max_conn_interval_ms * 2.0;
        if f64::from(self.conn_sup_timeout_ms) <= min_timeout {
            return Err(BleError::InvalidParameter(format!(
                "supervision timeout {}ms must exceed {min_timeout}ms",
                self.conn_sup_timeout_ms
            )));
        }
        Ok(())
    }
}

/// Why a link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    RemoteUserTerminated,
    LocalHostTerminated,
    SupervisionTimeout,
    ConnectionTimeout,
    AdapterClosed,
    Other(u8),
}

/// A snapshot of one adapter, as surfaced by `get_state` and `StatusChanged`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterStatus {
    pub instance_id: String,
    pub state: ConfigurationState,
    pub address: Option<BleAddress>,
    pub name: Option<String>,
    pub role_action: RoleAction,
    pub capabilities: Option<Capabilities>,
    pub connecting_to: Option<BleAddress>,
    pub connections: Vec<ConnectionHandle>,
    pub max_payload_size: Option<u16>,
}
