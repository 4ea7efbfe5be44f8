//! Constants used throughout the link coordinator
//! Limits enforced before a command reaches the controller, plus the
//! defaults of the reference two-adapter scenario.

/// Maximum device name length accepted by `set_name`, in bytes
pub const MAX_DEVICE_NAME_LEN: usize = 248;

/// Capacity of a legacy advertising or scan response payload, in bytes
pub const MAX_ADV_DATA_LEN: usize = 31;

/// Advertising interval bounds in milliseconds
pub const MIN_ADV_INTERVAL_MS: f64 = 20.0;
pub const MAX_ADV_INTERVAL_MS: f64 = 10_240.0;

/// Longest advertising timeout the controller accepts, in seconds (0 = none)
pub const MAX_ADV_TIMEOUT_SECS: u16 = 0x3FFF;

/// Scan interval/window bounds in milliseconds
pub const MIN_SCAN_INTERVAL_MS: f64 = 2.5;
pub const MAX_SCAN_INTERVAL_MS: f64 = 10_240.0;

/// Connection interval bounds in milliseconds
pub const MIN_CONN_INTERVAL_MS: f64 = 7.5;
pub const MAX_CONN_INTERVAL_MS: f64 = 4_000.0;

/// Highest slave latency, in connection events
pub const MAX_SLAVE_LATENCY: u16 = 499;

/// Supervision timeout bounds in milliseconds
pub const MIN_SUP_TIMEOUT_MS: u32 = 100;
pub const MAX_SUP_TIMEOUT_MS: u32 = 32_000;

/// Link-layer payload size bounds for `set_max_payload_size`
pub const MIN_PAYLOAD_SIZE: u16 = 27;
pub const MAX_PAYLOAD_SIZE: u16 = 251;

/// First firmware API version that supports extended payloads
pub const EXTENDED_PAYLOAD_API_VERSION: u8 = 3;

/// Payload size requested by the reference scenario
pub const DEFAULT_MAX_PAYLOAD_SIZE: u16 = 54;

/// Serial defaults of the reference scenario
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Addresses used by the reference scenario
pub const DEFAULT_PERIPHERAL_ADDRESS: &str = "FF:11:22:33:AA:CE";
pub const DEFAULT_CENTRAL_ADDRESS: &str = "FF:11:22:33:AA:CF";

/// Device names used by the reference scenario
pub const DEFAULT_PERIPHERAL_NAME: &str = "peripheralAdapter";
pub const DEFAULT_CENTRAL_NAME: &str = "centralAdapter";

/// How long the coordinator waits for both sides to report the link
pub const DEFAULT_LINK_TIMEOUT_SECS: u64 = 10;

/// Firmware error codes reported by the simulated controller
pub const ERROR_INVALID_PARAM: u32 = 0x0007;
pub const ERROR_BUSY: u32 = 0x0011;
pub const ERROR_TIMEOUT: u32 = 0x000D;
