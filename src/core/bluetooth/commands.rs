//! Controller command set and the transport seam
//! This module contains every command an adapter can send to its controller
//! and the events the controller sends back.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::events::Severity;
use crate::core::bluetooth::types::{
    AdvertisingParams, Capabilities, ConnectionHandle, ConnectionParams, DisconnectReason,
    EnableOptions, ScanParams, TransportConfig,
};

/// Sequence number pairing a command with its completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u64);

/// Controller commands
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    /// Open the serial link to the controller
    Open(TransportConfig),
    /// Enable the BLE stack in the controller
    EnableRadioStack(EnableOptions),
    /// Set the local link-layer address
    SetAddress(BleAddress),
    /// Set the GAP device name
    SetName(String),
    /// Stage encoded advertising and scan response data
    SetAdvertisingData {
        advertising: Vec<u8>,
        scan_response: Vec<u8>,
    },
    StartAdvertising(AdvertisingParams),
    StopAdvertising,
    StartScan(ScanParams),
    StopScan,
    /// Initiate a connection to a known peer
    Connect {
        peer: BleAddress,
        scan_params: ScanParams,
        conn_params: ConnectionParams,
    },
    Disconnect(ConnectionHandle),
    /// Raise the link-layer payload size
    SetMaxPayloadSize(u16),
    /// Close the serial link, abandoning everything in progress
    Close,
}

impl ControllerCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Open(_) => CommandKind::Open,
            Self::EnableRadioStack(_) => CommandKind::EnableRadioStack,
            Self::SetAddress(_) => CommandKind::SetAddress,
            Self::SetName(_) => CommandKind::SetName,
            Self::SetAdvertisingData { .. } => CommandKind::SetAdvertisingData,
            Self::StartAdvertising(_) => CommandKind::StartAdvertising,
            Self::StopAdvertising => CommandKind::StopAdvertising,
            Self::StartScan(_) => CommandKind::StartScan,
            Self::StopScan => CommandKind::StopScan,
            Self::Connect { .. } => CommandKind::Connect,
            Self::Disconnect(_) => CommandKind::Disconnect,
            Self::SetMaxPayloadSize(_) => CommandKind::SetMaxPayloadSize,
            Self::Close => CommandKind::Close,
        }
    }
}

/// Payload-free discriminant of [`ControllerCommand`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Open,
    EnableRadioStack,
    SetAddress,
    SetName,
    SetAdvertisingData,
    StartAdvertising,
    StopAdvertising,
    StartScan,
    StopScan,
    Connect,
    Disconnect,
    SetMaxPayloadSize,
    Close,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::EnableRadioStack => "enable_radio_stack",
            Self::SetAddress => "set_address",
            Self::SetName => "set_name",
            Self::SetAdvertisingData => "set_advertising_payload",
            Self::StartAdvertising => "start_advertising",
            Self::StopAdvertising => "stop_advertising",
            Self::StartScan => "start_scan",
            Self::StopScan => "stop_scan",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::SetMaxPayloadSize => "set_max_payload_size",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Ack,
    RadioEnabled(Capabilities),
}

/// What timed out on the controller side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSource {
    Advertising,
    Scan,
    Connection,
}

/// Everything the controller sends back, in the order it sent it
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Completion of the command with the given id
    CommandComplete {
        id: CommandId,
        result: Result<CommandResponse, BleError>,
    },
    Log {
        severity: Severity,
        message: String,
    },
    Error {
        code: u32,
        message: String,
    },
    Connected {
        peer: BleAddress,
        handle: ConnectionHandle,
    },
    Disconnected {
        peer: BleAddress,
        handle: ConnectionHandle,
        reason: DisconnectReason,
    },
    AdvertisingReport {
        address: BleAddress,
        name: Option<String>,
        rssi: i8,
    },
    Timeout(TimeoutSource),
}

/// Command channel to one controller.
///
/// `send_command` only hands the command over; its completion arrives as
/// [`ControllerEvent::CommandComplete`] on the stream returned by
/// `subscribe_events`, ordered with every other event. Implementations must
/// complete each accepted command exactly once.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Send a command to the controller
    async fn send_command(&self, id: CommandId, command: ControllerCommand) -> Result<(), BleError>;

    /// Start a new event stream, replacing any previous one
    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ControllerEvent>;
}
