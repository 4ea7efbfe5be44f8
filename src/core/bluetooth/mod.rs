//! Bluetooth functionality for the link coordinator
//! This module handles every adapter operation: configuration, advertising,
//! scanning, connecting, and the events the controllers report back.

mod adapter;
mod address;
mod advertising;
mod commands;
mod connection;
mod constants;
mod coordinator;
mod device;
mod enumeration;
mod error;
mod event_bus;
mod events;
mod notification;
mod orchestrator;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::{AdapterHandle, DEFAULT_COMMAND_TIMEOUT};
pub use address::{AddressType, BleAddress};
pub use advertising::{AdvertisingData, FLAGS_GENERAL_DISCOVERABLE};
pub use commands::{
    CommandId, CommandKind, CommandResponse, CommandSender, ControllerCommand, ControllerEvent,
    TimeoutSource,
};
pub use connection::{ConnectionRecord, ConnectionRegistry, ConnectionStatus};
pub use constants::*; // Re-export all constants
pub use coordinator::{EstablishedLink, LinkCoordinator, LinkSession};
pub use device::Device;
pub use enumeration::AdapterEnumerator;
pub use error::{BleError, Result};
pub use event_bus::{EventBus, EventObserver, EventSubscription, ObserverId};
pub use events::{AdapterEvent, ErrorEvent, ErrorKind, EventKind, EventKindSet, Severity};
pub use orchestrator::{AdapterProfile, ConnectionOrchestrator, RolePlan};
pub use types::{
    AdapterStatus, AdvertisingParams, Capabilities, ConfigurationState, ConnectionHandle,
    ConnectionParams, DisconnectReason, EnableOptions, FlowControl, Parity, Role, RoleAction,
    ScanParams, TransportConfig,
};
