//! Controller-originated notifications and their kinds.

use serde::Serialize;

use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::types::{AdapterStatus, DisconnectReason};

/// Severity of a controller log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl From<Severity> for log::Level {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Trace => log::Level::Trace,
            Severity::Debug => log::Level::Debug,
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Fatal => log::Level::Error,
        }
    }
}

/// Which failure an `Error` event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Controller,
    Transport,
    Timeout,
}

/// Detail carried by an `Error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub code: u32,
    pub message: String,
}

/// Everything an adapter reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AdapterEvent {
    LogMessage { severity: Severity, message: String },
    StatusChanged(AdapterStatus),
    Error(ErrorEvent),
    DeviceConnected(Device),
    DeviceDisconnected { device: Device, reason: DisconnectReason },
    DeviceDiscovered(Device),
}

impl AdapterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LogMessage { .. } => EventKind::LogMessage,
            Self::StatusChanged(_) => EventKind::StatusChanged,
            Self::Error(_) => EventKind::Error,
            Self::DeviceConnected(_) => EventKind::DeviceConnected,
            Self::DeviceDisconnected { .. } => EventKind::DeviceDisconnected,
            Self::DeviceDiscovered(_) => EventKind::DeviceDiscovered,
        }
    }
}

/// The closed set of event kinds observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    LogMessage = 0,
    StatusChanged = 1,
    Error = 2,
    DeviceConnected = 3,
    DeviceDisconnected = 4,
    DeviceDiscovered = 5,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::LogMessage,
        EventKind::StatusChanged,
        EventKind::Error,
        EventKind::DeviceConnected,
        EventKind::DeviceDisconnected,
        EventKind::DeviceDiscovered,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A subset of [`EventKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventKindSet(u8);

impl EventKindSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b0011_1111)
    }

    pub const fn only(kind: EventKind) -> Self {
        Self(kind.bit())
    }

    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub const fn contains(&self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl From<EventKind> for EventKindSet {
    fn from(kind: EventKind) -> Self {
        Self::only(kind)
    }
}

impl<const N: usize> From<[EventKind; N]> for EventKindSet {
    fn from(kinds: [EventKind; N]) -> Self {
        kinds.into_iter().fold(Self::empty(), Self::with)
    }
}
