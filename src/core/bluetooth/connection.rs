//! Bluetooth connection tracking for the coordinator
//! This module keeps one record per link an adapter is establishing or has
//! established, driven entirely by the adapter's events.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};
use serde::Serialize;

use crate::core::bluetooth::adapter::AdapterHandle;
use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::event_bus::{EventObserver, ObserverId};
use crate::core::bluetooth::events::{AdapterEvent, EventKind};
use crate::core::bluetooth::types::{
    AdapterStatus, ConfigurationState, ConnectionHandle, DisconnectReason, Role,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Disconnected(DisconnectReason),
}

/// One link, pending or established, as seen from one adapter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionRecord {
    pub local_role: Role,
    /// Instance id of the adapter that reported this link
    pub adapter_id: String,
    pub peer_address: BleAddress,
    pub handle: Option<ConnectionHandle>,
    pub status: ConnectionStatus,
}

#[derive(Default)]
struct Records {
    active: Vec<ConnectionRecord>,
    archived: Vec<ConnectionRecord>,
}

impl Records {
    fn archive(&mut self, index: usize, reason: DisconnectReason) {
        let mut record = self.active.remove(index);
        record.status = ConnectionStatus::Disconnected(reason);
        info!(
            "{} link to {} closed: {:?}",
            record.local_role.log_prefix(),
            record.peer_address,
            reason
        );
        self.archived.push(record);
    }
}

/// Connection records for every attached adapter. Clones share the records.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    records: Arc<Mutex<Records>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts tracking links on `adapter`, which plays `role`.
    pub fn attach(&self, role: Role, adapter: &AdapterHandle) -> ObserverId {
        let tracker = ConnectionTracker {
            registry: self.clone(),
            role,
            adapter_id: adapter.instance_id().to_string(),
        };
        adapter.events().register(
            [
                EventKind::StatusChanged,
                EventKind::DeviceConnected,
                EventKind::DeviceDisconnected,
            ],
            Arc::new(tracker),
        )
    }

    /// Links that are pending or connected.
    pub fn active(&self) -> Vec<ConnectionRecord> {
        self.records().active.clone()
    }

    /// Links that have ended, oldest first.
    pub fn archived(&self) -> Vec<ConnectionRecord> {
        self.records().archived.clone()
    }

    /// The connected record on `adapter_id`, if any.
    pub fn connected(&self, adapter_id: &str) -> Option<ConnectionRecord> {
        self.records()
            .active
            .iter()
            .find(|record| {
                record.adapter_id == adapter_id && record.status == ConnectionStatus::Connected
            })
            .cloned()
    }

    fn on_status(&self, role: Role, adapter_id: &str, status: &AdapterStatus) {
        let mut records = self.records();
        let pending = records.active.iter().position(|record| {
            record.adapter_id == adapter_id && record.status == ConnectionStatus::Pending
        });
        match (status.connecting_to, pending) {
            (Some(peer), None) => {
                records.active.push(ConnectionRecord {
                    local_role: role,
                    adapter_id: adapter_id.to_string(),
                    peer_address: peer,
                    handle: None,
                    status: ConnectionStatus::Pending,
                });
            }
            (None, Some(index)) => {
                // The attempt ended without a link.
                let reason = if status.state == ConfigurationState::Closed {
                    DisconnectReason::AdapterClosed
                } else {
                    DisconnectReason::ConnectionTimeout
                };
                records.archive(index, reason);
            }
            _ => {}
        }
    }

    fn on_connected(
        &self,
        role: Role,
        adapter_id: &str,
        peer: BleAddress,
        handle: Option<ConnectionHandle>,
    ) {
        let mut records = self.records();
        let pending = records.active.iter_mut().find(|record| {
            record.adapter_id == adapter_id
                && record.peer_address == peer
                && record.status == ConnectionStatus::Pending
        });
        match pending {
            Some(record) => {
                record.handle = handle;
                record.status = ConnectionStatus::Connected;
            }
            None => records.active.push(ConnectionRecord {
                local_role: role,
                adapter_id: adapter_id.to_string(),
                peer_address: peer,
                handle,
                status: ConnectionStatus::Connected,
            }),
        }
        info!("{} link to {} established", role.log_prefix(), peer);
    }

    fn on_disconnected(
        &self,
        adapter_id: &str,
        peer: BleAddress,
        handle: Option<ConnectionHandle>,
        reason: DisconnectReason,
    ) {
        let mut records = self.records();
        let index = records.active.iter().position(|record| {
            record.adapter_id == adapter_id
                && record.status == ConnectionStatus::Connected
                && (record.handle == handle || record.peer_address == peer)
        });
        match index {
            Some(index) => records.archive(index, reason),
            None => warn!("Disconnect from {} on {} matches no link", peer, adapter_id),
        }
    }
}

struct ConnectionTracker {
    registry: ConnectionRegistry,
    role: Role,
    adapter_id: String,
}

impl EventObserver for ConnectionTracker {
    fn on_event(&self, event: &AdapterEvent) {
        match event {
            AdapterEvent::StatusChanged(status) => {
                self.registry.on_status(self.role, &self.adapter_id, status)
            }
            AdapterEvent::DeviceConnected(device) => self.registry.on_connected(
                self.role,
                &self.adapter_id,
                device.address,
                device.connection_handle,
            ),
            AdapterEvent::DeviceDisconnected { device, reason } => self.registry.on_disconnected(
                &self.adapter_id,
                device.address,
                device.connection_handle,
                *reason,
            ),
            _ => {}
        }
    }
}
