//! Two-role link coordinator
//! This module wires a central and a peripheral adapter together: it brings
//! both up, makes the peripheral advertise, points the central at it and
//! hands back a session the caller can wait on for the link.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::config::{AppConfig, ErrorPolicy};
use crate::core::bluetooth::adapter::AdapterHandle;
use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::connection::ConnectionRegistry;
use crate::core::bluetooth::enumeration::AdapterEnumerator;
use crate::core::bluetooth::error::{BleError, Result};
use crate::core::bluetooth::event_bus::{EventSubscription, ObserverId};
use crate::core::bluetooth::events::{AdapterEvent, ErrorEvent, ErrorKind, EventKind};
use crate::core::bluetooth::orchestrator::{ConnectionOrchestrator, RolePlan};
use crate::core::bluetooth::types::{ConnectionHandle, Role};
use crate::logging::LogEventObserver;

/// Both ends of an established link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstablishedLink {
    pub central_address: BleAddress,
    pub peripheral_address: BleAddress,
    pub central_handle: ConnectionHandle,
    pub peripheral_handle: ConnectionHandle,
}

/// Sets up a link between the two attached adapters
pub struct LinkCoordinator {
    config: AppConfig,
}

impl LinkCoordinator {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Configured time allowed between setup and both sides reporting the link.
    pub fn link_timeout(&self) -> Duration {
        Duration::from_secs(self.config.link_timeout_secs)
    }

    /// Enumerates adapters, brings both up and issues both role actions.
    ///
    /// Does not wait for the link itself; see [`LinkSession::wait_for_link`].
    pub async fn setup(&self, enumerator: &dyn AdapterEnumerator) -> Result<LinkSession> {
        let adapters = enumerator.list_adapters().await?;
        if adapters.len() != 2 {
            let ids: Vec<&str> = adapters.keys().map(String::as_str).collect();
            return Err(BleError::Enumeration(format!(
                "a link needs exactly 2 adapters, found {}: {:?}",
                adapters.len(),
                ids
            )));
        }
        let mut adapters = adapters.into_values();
        let (Some(central), Some(peripheral)) = (adapters.next(), adapters.next()) else {
            return Err(BleError::Enumeration("adapter list changed while reading it".into()));
        };
        info!(
            "Central adapter: {}, peripheral adapter: {}",
            central.instance_id(),
            peripheral.instance_id()
        );

        let config = &self.config;
        let central_profile =
            config
                .central
                .to_profile(Role::Central, &config.transport, &config.radio)?;
        let peripheral_profile =
            config
                .peripheral
                .to_profile(Role::Peripheral, &config.transport, &config.radio)?;
        let central_address = central_profile.address;
        let peripheral_address = peripheral_profile.address;

        let peripheral_plan = RolePlan::Peripheral {
            advertising: config.advertising_data.clone(),
            scan_response: config.scan_response.clone(),
            params: config.advertising,
            max_payload_size: config.max_payload_size,
        };
        let central_plan = RolePlan::Central {
            peer: peripheral_address,
            scan: config.scan,
            connection: config.connection,
            max_payload_size: config.max_payload_size,
        };

        // Everything that observes the adapters is in place before the
        // first command goes out.
        let registry = ConnectionRegistry::new();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let mut observers = Vec::new();
        for (role, adapter) in [(Role::Central, &central), (Role::Peripheral, &peripheral)] {
            let log_id = LogEventObserver::attach(role, adapter);
            let registry_id = registry.attach(role, adapter);
            let watch_id = watch_errors(role, adapter, error_tx.clone());
            observers.extend([
                (adapter.clone(), log_id),
                (adapter.clone(), registry_id),
                (adapter.clone(), watch_id),
            ]);
        }
        let central_connected = central.events().subscribe(EventKind::DeviceConnected);
        let peripheral_connected = peripheral.events().subscribe(EventKind::DeviceConnected);

        let session = LinkSession {
            central: central.clone(),
            peripheral: peripheral.clone(),
            central_address,
            peripheral_address,
            registry,
            central_connected,
            peripheral_connected,
            errors,
            error_policy: config.error_policy,
            observers,
        };

        let central_orchestrator = ConnectionOrchestrator::new(central, central_profile);
        let peripheral_orchestrator = ConnectionOrchestrator::new(peripheral, peripheral_profile);
        if let Err(e) = drive(
            &central_orchestrator,
            &central_plan,
            &peripheral_orchestrator,
            &peripheral_plan,
        )
        .await
        {
            session.detach();
            return Err(e);
        }

        info!("Both role actions issued, waiting for the link");
        Ok(session)
    }
}

/// Brings both adapters up, then advertises, then connects.
async fn drive(
    central: &ConnectionOrchestrator,
    central_plan: &RolePlan,
    peripheral: &ConnectionOrchestrator,
    peripheral_plan: &RolePlan,
) -> Result<()> {
    // A failure on one side must not cut the other side's command short,
    // so both bring-ups run to completion before either result is used.
    let (central_caps, peripheral_caps) = tokio::join!(central.bring_up(), peripheral.bring_up());
    let peripheral_caps = peripheral_caps
        .inspect_err(|e| error!("{} bring-up failed: {}", Role::Peripheral.log_prefix(), e));
    let central_caps = central_caps
        .inspect_err(|e| error!("{} bring-up failed: {}", Role::Central.log_prefix(), e));
    let (central_caps, peripheral_caps) = (central_caps?, peripheral_caps?);

    peripheral
        .perform(peripheral_plan, &peripheral_caps)
        .await
        .inspect_err(|e| error!("{} role action failed: {}", Role::Peripheral.log_prefix(), e))?;
    central
        .perform(central_plan, &central_caps)
        .await
        .inspect_err(|e| error!("{} role action failed: {}", Role::Central.log_prefix(), e))
}

fn watch_errors(
    role: Role,
    adapter: &AdapterHandle,
    errors: mpsc::UnboundedSender<(Role, ErrorEvent)>,
) -> ObserverId {
    let forward = move |event: &AdapterEvent| {
        if let AdapterEvent::Error(detail) = event {
            let _ = errors.send((role, detail.clone()));
        }
    };
    adapter.events().register(EventKind::Error, Arc::new(forward))
}

/// A link being established between two configured adapters
pub struct LinkSession {
    central: AdapterHandle,
    peripheral: AdapterHandle,
    central_address: BleAddress,
    peripheral_address: BleAddress,
    registry: ConnectionRegistry,
    central_connected: EventSubscription,
    peripheral_connected: EventSubscription,
    errors: mpsc::UnboundedReceiver<(Role, ErrorEvent)>,
    error_policy: ErrorPolicy,
    observers: Vec<(AdapterHandle, ObserverId)>,
}

impl LinkSession {
    pub fn central(&self) -> &AdapterHandle {
        &self.central
    }

    pub fn peripheral(&self) -> &AdapterHandle {
        &self.peripheral
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Waits until each side reports a connection to the other.
    ///
    /// Under [`ErrorPolicy::Fatal`] the first `Error` event from either
    /// adapter ends the wait with that error.
    pub async fn wait_for_link(&mut self, timeout: Duration) -> Result<EstablishedLink> {
        match tokio::time::timeout(timeout, self.next_link()).await {
            Ok(result) => result,
            Err(_) => Err(BleError::Timeout(format!(
                "link between {} and {} not reported within {:?}",
                self.central_address, self.peripheral_address, timeout
            ))),
        }
    }

    async fn next_link(&mut self) -> Result<EstablishedLink> {
        let mut central_handle = None;
        let mut peripheral_handle = None;

        while central_handle.is_none() || peripheral_handle.is_none() {
            tokio::select! {
                biased;
                Some((role, detail)) = self.errors.recv() => {
                    self.on_error(role, detail)?;
                }
                event = self.central_connected.recv(), if central_handle.is_none() => {
                    central_handle = match event {
                        Some(AdapterEvent::DeviceConnected(device))
                            if device.address == self.peripheral_address => device.connection_handle,
                        Some(_) => None,
                        None => return Err(stream_closed(Role::Central)),
                    };
                }
                event = self.peripheral_connected.recv(), if peripheral_handle.is_none() => {
                    peripheral_handle = match event {
                        Some(AdapterEvent::DeviceConnected(device))
                            if device.address == self.central_address => device.connection_handle,
                        Some(_) => None,
                        None => return Err(stream_closed(Role::Peripheral)),
                    };
                }
            }
        }

        match (central_handle, peripheral_handle) {
            (Some(central_handle), Some(peripheral_handle)) => {
                info!(
                    "Link established: {} (handle {}) <-> {} (handle {})",
                    self.central_address, central_handle.0, self.peripheral_address, peripheral_handle.0
                );
                Ok(EstablishedLink {
                    central_address: self.central_address,
                    peripheral_address: self.peripheral_address,
                    central_handle,
                    peripheral_handle,
                })
            }
            _ => Err(BleError::Transport("link handles missing".into())),
        }
    }

    fn on_error(&self, role: Role, detail: ErrorEvent) -> Result<()> {
        match self.error_policy {
            ErrorPolicy::Tolerate => {
                warn!("{} tolerating error event: {}", role.log_prefix(), detail.message);
                Ok(())
            }
            ErrorPolicy::Fatal => Err(match detail.kind {
                ErrorKind::Controller => BleError::Controller {
                    code: detail.code,
                    message: detail.message,
                },
                ErrorKind::Transport => BleError::Transport(detail.message),
                ErrorKind::Timeout => BleError::Timeout(detail.message),
            }),
        }
    }

    fn detach(&self) {
        for (adapter, id) in &self.observers {
            adapter.events().deregister(*id);
        }
    }

    /// Closes both adapters and detaches the session's observers.
    pub async fn shutdown(self) -> Result<()> {
        let central = self.central.close().await;
        let peripheral = self.peripheral.close().await;
        self.detach();
        info!("Link session shut down");
        central.and(peripheral)
    }
}

fn stream_closed(role: Role) -> BleError {
    BleError::Transport(format!("{} event subscription closed", role.log_prefix()))
}
