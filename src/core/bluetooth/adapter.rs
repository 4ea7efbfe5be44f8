//! Adapter handle: one controller, its configuration state and its commands.
//!
//! Every command is checked against the adapter's state before anything is
//! sent; a command issued out of order, or while another is outstanding,
//! fails immediately with [`BleError::InvalidState`]. Completions come back
//! on the controller's event stream and are applied by the event pump (see
//! [`notification`](super::notification)), which is the only writer of
//! adapter state while the adapter is open.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::address::BleAddress;
use crate::core::bluetooth::advertising::AdvertisingData;
use crate::core::bluetooth::commands::{
    CommandId, CommandResponse, CommandSender, ControllerCommand, ControllerEvent, TimeoutSource,
};
use crate::core::bluetooth::constants::{
    ERROR_TIMEOUT, MAX_DEVICE_NAME_LEN, MAX_PAYLOAD_SIZE, MIN_PAYLOAD_SIZE,
};
use crate::core::bluetooth::device::Device;
use crate::core::bluetooth::error::{BleError, Result};
use crate::core::bluetooth::event_bus::EventBus;
use crate::core::bluetooth::events::{AdapterEvent, ErrorEvent, ErrorKind};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::types::{
    AdapterStatus, AdvertisingParams, Capabilities, ConfigurationState, ConnectionHandle,
    ConnectionParams, DisconnectReason, EnableOptions, RoleAction, ScanParams, TransportConfig,
};

/// How long a command may wait for its completion by default
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

struct InFlight {
    id: CommandId,
    command: ControllerCommand,
    reply: oneshot::Sender<Result<CommandResponse>>,
}

struct AdapterState {
    config_state: ConfigurationState,
    address: Option<BleAddress>,
    name: Option<String>,
    role_action: RoleAction,
    capabilities: Option<Capabilities>,
    payload_staged: bool,
    connecting_to: Option<BleAddress>,
    connections: BTreeMap<ConnectionHandle, BleAddress>,
    max_payload_size: Option<u16>,
    in_flight: Option<InFlight>,
    next_command_id: u64,
    /// Present while the event pump runs
    session: Option<CancellationToken>,
}

impl AdapterState {
    fn new() -> Self {
        Self {
            config_state: ConfigurationState::Closed,
            address: None,
            name: None,
            role_action: RoleAction::None,
            capabilities: None,
            payload_staged: false,
            connecting_to: None,
            connections: BTreeMap::new(),
            max_payload_size: None,
            in_flight: None,
            next_command_id: 0,
            session: None,
        }
    }

    /// Forget everything tied to the closed session, keeping the id counter.
    fn reset(&mut self) {
        let next_command_id = self.next_command_id;
        *self = Self::new();
        self.next_command_id = next_command_id;
    }

    fn require(&self, operation: &'static str, expected: ConfigurationState) -> Result<()> {
        if self.config_state != expected {
            return Err(BleError::invalid_state(
                operation,
                self.config_state,
                format!("requires {expected:?}"),
            ));
        }
        Ok(())
    }

    fn require_no_role_action(&self, operation: &'static str) -> Result<()> {
        match self.role_action {
            RoleAction::None => Ok(()),
            RoleAction::Advertising => Err(BleError::invalid_state(
                operation,
                self.config_state,
                "already advertising",
            )),
            RoleAction::Scanning => Err(BleError::invalid_state(
                operation,
                self.config_state,
                "already scanning",
            )),
        }
    }

    /// Moves one step along the configuration sequence.
    fn advance_to(&mut self, target: ConfigurationState) {
        debug_assert_eq!(self.config_state.next(), Some(target));
        self.config_state = target;
    }
}

pub(super) struct AdapterInner {
    instance_id: String,
    sender: Arc<dyn CommandSender>,
    bus: EventBus,
    state: Mutex<AdapterState>,
    command_timeout: Duration,
}

/// Handle to one controller. Clones share the same adapter.
#[derive(Clone)]
pub struct AdapterHandle {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("instance_id", &self.inner.instance_id)
            .field("state", &self.configuration_state())
            .finish()
    }
}

impl AdapterHandle {
    pub fn new(instance_id: impl Into<String>, sender: Arc<dyn CommandSender>) -> Self {
        Self::with_command_timeout(instance_id, sender, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_command_timeout(
        instance_id: impl Into<String>,
        sender: Arc<dyn CommandSender>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                instance_id: instance_id.into(),
                sender,
                bus: EventBus::new(),
                state: Mutex::new(AdapterState::new()),
                command_timeout,
            }),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    /// The bus this adapter publishes its events on.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn get_state(&self) -> AdapterStatus {
        self.inner.snapshot(&self.inner.lock_state())
    }

    pub fn configuration_state(&self) -> ConfigurationState {
        self.inner.lock_state().config_state
    }

    pub fn role_action(&self) -> RoleAction {
        self.inner.lock_state().role_action
    }

    pub fn address(&self) -> Option<BleAddress> {
        self.inner.lock_state().address
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.inner.lock_state().capabilities
    }

    /// Opens the transport and starts the event pump.
    pub async fn open(&self, config: TransportConfig) -> Result<()> {
        let spawned = {
            let mut state = self.inner.lock_state();
            if state.config_state != ConfigurationState::Closed {
                return Err(BleError::invalid_state(
                    "open",
                    state.config_state,
                    "already open",
                ));
            }
            // A rejected open must leave a running session alone.
            if let Some(busy) = &state.in_flight {
                return Err(BleError::invalid_state(
                    "open",
                    state.config_state,
                    format!("{} still in flight", busy.command.kind()),
                ));
            }
            if state.session.is_some() {
                None
            } else {
                let token = CancellationToken::new();
                let events = self.inner.sender.subscribe_events();
                NotificationHandler::spawn(Arc::downgrade(&self.inner), events, token.clone());
                state.session = Some(token.clone());
                Some(token)
            }
        };

        info!("[{}] opening transport at {} baud", self.instance_id(), config.baud_rate);
        let result = self
            .inner
            .execute(ControllerCommand::Open(config), |state| {
                state.require("open", ConfigurationState::Closed)
            })
            .await;

        if let (Err(_), Some(spawned)) = (&result, spawned) {
            // A session only ever leaves the state cancelled, so an
            // uncancelled token means the current session is still ours.
            let mut state = self.inner.lock_state();
            if !spawned.is_cancelled() && state.config_state == ConfigurationState::Closed {
                state.session = None;
                spawned.cancel();
            }
        }
        result.map(|_| ())
    }

    /// Enables the radio stack and returns the negotiated capabilities.
    pub async fn enable_radio_stack(&self, options: EnableOptions) -> Result<Capabilities> {
        let response = self
            .inner
            .execute(ControllerCommand::EnableRadioStack(options), |state| {
                state.require("enable_radio_stack", ConfigurationState::Opened)
            })
            .await?;
        match response {
            CommandResponse::RadioEnabled(capabilities) => {
                info!(
                    "[{}] radio stack enabled, api version {}, app RAM base {:#010x}",
                    self.instance_id(),
                    capabilities.api_version,
                    capabilities.app_ram_base
                );
                Ok(capabilities)
            }
            other => Err(BleError::Transport(format!(
                "unexpected response to enable_radio_stack: {other:?}"
            ))),
        }
    }

    pub async fn set_address(&self, address: BleAddress) -> Result<()> {
        self.inner
            .execute(ControllerCommand::SetAddress(address), |state| {
                state.require("set_address", ConfigurationState::RadioEnabled)?;
                address.validate()
            })
            .await
            .map(|_| ())
    }

    /// Sets the device name; the adapter is Ready once this completes.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.inner
            .execute(ControllerCommand::SetName(name.to_string()), |state| {
                state.require("set_name", ConfigurationState::Addressed)?;
                if name.len() > MAX_DEVICE_NAME_LEN {
                    return Err(BleError::InvalidParameter(format!(
                        "name is {} bytes, limit is {}",
                        name.len(),
                        MAX_DEVICE_NAME_LEN
                    )));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn set_advertising_payload(
        &self,
        advertising: &AdvertisingData,
        scan_response: &AdvertisingData,
    ) -> Result<()> {
        let state = self.configuration_state();
        if state != ConfigurationState::Ready {
            return Err(BleError::invalid_state(
                "set_advertising_payload",
                state,
                "requires Ready",
            ));
        }
        let advertising = advertising.encode()?;
        let scan_response = scan_response.encode()?;
        self.inner
            .execute(
                ControllerCommand::SetAdvertisingData {
                    advertising,
                    scan_response,
                },
                |state| state.require("set_advertising_payload", ConfigurationState::Ready),
            )
            .await
            .map(|_| ())
    }

    pub async fn start_advertising(&self, params: AdvertisingParams) -> Result<()> {
        self.inner
            .execute(ControllerCommand::StartAdvertising(params), |state| {
                state.require("start_advertising", ConfigurationState::Ready)?;
                state.require_no_role_action("start_advertising")?;
                if !state.payload_staged {
                    return Err(BleError::invalid_state(
                        "start_advertising",
                        state.config_state,
                        "no advertising payload staged",
                    ));
                }
                params.validate()
            })
            .await
            .map(|_| ())
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        self.inner
            .execute(ControllerCommand::StopAdvertising, |state| {
                state.require("stop_advertising", ConfigurationState::Ready)?;
                if state.role_action != RoleAction::Advertising {
                    return Err(BleError::invalid_state(
                        "stop_advertising",
                        state.config_state,
                        "not advertising",
                    ));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub async fn start_scan(&self, params: ScanParams) -> Result<()> {
        self.inner
            .execute(ControllerCommand::StartScan(params), |state| {
                state.require("start_scan", ConfigurationState::Ready)?;
                state.require_no_role_action("start_scan")?;
                params.validate()
            })
            .await
            .map(|_| ())
    }

    pub async fn stop_scan(&self) -> Result<()> {
        self.inner
            .execute(ControllerCommand::StopScan, |state| {
                state.require("stop_scan", ConfigurationState::Ready)?;
                if state.role_action != RoleAction::Scanning {
                    return Err(BleError::invalid_state(
                        "stop_scan",
                        state.config_state,
                        "not scanning",
                    ));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Issues an outbound connection attempt. Success means the controller
    /// accepted it; `DeviceConnected` follows on the event bus.
    pub async fn connect(
        &self,
        peer: BleAddress,
        scan_params: ScanParams,
        conn_params: ConnectionParams,
    ) -> Result<()> {
        info!("[{}] connecting to {} ({})", self.instance_id(), peer, peer.address_type());
        self.inner
            .execute(
                ControllerCommand::Connect {
                    peer,
                    scan_params,
                    conn_params,
                },
                |state| {
                    state.require("connect", ConfigurationState::Ready)?;
                    if state.role_action == RoleAction::Advertising {
                        return Err(BleError::invalid_state(
                            "connect",
                            state.config_state,
                            "cannot connect while advertising",
                        ));
                    }
                    if let Some(pending) = state.connecting_to {
                        return Err(BleError::invalid_state(
                            "connect",
                            state.config_state,
                            format!("already connecting to {pending}"),
                        ));
                    }
                    peer.validate()?;
                    scan_params.validate()?;
                    conn_params.validate()
                },
            )
            .await
            .map(|_| ())
    }

    pub async fn disconnect(&self, handle: ConnectionHandle) -> Result<()> {
        self.inner
            .execute(ControllerCommand::Disconnect(handle), |state| {
                state.require("disconnect", ConfigurationState::Ready)?;
                if !state.connections.contains_key(&handle) {
                    return Err(BleError::invalid_state(
                        "disconnect",
                        state.config_state,
                        format!("no connection with handle {}", handle.0),
                    ));
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Raises the link-layer payload size. Succeeds without doing anything
    /// when the firmware does not support extended payloads.
    pub async fn set_max_payload_size(&self, size: u16) -> Result<()> {
        {
            let state = self.inner.lock_state();
            state.require("set_max_payload_size", ConfigurationState::Ready)?;
            let supported = state
                .capabilities
                .is_some_and(|capabilities| capabilities.supports_extended_payload());
            if !supported {
                debug!(
                    "[{}] extended payloads unsupported, skipping max payload size",
                    self.instance_id()
                );
                return Ok(());
            }
        }
        self.inner
            .execute(ControllerCommand::SetMaxPayloadSize(size), |state| {
                state.require("set_max_payload_size", ConfigurationState::Ready)?;
                if !(MIN_PAYLOAD_SIZE..=MAX_PAYLOAD_SIZE).contains(&size) {
                    return Err(BleError::InvalidParameter(format!(
                        "payload size {size} outside {MIN_PAYLOAD_SIZE}..={MAX_PAYLOAD_SIZE}"
                    )));
                }
                Ok(())
            })
            .await?;
        info!("[{}] max payload size set to {}", self.instance_id(), size);
        Ok(())
    }

    /// Closes the adapter. Any outstanding command resolves with
    /// [`BleError::Aborted`] and every open link is reported disconnected.
    pub async fn close(&self) -> Result<()> {
        let (aborted, disconnected, status, close_id) = {
            let mut state = self.inner.lock_state();
            if state.session.is_none() && state.config_state == ConfigurationState::Closed {
                return Ok(());
            }
            if let Some(token) = state.session.take() {
                token.cancel();
            }
            let aborted = state.in_flight.take();
            let disconnected: Vec<(ConnectionHandle, BleAddress)> =
                std::mem::take(&mut state.connections).into_iter().collect();
            let close_id = CommandId(state.next_command_id);
            state.reset();
            state.next_command_id = close_id.0 + 1;
            (aborted, disconnected, self.inner.snapshot(&state), close_id)
        };

        if let Some(in_flight) = aborted {
            warn!(
                "[{}] aborting {} on close",
                self.instance_id(),
                in_flight.command.kind()
            );
            let _ = in_flight
                .reply
                .send(Err(BleError::Aborted(in_flight.command.kind().as_str())));
        }

        // Nobody listens for this completion any more; the controller only
        // needs to know the link is going away.
        if let Err(e) = self
            .inner
            .sender
            .send_command(close_id, ControllerCommand::Close)
            .await
        {
            warn!("[{}] close command failed: {}", self.instance_id(), e);
        }

        for (handle, peer) in disconnected {
            self.inner.bus.publish(&AdapterEvent::DeviceDisconnected {
                device: Device::connected(peer, handle),
                reason: DisconnectReason::AdapterClosed,
            });
        }
        self.inner.bus.publish(&AdapterEvent::StatusChanged(status));
        info!("[{}] closed", self.instance_id());
        Ok(())
    }
}

impl AdapterInner {
    fn lock_state(&self) -> MutexGuard<'_, AdapterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self, state: &AdapterState) -> AdapterStatus {
        AdapterStatus {
            instance_id: self.instance_id.clone(),
            state: state.config_state,
            address: state.address,
            name: state.name.clone(),
            role_action: state.role_action,
            capabilities: state.capabilities,
            connecting_to: state.connecting_to,
            connections: state.connections.keys().copied().collect(),
            max_payload_size: state.max_payload_size,
        }
    }

    /// Checks `precondition`, sends `command` and waits for its completion.
    async fn execute(
        &self,
        command: ControllerCommand,
        precondition: impl FnOnce(&AdapterState) -> Result<()>,
    ) -> Result<CommandResponse> {
        let operation = command.kind().as_str();
        let (id, mut reply) = {
            let mut state = self.lock_state();
            if let Some(busy) = &state.in_flight {
                return Err(BleError::invalid_state(
                    operation,
                    state.config_state,
                    format!("{} still in flight", busy.command.kind()),
                ));
            }
            precondition(&state)?;
            if state.session.is_none() {
                return Err(BleError::invalid_state(
                    operation,
                    state.config_state,
                    "adapter is not open",
                ));
            }
            let id = CommandId(state.next_command_id);
            state.next_command_id += 1;
            let (tx, rx) = oneshot::channel();
            state.in_flight = Some(InFlight {
                id,
                command: command.clone(),
                reply: tx,
            });
            (id, rx)
        };

        debug!("[{}] -> {:?}", self.instance_id, command);
        if let Err(e) = self.sender.send_command(id, command).await {
            self.take_in_flight(id);
            return Err(e);
        }

        match tokio::time::timeout(self.command_timeout, &mut reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BleError::Transport(format!(
                "{operation} completion was dropped"
            ))),
            Err(_) => {
                if self.take_in_flight(id).is_some() {
                    return Err(BleError::Timeout(format!(
                        "{operation} not completed within {:?}",
                        self.command_timeout
                    )));
                }
                // The pump claimed the completion just as the timer fired.
                reply.await.unwrap_or_else(|_| {
                    Err(BleError::Transport(format!(
                        "{operation} completion was dropped"
                    )))
                })
            }
        }
    }

    /// Locks the state for the pump of `session`, or returns None once that
    /// session has been closed. `close` cancels under this same lock.
    fn lock_live(&self, session: &CancellationToken) -> Option<MutexGuard<'_, AdapterState>> {
        let state = self.lock_state();
        if session.is_cancelled() {
            debug!("[{}] event after close dropped", self.instance_id);
            return None;
        }
        Some(state)
    }

    fn is_live(&self, session: &CancellationToken) -> bool {
        self.lock_live(session).is_some()
    }

    fn take_in_flight(&self, id: CommandId) -> Option<InFlight> {
        let mut state = self.lock_state();
        if state.in_flight.as_ref().is_some_and(|f| f.id == id) {
            state.in_flight.take()
        } else {
            None
        }
    }

    /// Applies one controller event to the adapter state and publishes the
    /// resulting adapter events. Called only by the event pump.
    pub(super) fn handle_controller_event(&self, event: ControllerEvent, session: &CancellationToken) {
        match event {
            ControllerEvent::CommandComplete { id, result } => {
                self.complete_command(id, result, session)
            }
            _ if !self.is_live(session) => {}
            ControllerEvent::Log { severity, message } => {
                self.bus
                    .publish(&AdapterEvent::LogMessage { severity, message });
            }
            ControllerEvent::Error { code, message } => {
                self.bus.publish(&AdapterEvent::Error(ErrorEvent {
                    kind: ErrorKind::Controller,
                    code,
                    message,
                }));
            }
            ControllerEvent::Connected { peer, handle } => {
                let status = {
                    let Some(mut state) = self.lock_live(session) else {
                        return;
                    };
                    state.connections.insert(handle, peer);
                    let mut changed = false;
                    if state.connecting_to == Some(peer) {
                        state.connecting_to = None;
                        changed = true;
                    }
                    // Advertising stops once a central connects.
                    if state.role_action == RoleAction::Advertising {
                        state.role_action = RoleAction::None;
                        changed = true;
                    }
                    changed.then(|| self.snapshot(&state))
                };
                info!("[{}] connected to {} (handle {})", self.instance_id, peer, handle.0);
                self.bus
                    .publish(&AdapterEvent::DeviceConnected(Device::connected(peer, handle)));
                if let Some(status) = status {
                    self.bus.publish(&AdapterEvent::StatusChanged(status));
                }
            }
            ControllerEvent::Disconnected {
                peer,
                handle,
                reason,
            } => {
                let Some(mut state) = self.lock_live(session) else {
                    return;
                };
                let known = state.connections.remove(&handle).is_some();
                drop(state);
                if !known {
                    warn!(
                        "[{}] disconnect for unknown handle {}",
                        self.instance_id, handle.0
                    );
                }
                self.bus.publish(&AdapterEvent::DeviceDisconnected {
                    device: Device::connected(peer, handle),
                    reason,
                });
            }
            ControllerEvent::AdvertisingReport {
                address,
                name,
                rssi,
            } => {
                self.bus
                    .publish(&AdapterEvent::DeviceDiscovered(Device::new(address, name, Some(rssi))));
            }
            ControllerEvent::Timeout(source) => self.handle_timeout(source, session),
        }
    }

    fn complete_command(
        &self,
        id: CommandId,
        result: Result<CommandResponse>,
        session: &CancellationToken,
    ) {
        let (in_flight, statuses) = {
            let Some(mut state) = self.lock_live(session) else {
                return;
            };
            let Some(in_flight) = state
                .in_flight
                .take_if(|in_flight| in_flight.id == id)
            else {
                warn!(
                    "[{}] ignoring completion for unknown command {:?}",
                    self.instance_id, id
                );
                return;
            };
            let statuses = match &result {
                Ok(response) => self.apply_completion(&mut state, &in_flight.command, response),
                Err(_) => Vec::new(),
            };
            (in_flight, statuses)
        };

        for status in statuses {
            self.bus.publish(&AdapterEvent::StatusChanged(status));
        }
        if let Err(e) = &result {
            warn!(
                "[{}] {} failed: {}",
                self.instance_id,
                in_flight.command.kind(),
                e
            );
        }
        // The caller may have given up on this command.
        let _ = in_flight.reply.send(result);
    }

    /// Applies a successful command to `state`, returning a snapshot for
    /// every observable change.
    fn apply_completion(
        &self,
        state: &mut AdapterState,
        command: &ControllerCommand,
        response: &CommandResponse,
    ) -> Vec<AdapterStatus> {
        let mut statuses = Vec::new();
        match command {
            ControllerCommand::Open(_) => state.advance_to(ConfigurationState::Opened),
            ControllerCommand::EnableRadioStack(_) => {
                if let CommandResponse::RadioEnabled(capabilities) = response {
                    state.capabilities = Some(*capabilities);
                }
                state.advance_to(ConfigurationState::RadioEnabled);
            }
            ControllerCommand::SetAddress(address) => {
                state.address = Some(*address);
                state.advance_to(ConfigurationState::Addressed);
            }
            ControllerCommand::SetName(name) => {
                state.name = Some(name.clone());
                state.advance_to(ConfigurationState::Named);
                statuses.push(self.snapshot(state));
                state.advance_to(ConfigurationState::Ready);
            }
            ControllerCommand::SetAdvertisingData { .. } => {
                state.payload_staged = true;
                return statuses;
            }
            ControllerCommand::StartAdvertising(_) => state.role_action = RoleAction::Advertising,
            ControllerCommand::StartScan(_) => state.role_action = RoleAction::Scanning,
            ControllerCommand::StopAdvertising | ControllerCommand::StopScan => {
                state.role_action = RoleAction::None
            }
            ControllerCommand::Connect { peer, .. } => state.connecting_to = Some(*peer),
            ControllerCommand::SetMaxPayloadSize(size) => state.max_payload_size = Some(*size),
            ControllerCommand::Disconnect(_) | ControllerCommand::Close => return statuses,
        }
        statuses.push(self.snapshot(state));
        statuses
    }

    fn handle_timeout(&self, source: TimeoutSource, session: &CancellationToken) {
        let status = {
            let Some(mut state) = self.lock_live(session) else {
                return;
            };
            match source {
                TimeoutSource::Advertising if state.role_action == RoleAction::Advertising => {
                    state.role_action = RoleAction::None;
                }
                TimeoutSource::Scan if state.role_action == RoleAction::Scanning => {
                    state.role_action = RoleAction::None;
                }
                TimeoutSource::Connection if state.connecting_to.is_some() => {
                    state.connecting_to = None;
                }
                _ => {
                    debug!("[{}] stale {:?} timeout ignored", self.instance_id, source);
                    return;
                }
            }
            self.snapshot(&state)
        };

        info!("[{}] {:?} timed out", self.instance_id, source);
        if source == TimeoutSource::Connection {
            self.bus.publish(&AdapterEvent::Error(ErrorEvent {
                kind: ErrorKind::Timeout,
                code: ERROR_TIMEOUT,
                message: "connection attempt timed out".to_string(),
            }));
        }
        self.bus.publish(&AdapterEvent::StatusChanged(status));
    }

    /// Fails the outstanding command when the event stream ends underneath it.
    pub(super) fn transport_lost(&self, session: &CancellationToken) {
        let Some(mut state) = self.lock_live(session) else {
            return;
        };
        let in_flight = state.in_flight.take();
        drop(state);
        self.bus.publish(&AdapterEvent::Error(ErrorEvent {
            kind: ErrorKind::Transport,
            code: 0,
            message: "controller event stream closed".to_string(),
        }));
        if let Some(in_flight) = in_flight {
            let _ = in_flight.reply.send(Err(BleError::Transport(format!(
                "event stream closed during {}",
                in_flight.command.kind()
            ))));
        }
    }

    pub(super) fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
