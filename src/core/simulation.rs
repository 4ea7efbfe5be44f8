//! In-process controllers linked over a virtual radio medium.
//!
//! [`SimulatedController`] answers every command the way the serial
//! firmware does: it completes the command on its event stream, then emits
//! whatever the command caused. Controllers sharing a [`VirtualAir`] can
//! see each other's advertising and connect to each other.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::core::bluetooth::{
    AdapterEnumerator, AdapterHandle, BleAddress, BleError, Capabilities, CommandId, CommandKind,
    CommandResponse, CommandSender, ConnectionHandle, ControllerCommand, ControllerEvent,
    DisconnectReason, Result, Severity, TimeoutSource, DEFAULT_COMMAND_TIMEOUT,
};

const APP_RAM_BASE: u32 = 0x2000_2DC8;
const SIMULATED_RSSI: i8 = -42;

#[derive(Default)]
struct AirState {
    advertisers: HashMap<BleAddress, Weak<ControllerShared>>,
    /// Outbound connection attempts waiting for their target to advertise
    pending: Vec<(BleAddress, Weak<ControllerShared>)>,
    next_handle: u16,
}

/// The shared medium controllers advertise on and connect through.
#[derive(Clone, Default)]
pub struct VirtualAir {
    state: Arc<Mutex<AirState>>,
}

impl VirtualAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AirState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Addresses currently advertising.
    pub fn advertisers(&self) -> Vec<BleAddress> {
        self.lock().advertisers.keys().copied().collect()
    }

    fn allocate_handle(&self) -> ConnectionHandle {
        let mut air = self.lock();
        let handle = ConnectionHandle(air.next_handle);
        air.next_handle = air.next_handle.wrapping_add(1);
        handle
    }

    /// Joins `central` and `peripheral` on a new link.
    fn establish(&self, central: &Arc<ControllerShared>, peripheral: &Arc<ControllerShared>) {
        let central_addr = central.lock().address;
        let peripheral_addr = peripheral.lock().address;
        let (Some(central_addr), Some(peripheral_addr)) = (central_addr, peripheral_addr) else {
            return;
        };
        {
            let mut air = self.lock();
            air.advertisers.remove(&peripheral_addr);
            air.pending
                .retain(|(_, waiting)| !Weak::ptr_eq(waiting, &Arc::downgrade(central)));
        }
        let handle = self.allocate_handle();

        {
            let mut state = peripheral.lock();
            state.advertising_generation = None;
            state.links.insert(handle, (central_addr, Arc::downgrade(central)));
        }
        {
            let mut state = central.lock();
            state.connect_attempt = None;
            state.links.insert(handle, (peripheral_addr, Arc::downgrade(peripheral)));
        }
        info!(
            "Simulated link {} <-> {} on handle {}",
            central_addr, peripheral_addr, handle.0
        );
        peripheral.emit(ControllerEvent::Connected {
            peer: central_addr,
            handle,
        });
        central.emit(ControllerEvent::Connected {
            peer: peripheral_addr,
            handle,
        });
    }
}

#[derive(Default)]
struct ControllerState {
    events: Option<mpsc::UnboundedSender<ControllerEvent>>,
    address: Option<BleAddress>,
    name: Option<String>,
    advertising_generation: Option<u64>,
    scan_generation: Option<u64>,
    connect_attempt: Option<(BleAddress, u64)>,
    next_generation: u64,
    links: BTreeMap<ConnectionHandle, (BleAddress, Weak<ControllerShared>)>,
    failures: HashMap<CommandKind, u32>,
    stalled: HashSet<CommandKind>,
    out_of_range: bool,
    sent: Vec<CommandKind>,
}

impl ControllerState {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct ControllerShared {
    port: String,
    api_version: u8,
    air: VirtualAir,
    state: Mutex<ControllerState>,
}

impl ControllerShared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ControllerEvent) {
        let events = self.lock().events.clone();
        match events {
            Some(events) => {
                let _ = events.send(event);
            }
            None => debug!("[{}] dropping event, port closed: {:?}", self.port, event),
        }
    }

    fn complete(&self, id: CommandId, result: Result<CommandResponse>) {
        self.emit(ControllerEvent::CommandComplete { id, result });
    }

    fn log(&self, message: String) {
        self.emit(ControllerEvent::Log {
            severity: Severity::Info,
            message,
        });
    }

    /// Drops every link this controller holds, telling each peer.
    fn drop_links(&self, reason: DisconnectReason) {
        let (own_address, links) = {
            let mut state = self.lock();
            (state.address, std::mem::take(&mut state.links))
        };
        for (handle, (_, peer)) in links {
            let Some(peer) = peer.upgrade() else { continue };
            peer.lock().links.remove(&handle);
            if let Some(address) = own_address {
                peer.emit(ControllerEvent::Disconnected {
                    peer: address,
                    handle,
                    reason,
                });
            }
        }
    }
}

/// A controller that lives in this process.
#[derive(Clone)]
pub struct SimulatedController {
    shared: Arc<ControllerShared>,
}

impl SimulatedController {
    pub fn new(port: impl Into<String>, api_version: u8, air: &VirtualAir) -> Self {
        Self {
            shared: Arc::new(ControllerShared {
                port: port.into(),
                api_version,
                air: air.clone(),
                state: Mutex::new(ControllerState::default()),
            }),
        }
    }

    /// Fails the next command of `kind` with firmware error `code`.
    pub fn fail_next(&self, kind: CommandKind, code: u32) {
        self.shared.lock().failures.insert(kind, code);
    }

    /// Accepts commands of `kind` without ever completing them.
    pub fn stall(&self, kind: CommandKind) {
        self.shared.lock().stalled.insert(kind);
    }

    /// While out of range, this controller's advertising reaches nobody.
    pub fn set_out_of_range(&self, out_of_range: bool) {
        self.shared.lock().out_of_range = out_of_range;
    }

    /// Emits an unsolicited firmware error.
    pub fn inject_error(&self, code: u32, message: impl Into<String>) {
        self.shared.emit(ControllerEvent::Error {
            code,
            message: message.into(),
        });
    }

    pub fn inject_log(&self, severity: Severity, message: impl Into<String>) {
        self.shared.emit(ControllerEvent::Log {
            severity,
            message: message.into(),
        });
    }

    /// Tears down the link on `handle` from the remote side.
    pub fn remote_disconnect(&self, handle: ConnectionHandle) {
        let link = self.shared.lock().links.remove(&handle);
        let Some((peer_address, peer)) = link else {
            return;
        };
        let own_address = self.shared.lock().address;
        if let (Some(peer), Some(own_address)) = (peer.upgrade(), own_address) {
            peer.lock().links.remove(&handle);
            peer.emit(ControllerEvent::Disconnected {
                peer: own_address,
                handle,
                reason: DisconnectReason::LocalHostTerminated,
            });
        }
        self.shared.emit(ControllerEvent::Disconnected {
            peer: peer_address,
            handle,
            reason: DisconnectReason::RemoteUserTerminated,
        });
    }

    /// Ends the event stream as if the serial port vanished.
    pub fn unplug(&self) {
        self.shared.lock().events = None;
    }

    /// Every command kind received so far, in order.
    pub fn sent_commands(&self) -> Vec<CommandKind> {
        self.shared.lock().sent.clone()
    }

    pub fn link_count(&self) -> usize {
        self.shared.lock().links.len()
    }

    fn start_advertising(&self, id: CommandId, timeout_secs: u16) {
        let shared = &self.shared;
        let (address, generation, out_of_range) = {
            let mut state = shared.lock();
            let generation = state.generation();
            state.advertising_generation = Some(generation);
            (state.address, generation, state.out_of_range)
        };
        shared.complete(id, Ok(CommandResponse::Ack));

        if let Some(address) = address.filter(|_| !out_of_range) {
            let waiting: Vec<Arc<ControllerShared>> = {
                let mut air = shared.air.lock();
                air.advertisers.insert(address, Arc::downgrade(shared));
                air.pending
                    .iter()
                    .filter(|(target, _)| *target == address)
                    .filter_map(|(_, central)| central.upgrade())
                    .collect()
            };
            if let Some(central) = waiting.first() {
                shared.air.establish(central, shared);
                return;
            }
        }

        if timeout_secs > 0 {
            let weak = Arc::downgrade(shared);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(timeout_secs))).await;
                let Some(shared) = weak.upgrade() else { return };
                let expired = {
                    let mut state = shared.lock();
                    let expired = state.advertising_generation == Some(generation);
                    if expired {
                        state.advertising_generation = None;
                    }
                    expired
                };
                if expired {
                    if let Some(address) = address {
                        shared.air.lock().advertisers.remove(&address);
                    }
                    shared.emit(ControllerEvent::Timeout(TimeoutSource::Advertising));
                }
            });
        }
    }

    fn stop_advertising(&self) {
        let address = {
            let mut state = self.shared.lock();
            state.advertising_generation = None;
            state.address
        };
        if let Some(address) = address {
            self.shared.air.lock().advertisers.remove(&address);
        }
    }

    fn start_scan(&self, id: CommandId, timeout_secs: u16) {
        let shared = &self.shared;
        let generation = {
            let mut state = shared.lock();
            let generation = state.generation();
            state.scan_generation = Some(generation);
            generation
        };
        shared.complete(id, Ok(CommandResponse::Ack));

        let advertisers: Vec<(BleAddress, Weak<ControllerShared>)> = shared
            .air
            .lock()
            .advertisers
            .iter()
            .map(|(address, controller)| (*address, controller.clone()))
            .collect();
        for (address, controller) in advertisers {
            let Some(controller) = controller.upgrade() else { continue };
            if Arc::ptr_eq(&controller, shared) {
                continue;
            }
            let name = controller.lock().name.clone();
            shared.emit(ControllerEvent::AdvertisingReport {
                address,
                name,
                rssi: SIMULATED_RSSI,
            });
        }

        if timeout_secs > 0 {
            let weak = Arc::downgrade(shared);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(timeout_secs))).await;
                let Some(shared) = weak.upgrade() else { return };
                let expired = {
                    let mut state = shared.lock();
                    let expired = state.scan_generation == Some(generation);
                    if expired {
                        state.scan_generation = None;
                    }
                    expired
                };
                if expired {
                    shared.emit(ControllerEvent::Timeout(TimeoutSource::Scan));
                }
            });
        }
    }

    fn connect(&self, id: CommandId, peer: BleAddress, timeout_secs: u16) {
        let shared = &self.shared;
        let generation = {
            let mut state = shared.lock();
            let generation = state.generation();
            state.connect_attempt = Some((peer, generation));
            generation
        };
        shared.complete(id, Ok(CommandResponse::Ack));

        let target = shared
            .air
            .lock()
            .advertisers
            .get(&peer)
            .and_then(Weak::upgrade);
        if let Some(peripheral) = target {
            shared.air.establish(shared, &peripheral);
            return;
        }

        debug!("[{}] {} not advertising yet, connect pending", shared.port, peer);
        shared.air.lock().pending.push((peer, Arc::downgrade(shared)));
        if timeout_secs > 0 {
            let weak = Arc::downgrade(shared);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(timeout_secs))).await;
                let Some(shared) = weak.upgrade() else { return };
                let expired = {
                    let mut state = shared.lock();
                    let expired = state
                        .connect_attempt
                        .is_some_and(|(_, attempt)| attempt == generation);
                    if expired {
                        state.connect_attempt = None;
                    }
                    expired
                };
                if expired {
                    shared
                        .air
                        .lock()
                        .pending
                        .retain(|(_, waiting)| !Weak::ptr_eq(waiting, &weak));
                    shared.emit(ControllerEvent::Timeout(TimeoutSource::Connection));
                }
            });
        }
    }

    fn disconnect(&self, id: CommandId, handle: ConnectionHandle) {
        let shared = &self.shared;
        shared.complete(id, Ok(CommandResponse::Ack));
        let (own_address, link) = {
            let mut state = shared.lock();
            (state.address, state.links.remove(&handle))
        };
        let Some((peer_address, peer)) = link else {
            return;
        };
        shared.emit(ControllerEvent::Disconnected {
            peer: peer_address,
            handle,
            reason: DisconnectReason::LocalHostTerminated,
        });
        if let (Some(peer), Some(own_address)) = (peer.upgrade(), own_address) {
            peer.lock().links.remove(&handle);
            peer.emit(ControllerEvent::Disconnected {
                peer: own_address,
                handle,
                reason: DisconnectReason::RemoteUserTerminated,
            });
        }
    }

    fn close(&self) {
        let shared = &self.shared;
        self.stop_advertising();
        shared
            .air
            .lock()
            .pending
            .retain(|(_, waiting)| !Weak::ptr_eq(waiting, &Arc::downgrade(shared)));
        shared.drop_links(DisconnectReason::SupervisionTimeout);

        let mut state = shared.lock();
        let sent = std::mem::take(&mut state.sent);
        let failures = std::mem::take(&mut state.failures);
        let stalled = std::mem::take(&mut state.stalled);
        let out_of_range = state.out_of_range;
        *state = ControllerState {
            sent,
            failures,
            stalled,
            out_of_range,
            ..ControllerState::default()
        };
        info!("[{}] port closed", shared.port);
    }
}

#[async_trait]
impl CommandSender for SimulatedController {
    async fn send_command(&self, id: CommandId, command: ControllerCommand) -> Result<()> {
        let kind = command.kind();
        let shared = &self.shared;
        let (injected, stalled) = {
            let mut state = shared.lock();
            if state.events.is_none() {
                return Err(BleError::Transport(format!("{} is not connected", shared.port)));
            }
            state.sent.push(kind);
            (state.failures.remove(&kind), state.stalled.contains(&kind))
        };
        debug!("[{}] <- {:?}", shared.port, command);

        if kind == CommandKind::Close {
            self.close();
            return Ok(());
        }
        if let Some(code) = injected {
            shared.complete(
                id,
                Err(BleError::Controller {
                    code,
                    message: format!("{kind} rejected by firmware"),
                }),
            );
            return Ok(());
        }
        if stalled {
            return Ok(());
        }

        match command {
            ControllerCommand::Open(config) => {
                shared.complete(id, Ok(CommandResponse::Ack));
                shared.log(format!("{} opened at {} baud", shared.port, config.baud_rate));
            }
            ControllerCommand::EnableRadioStack(_) => {
                shared.complete(
                    id,
                    Ok(CommandResponse::RadioEnabled(Capabilities {
                        api_version: shared.api_version,
                        app_ram_base: APP_RAM_BASE,
                    })),
                );
            }
            ControllerCommand::SetAddress(address) => {
                shared.lock().address = Some(address);
                shared.complete(id, Ok(CommandResponse::Ack));
            }
            ControllerCommand::SetName(name) => {
                shared.lock().name = Some(name);
                shared.complete(id, Ok(CommandResponse::Ack));
            }
            ControllerCommand::StartAdvertising(params) => {
                self.start_advertising(id, params.timeout_secs)
            }
            ControllerCommand::StopAdvertising => {
                self.stop_advertising();
                shared.complete(id, Ok(CommandResponse::Ack));
            }
            ControllerCommand::StartScan(params) => self.start_scan(id, params.timeout_secs),
            ControllerCommand::StopScan => {
                shared.lock().scan_generation = None;
                shared.complete(id, Ok(CommandResponse::Ack));
            }
            ControllerCommand::Connect {
                peer, scan_params, ..
            } => self.connect(id, peer, scan_params.timeout_secs),
            ControllerCommand::Disconnect(handle) => self.disconnect(id, handle),
            ControllerCommand::SetAdvertisingData { .. }
            | ControllerCommand::SetMaxPayloadSize(_) => {
                shared.complete(id, Ok(CommandResponse::Ack));
            }
            ControllerCommand::Close => {}
        }
        Ok(())
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().events = Some(tx);
        rx
    }
}

/// Enumerates a fixed set of simulated controllers on one shared air.
pub struct SimulatedEnumerator {
    air: VirtualAir,
    controllers: BTreeMap<String, SimulatedController>,
    handles: BTreeMap<String, AdapterHandle>,
    failure: Mutex<Option<String>>,
}

impl SimulatedEnumerator {
    pub fn new(count: usize, api_version: u8) -> Self {
        Self::with_command_timeout(count, api_version, DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_command_timeout(count: usize, api_version: u8, command_timeout: Duration) -> Self {
        let air = VirtualAir::new();
        let mut controllers = BTreeMap::new();
        let mut handles = BTreeMap::new();
        for index in 0..count {
            let port = format!("sim-{index}");
            let controller = SimulatedController::new(port.clone(), api_version, &air);
            let sender: Arc<dyn CommandSender> = Arc::new(controller.clone());
            handles.insert(
                port.clone(),
                AdapterHandle::with_command_timeout(port.clone(), sender, command_timeout),
            );
            controllers.insert(port, controller);
        }
        Self {
            air,
            controllers,
            handles,
            failure: Mutex::new(None),
        }
    }

    pub fn air(&self) -> &VirtualAir {
        &self.air
    }

    pub fn controller(&self, instance_id: &str) -> Option<&SimulatedController> {
        self.controllers.get(instance_id)
    }

    pub fn handle(&self, instance_id: &str) -> Option<&AdapterHandle> {
        self.handles.get(instance_id)
    }

    /// Makes the next `list_adapters` call fail as if probing broke.
    pub fn fail_next_probe(&self, reason: impl Into<String>) {
        *self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reason.into());
    }
}

#[async_trait]
impl AdapterEnumerator for SimulatedEnumerator {
    async fn list_adapters(&self) -> Result<BTreeMap<String, AdapterHandle>> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(reason) = failure {
            return Err(BleError::Enumeration(reason));
        }
        info!("Found {} simulated adapter(s)", self.handles.len());
        Ok(self.handles.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::{AddressType, TransportConfig};

    fn address(text: &str) -> BleAddress {
        BleAddress::parse(text, AddressType::RandomStatic).unwrap()
    }

    async fn send(controller: &SimulatedController, id: u64, command: ControllerCommand) {
        controller.send_command(CommandId(id), command).await.unwrap();
    }

    #[tokio::test]
    async fn commands_complete_before_their_effects() {
        let air = VirtualAir::new();
        let central = SimulatedController::new("c", 5, &air);
        let peripheral = SimulatedController::new("p", 5, &air);
        let mut central_events = central.subscribe_events();
        let mut peripheral_events = peripheral.subscribe_events();

        send(&peripheral, 0, ControllerCommand::SetAddress(address("FF:11:22:33:AA:CE"))).await;
        send(&central, 0, ControllerCommand::SetAddress(address("FF:11:22:33:AA:CF"))).await;
        send(
            &peripheral,
            1,
            ControllerCommand::StartAdvertising(Default::default()),
        )
        .await;
        send(
            &central,
            1,
            ControllerCommand::Connect {
                peer: address("FF:11:22:33:AA:CE"),
                scan_params: Default::default(),
                conn_params: Default::default(),
            },
        )
        .await;

        let mut central_seen = Vec::new();
        while let Ok(event) = central_events.try_recv() {
            central_seen.push(event);
        }
        assert!(matches!(
            central_seen[1],
            ControllerEvent::CommandComplete { id: CommandId(1), .. }
        ));
        assert!(matches!(
            central_seen[2],
            ControllerEvent::Connected { peer, .. } if peer == address("FF:11:22:33:AA:CE")
        ));

        let mut peripheral_seen = Vec::new();
        while let Ok(event) = peripheral_events.try_recv() {
            peripheral_seen.push(event);
        }
        assert!(matches!(
            peripheral_seen.last(),
            Some(ControllerEvent::Connected { peer, .. }) if *peer == address("FF:11:22:33:AA:CF")
        ));
        assert!(air.advertisers().is_empty());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let air = VirtualAir::new();
        let controller = SimulatedController::new("c", 5, &air);
        let mut events = controller.subscribe_events();
        controller.fail_next(CommandKind::Open, 0x13);

        send(&controller, 0, ControllerCommand::Open(TransportConfig::default())).await;
        send(&controller, 1, ControllerCommand::Open(TransportConfig::default())).await;

        assert!(matches!(
            events.try_recv(),
            Ok(ControllerEvent::CommandComplete { result: Err(BleError::Controller { code: 0x13, .. }), .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(ControllerEvent::CommandComplete { result: Ok(_), .. })
        ));
    }

    #[tokio::test]
    async fn commands_without_a_stream_fail() {
        let controller = SimulatedController::new("c", 5, &VirtualAir::new());
        let result = controller
            .send_command(CommandId(0), ControllerCommand::StopScan)
            .await;
        assert!(matches!(result, Err(BleError::Transport(_))));
        assert!(controller.sent_commands().is_empty());
    }
}
