mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use ble_link_coordinator_lib::core::bluetooth::{
    AdapterEvent, AdapterHandle, AdvertisingData, AdvertisingParams, BleError, CommandId,
    CommandKind, CommandResponse, CommandSender, ConfigurationState, ConnectionHandle,
    ConnectionParams, ControllerCommand, ControllerEvent, DisconnectReason, EnableOptions,
    ErrorKind, EventKind, RoleAction, ScanParams, TransportConfig, ERROR_INVALID_PARAM,
    ERROR_TIMEOUT,
};
use ble_link_coordinator_lib::core::SimulatedEnumerator;

use common::*;

#[tokio::test]
async fn configuration_advances_one_state_at_a_time() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    let mut status = adapter.events().subscribe(EventKind::StatusChanged);

    assert_eq!(adapter.configuration_state(), ConfigurationState::Closed);
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;

    let states: Vec<ConfigurationState> = drain(&mut status)
        .into_iter()
        .filter_map(|event| match event {
            AdapterEvent::StatusChanged(status) => Some(status.state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConfigurationState::Opened,
            ConfigurationState::RadioEnabled,
            ConfigurationState::Addressed,
            ConfigurationState::Named,
            ConfigurationState::Ready,
        ]
    );

    let state = adapter.get_state();
    assert_eq!(state.address, Some(address(PERIPHERAL_ADDRESS)));
    assert_eq!(state.name.as_deref(), Some("peripheralAdapter"));
    assert_eq!(state.capabilities.map(|c| c.api_version), Some(5));
}

#[tokio::test]
async fn out_of_order_commands_fail_without_reaching_the_controller() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    let controller = sim.controller("sim-0").unwrap();

    let err = adapter
        .start_advertising(AdvertisingParams::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_state(), "{err}");
    assert!(controller.sent_commands().is_empty());

    adapter.open(TransportConfig::default()).await.unwrap();
    let peer = address(CENTRAL_ADDRESS);
    let results = [
        adapter.set_address(peer).await,
        adapter.set_name("too early").await,
        adapter
            .set_advertising_payload(&AdvertisingData::default(), &AdvertisingData::default())
            .await,
        adapter.start_advertising(AdvertisingParams::default()).await,
        adapter.start_scan(ScanParams::default()).await,
        adapter
            .connect(peer, ScanParams::default(), ConnectionParams::default())
            .await,
        adapter.set_max_payload_size(54).await,
        adapter.open(TransportConfig::default()).await,
    ];
    for result in results {
        assert!(matches!(result, Err(BleError::InvalidState { .. })), "{result:?}");
    }

    assert_eq!(controller.sent_commands(), vec![CommandKind::Open]);
    assert_eq!(adapter.configuration_state(), ConfigurationState::Opened);
    assert_eq!(adapter.role_action(), RoleAction::None);
}

#[tokio::test]
async fn peripheral_advertises_without_errors() {
    let sim = pair(5);
    let peripheral = sim.handle("sim-1").unwrap();
    let mut errors = peripheral.events().subscribe(EventKind::Error);

    bring_to_ready(peripheral, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    start_advertising(peripheral).await;

    assert_eq!(peripheral.role_action(), RoleAction::Advertising);
    assert!(drain(&mut errors).is_empty());
    assert_eq!(sim.air().advertisers(), vec![address(PERIPHERAL_ADDRESS)]);
}

#[tokio::test]
async fn connect_while_advertising_is_rejected() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    start_advertising(adapter).await;

    let err = adapter
        .connect(
            address(CENTRAL_ADDRESS),
            ScanParams::default(),
            ConnectionParams::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_invalid_state());
    assert_eq!(adapter.role_action(), RoleAction::Advertising);
    assert!(!sim
        .controller("sim-0")
        .unwrap()
        .sent_commands()
        .contains(&CommandKind::Connect));
}

#[tokio::test]
async fn second_start_advertising_fails_and_changes_nothing() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    start_advertising(adapter).await;
    let before = adapter.get_state();

    let err = adapter
        .start_advertising(AdvertisingParams::default())
        .await
        .unwrap_err();

    assert!(err.is_invalid_state());
    assert_eq!(adapter.get_state(), before);
}

#[tokio::test]
async fn advertising_needs_a_staged_payload() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;

    let err = adapter
        .start_advertising(AdvertisingParams::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_state());

    let oversized = AdvertisingData {
        complete_local_name: Some("x".repeat(40)),
        ..AdvertisingData::default()
    };
    let err = adapter
        .set_advertising_payload(&oversized, &AdvertisingData::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BleError::InvalidParameter(_)));
}

#[tokio::test]
async fn stop_advertising_clears_role_action() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    assert!(adapter.stop_advertising().await.unwrap_err().is_invalid_state());

    start_advertising(adapter).await;
    adapter.stop_advertising().await.unwrap();

    assert_eq!(adapter.role_action(), RoleAction::None);
    assert!(sim.air().advertisers().is_empty());
}

#[tokio::test]
async fn firmware_rejection_leaves_state_unchanged() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    let controller = sim.controller("sim-0").unwrap();
    adapter.open(TransportConfig::default()).await.unwrap();
    adapter
        .enable_radio_stack(EnableOptions::default())
        .await
        .unwrap();
    adapter
        .set_address(address(CENTRAL_ADDRESS))
        .await
        .unwrap();

    controller.fail_next(CommandKind::SetName, ERROR_INVALID_PARAM);
    let err = adapter.set_name("centralAdapter").await.unwrap_err();
    assert_eq!(
        err,
        BleError::Controller {
            code: ERROR_INVALID_PARAM,
            message: "set_name rejected by firmware".into(),
        }
    );
    assert_eq!(adapter.configuration_state(), ConfigurationState::Addressed);

    adapter.set_name("centralAdapter").await.unwrap();
    assert_eq!(adapter.configuration_state(), ConfigurationState::Ready);
}

#[tokio::test]
async fn bad_arguments_are_rejected_on_the_host() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    let controller = sim.controller("sim-0").unwrap();
    adapter.open(TransportConfig::default()).await.unwrap();
    adapter
        .enable_radio_stack(EnableOptions::default())
        .await
        .unwrap();

    // Random static addresses need the two top bits set.
    let untagged = ble_link_coordinator_lib::core::bluetooth::BleAddress::parse(
        "3F:11:22:33:AA:CE",
        ble_link_coordinator_lib::core::bluetooth::AddressType::RandomStatic,
    )
    .unwrap();
    let err = adapter.set_address(untagged).await.unwrap_err();
    assert!(matches!(err, BleError::InvalidParameter(_)));
    assert_eq!(adapter.configuration_state(), ConfigurationState::RadioEnabled);

    adapter
        .set_address(address(CENTRAL_ADDRESS))
        .await
        .unwrap();
    let err = adapter.set_name(&"n".repeat(249)).await.unwrap_err();
    assert!(matches!(err, BleError::InvalidParameter(_)));
    assert!(!controller.sent_commands().contains(&CommandKind::SetName));
}

#[tokio::test]
async fn busy_adapter_fails_fast_and_close_aborts_the_command() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap().clone();
    let controller = sim.controller("sim-0").unwrap().clone();
    controller.stall(CommandKind::EnableRadioStack);
    adapter.open(TransportConfig::default()).await.unwrap();

    let pending = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.enable_radio_stack(EnableOptions::default()).await }
    });
    settle(|| controller.sent_commands().contains(&CommandKind::EnableRadioStack)).await;

    let err = adapter
        .enable_radio_stack(EnableOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_invalid_state(), "{err}");

    let mut status = adapter.events().subscribe(EventKind::StatusChanged);
    adapter.close().await.unwrap();

    let outcome = pending.await.unwrap();
    assert_eq!(outcome, Err(BleError::Aborted("enable_radio_stack")));
    assert_eq!(adapter.configuration_state(), ConfigurationState::Closed);
    assert!(matches!(
        drain(&mut status).last(),
        Some(AdapterEvent::StatusChanged(s)) if s.state == ConfigurationState::Closed
    ));
}

/// Controller that accepts commands but completes them only on `release`.
#[derive(Default)]
struct HeldCompletions {
    events: Mutex<Option<mpsc::UnboundedSender<ControllerEvent>>>,
    held: Mutex<Vec<CommandId>>,
}

impl HeldCompletions {
    fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    fn release(&self) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        let events = self.events.lock().unwrap();
        let tx = events.as_ref().unwrap();
        for id in held {
            tx.send(ControllerEvent::CommandComplete {
                id,
                result: Ok(CommandResponse::Ack),
            })
            .unwrap();
        }
    }
}

#[async_trait]
impl CommandSender for HeldCompletions {
    async fn send_command(&self, id: CommandId, _command: ControllerCommand) -> Result<(), BleError> {
        self.held.lock().unwrap().push(id);
        Ok(())
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        rx
    }
}

#[tokio::test]
async fn second_open_leaves_the_first_one_running() {
    let controller = Arc::new(HeldCompletions::default());
    let adapter =
        AdapterHandle::with_command_timeout("held-0", controller.clone(), Duration::from_secs(2));

    let first = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.open(TransportConfig::default()).await }
    });
    settle(|| controller.held() == 1).await;

    let err = adapter.open(TransportConfig::default()).await.unwrap_err();
    assert!(err.is_invalid_state(), "{err}");
    assert_eq!(controller.held(), 1);

    controller.release();
    assert_eq!(first.await.unwrap(), Ok(()));
    assert_eq!(adapter.configuration_state(), ConfigurationState::Opened);
}

#[tokio::test]
async fn unanswered_command_times_out() {
    let sim = SimulatedEnumerator::with_command_timeout(1, 5, Duration::from_millis(50));
    let adapter = sim.handle("sim-0").unwrap();
    sim.controller("sim-0").unwrap().stall(CommandKind::Open);

    let err = adapter.open(TransportConfig::default()).await.unwrap_err();

    assert!(matches!(err, BleError::Timeout(_)), "{err}");
    assert_eq!(adapter.configuration_state(), ConfigurationState::Closed);
}

#[tokio::test]
async fn max_payload_size_is_capability_gated() {
    let old = pair(2);
    let adapter = old.handle("sim-0").unwrap();
    bring_to_ready(adapter, CENTRAL_ADDRESS, "centralAdapter").await;
    adapter.set_max_payload_size(54).await.unwrap();
    assert_eq!(adapter.get_state().max_payload_size, None);
    assert!(!old
        .controller("sim-0")
        .unwrap()
        .sent_commands()
        .contains(&CommandKind::SetMaxPayloadSize));

    let new = pair(5);
    let adapter = new.handle("sim-0").unwrap();
    bring_to_ready(adapter, CENTRAL_ADDRESS, "centralAdapter").await;
    let err = adapter.set_max_payload_size(300).await.unwrap_err();
    assert!(matches!(err, BleError::InvalidParameter(_)));
    adapter.set_max_payload_size(54).await.unwrap();
    assert_eq!(adapter.get_state().max_payload_size, Some(54));
}

#[tokio::test]
async fn scanning_reports_advertisers() {
    let sim = pair(5);
    let central = sim.handle("sim-0").unwrap();
    let peripheral = sim.handle("sim-1").unwrap();
    bring_to_ready(peripheral, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    bring_to_ready(central, CENTRAL_ADDRESS, "centralAdapter").await;
    start_advertising(peripheral).await;

    let mut discovered = central.events().subscribe(EventKind::DeviceDiscovered);
    central.start_scan(ScanParams::default()).await.unwrap();
    assert_eq!(central.role_action(), RoleAction::Scanning);
    assert!(central
        .start_scan(ScanParams::default())
        .await
        .unwrap_err()
        .is_invalid_state());

    let event = tokio::time::timeout(Duration::from_secs(1), discovered.recv())
        .await
        .unwrap();
    match event {
        Some(AdapterEvent::DeviceDiscovered(device)) => {
            assert_eq!(device.address, address(PERIPHERAL_ADDRESS));
            assert!(device.name_contains("peripheral"));
            assert!(device.rssi.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }

    central.stop_scan().await.unwrap();
    assert_eq!(central.role_action(), RoleAction::None);
}

#[tokio::test]
async fn unanswered_connect_times_out_with_error_event() {
    let sim = pair(5);
    let central = sim.handle("sim-0").unwrap();
    bring_to_ready(central, CENTRAL_ADDRESS, "centralAdapter").await;
    let mut errors = central.events().subscribe(EventKind::Error);

    let scan = ScanParams {
        timeout_secs: 1,
        ..ScanParams::default()
    };
    central
        .connect(address(PERIPHERAL_ADDRESS), scan, ConnectionParams::default())
        .await
        .unwrap();
    assert_eq!(
        central.get_state().connecting_to,
        Some(address(PERIPHERAL_ADDRESS))
    );
    assert!(central
        .connect(address(PERIPHERAL_ADDRESS), scan, ConnectionParams::default())
        .await
        .unwrap_err()
        .is_invalid_state());

    let event = tokio::time::timeout(Duration::from_secs(3), errors.recv())
        .await
        .unwrap();
    match event {
        Some(AdapterEvent::Error(detail)) => {
            assert_eq!(detail.kind, ErrorKind::Timeout);
            assert_eq!(detail.code, ERROR_TIMEOUT);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(central.get_state().connecting_to, None);
}

#[tokio::test]
async fn advertising_timeout_clears_role_action() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    bring_to_ready(adapter, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    adapter
        .set_advertising_payload(&AdvertisingData::default(), &AdvertisingData::default())
        .await
        .unwrap();
    let mut status = adapter.events().subscribe(EventKind::StatusChanged);
    adapter
        .start_advertising(AdvertisingParams {
            interval_ms: 100.0,
            timeout_secs: 1,
        })
        .await
        .unwrap();

    let cleared = tokio::time::timeout(Duration::from_secs(3), async {
        while let Some(event) = status.recv().await {
            if let AdapterEvent::StatusChanged(s) = event {
                if s.role_action == RoleAction::None {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(cleared);
    assert!(sim.air().advertisers().is_empty());
}

async fn linked_pair(sim: &SimulatedEnumerator) -> ConnectionHandle {
    let central = sim.handle("sim-0").unwrap();
    let peripheral = sim.handle("sim-1").unwrap();
    bring_to_ready(peripheral, PERIPHERAL_ADDRESS, "peripheralAdapter").await;
    bring_to_ready(central, CENTRAL_ADDRESS, "centralAdapter").await;
    start_advertising(peripheral).await;

    let mut connected = central.events().subscribe(EventKind::DeviceConnected);
    central
        .connect(
            address(PERIPHERAL_ADDRESS),
            ScanParams::default(),
            ConnectionParams::default(),
        )
        .await
        .unwrap();
    match tokio::time::timeout(Duration::from_secs(1), connected.recv())
        .await
        .unwrap()
    {
        Some(AdapterEvent::DeviceConnected(device)) => device.connection_handle.unwrap(),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn connecting_stops_advertising() {
    let sim = pair(5);
    linked_pair(&sim).await;
    let peripheral = sim.handle("sim-1").unwrap();

    settle(|| peripheral.role_action() == RoleAction::None).await;
    assert_eq!(peripheral.get_state().connections.len(), 1);
    assert_eq!(sim.handle("sim-0").unwrap().get_state().connecting_to, None);
}

#[tokio::test]
async fn disconnect_reaches_both_sides() {
    let sim = pair(5);
    let handle = linked_pair(&sim).await;
    let central = sim.handle("sim-0").unwrap();
    let peripheral = sim.handle("sim-1").unwrap();
    let mut central_down = central.events().subscribe(EventKind::DeviceDisconnected);
    let mut peripheral_down = peripheral.events().subscribe(EventKind::DeviceDisconnected);

    assert!(central
        .disconnect(ConnectionHandle(handle.0 + 7))
        .await
        .unwrap_err()
        .is_invalid_state());
    central.disconnect(handle).await.unwrap();

    let local = tokio::time::timeout(Duration::from_secs(1), central_down.recv())
        .await
        .unwrap();
    assert!(matches!(
        local,
        Some(AdapterEvent::DeviceDisconnected { reason: DisconnectReason::LocalHostTerminated, .. })
    ));
    let remote = tokio::time::timeout(Duration::from_secs(1), peripheral_down.recv())
        .await
        .unwrap();
    assert!(matches!(
        remote,
        Some(AdapterEvent::DeviceDisconnected { device, reason: DisconnectReason::RemoteUserTerminated })
            if device.address == address(CENTRAL_ADDRESS)
    ));
    assert!(central.get_state().connections.is_empty());
}

#[tokio::test]
async fn link_dropped_by_the_peer_is_reported_on_both_sides() {
    let sim = pair(5);
    let handle = linked_pair(&sim).await;
    let central = sim.handle("sim-0").unwrap();
    let peripheral = sim.handle("sim-1").unwrap();
    let mut central_down = central.events().subscribe(EventKind::DeviceDisconnected);
    let mut peripheral_down = peripheral.events().subscribe(EventKind::DeviceDisconnected);

    sim.controller("sim-1").unwrap().remote_disconnect(handle);
    assert_eq!(sim.controller("sim-0").unwrap().link_count(), 0);
    assert_eq!(sim.controller("sim-1").unwrap().link_count(), 0);

    let dropped = tokio::time::timeout(Duration::from_secs(1), peripheral_down.recv())
        .await
        .unwrap();
    assert!(matches!(
        dropped,
        Some(AdapterEvent::DeviceDisconnected { device, reason: DisconnectReason::RemoteUserTerminated })
            if device.address == address(CENTRAL_ADDRESS)
    ));
    let initiated = tokio::time::timeout(Duration::from_secs(1), central_down.recv())
        .await
        .unwrap();
    assert!(matches!(
        initiated,
        Some(AdapterEvent::DeviceDisconnected { reason: DisconnectReason::LocalHostTerminated, .. })
    ));
    settle(|| central.get_state().connections.is_empty()).await;
    assert!(peripheral.get_state().connections.is_empty());
}

#[tokio::test]
async fn close_reports_open_links_and_allows_reopening() {
    let sim = pair(5);
    let handle = linked_pair(&sim).await;
    let central = sim.handle("sim-0").unwrap();
    let peripheral = sim.handle("sim-1").unwrap();
    let mut central_down = central.events().subscribe(EventKind::DeviceDisconnected);
    let mut peripheral_down = peripheral.events().subscribe(EventKind::DeviceDisconnected);

    central.close().await.unwrap();

    assert_eq!(
        drain(&mut central_down),
        vec![AdapterEvent::DeviceDisconnected {
            device: ble_link_coordinator_lib::core::bluetooth::Device::connected(
                address(PERIPHERAL_ADDRESS),
                handle
            ),
            reason: DisconnectReason::AdapterClosed,
        }]
    );
    let remote = tokio::time::timeout(Duration::from_secs(1), peripheral_down.recv())
        .await
        .unwrap();
    assert!(matches!(
        remote,
        Some(AdapterEvent::DeviceDisconnected { reason: DisconnectReason::SupervisionTimeout, .. })
    ));

    let state = central.get_state();
    assert_eq!(state.state, ConfigurationState::Closed);
    assert_eq!(state.address, None);
    assert!(state.connections.is_empty());

    bring_to_ready(central, CENTRAL_ADDRESS, "centralAdapter").await;
    assert_eq!(central.configuration_state(), ConfigurationState::Ready);
}

#[tokio::test]
async fn lost_transport_is_reported_and_fails_later_commands() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    adapter.open(TransportConfig::default()).await.unwrap();
    let mut errors = adapter.events().subscribe(EventKind::Error);

    sim.controller("sim-0").unwrap().unplug();

    let event = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap();
    assert!(matches!(
        event,
        Some(AdapterEvent::Error(detail)) if detail.kind == ErrorKind::Transport
    ));
    let err = adapter
        .enable_radio_stack(EnableOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BleError::Transport(_)));
}

#[tokio::test]
async fn controller_logs_become_log_events() {
    let sim = pair(5);
    let adapter = sim.handle("sim-0").unwrap();
    let mut logs = adapter.events().subscribe(EventKind::LogMessage);

    adapter.open(TransportConfig::default()).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), logs.recv())
        .await
        .unwrap();
    assert!(matches!(
        event,
        Some(AdapterEvent::LogMessage { message, .. }) if message.contains("opened")
    ));
}
