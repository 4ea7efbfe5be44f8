#![allow(dead_code)]

use std::time::Duration;

use ble_link_coordinator_lib::config::AppConfig;
use ble_link_coordinator_lib::core::bluetooth::{
    AdapterEvent, AdapterHandle, AddressType, AdvertisingData, AdvertisingParams, BleAddress,
    EnableOptions, EventSubscription, TransportConfig,
};
use ble_link_coordinator_lib::core::SimulatedEnumerator;

pub const PERIPHERAL_ADDRESS: &str = "FF:11:22:33:AA:CE";
pub const CENTRAL_ADDRESS: &str = "FF:11:22:33:AA:CF";

pub fn address(text: &str) -> BleAddress {
    BleAddress::parse(text, AddressType::RandomStatic).unwrap()
}

/// Two simulated controllers with firmware API `api_version`.
pub fn pair(api_version: u8) -> SimulatedEnumerator {
    SimulatedEnumerator::new(2, api_version)
}

/// Runs the configuration sequence by hand up to Ready.
pub async fn bring_to_ready(adapter: &AdapterHandle, addr: &str, name: &str) {
    adapter.open(TransportConfig::default()).await.unwrap();
    adapter
        .enable_radio_stack(EnableOptions::default())
        .await
        .unwrap();
    adapter.set_address(address(addr)).await.unwrap();
    adapter.set_name(name).await.unwrap();
}

pub async fn start_advertising(adapter: &AdapterHandle) {
    adapter
        .set_advertising_payload(
            &AdvertisingData::with_tx_power(20),
            &AdvertisingData::default(),
        )
        .await
        .unwrap();
    adapter
        .start_advertising(AdvertisingParams::default())
        .await
        .unwrap();
}

/// Every event already delivered to `subscription`.
pub fn drain(subscription: &mut EventSubscription) -> Vec<AdapterEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push(event);
    }
    events
}

/// Lets spawned tasks run until `done` holds, or panics after a second.
pub async fn settle(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub fn fast_config() -> AppConfig {
    AppConfig {
        link_timeout_secs: 2,
        ..AppConfig::default()
    }
}
