use std::io::Write;
use std::sync::Arc;

use chrono::Local;
use log::{debug, error, info, log, Level};

use crate::core::bluetooth::{AdapterEvent, AdapterHandle, EventKindSet, EventObserver, ObserverId, Role};

/// Installs the process logger. `RUST_LOG` overrides `default_filter`.
///
/// Returns false if a logger was already installed.
pub fn init_logging(default_filter: &str) -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}

/// Event sink that writes every adapter event through the `log` facade,
/// prefixed with the adapter's role.
pub struct LogEventObserver {
    prefix: &'static str,
}

impl LogEventObserver {
    pub fn new(role: Role) -> Self {
        Self {
            prefix: role.log_prefix(),
        }
    }

    /// Registers a new observer for every event kind on `adapter`.
    pub fn attach(role: Role, adapter: &AdapterHandle) -> ObserverId {
        adapter
            .events()
            .register(EventKindSet::all(), Arc::new(Self::new(role)))
    }
}

impl EventObserver for LogEventObserver {
    fn on_event(&self, event: &AdapterEvent) {
        match event {
            AdapterEvent::LogMessage { severity, message } => {
                let level: Level = (*severity).into();
                log!(level, "{} {}", self.prefix, message);
            }
            AdapterEvent::StatusChanged(status) => match serde_json::to_string(status) {
                Ok(json) => info!("{} status {}", self.prefix, json),
                Err(e) => error!("{} failed to serialize status: {}", self.prefix, e),
            },
            AdapterEvent::Error(detail) => error!(
                "{} {:?} error {:#06x}: {}",
                self.prefix, detail.kind, detail.code, detail.message
            ),
            AdapterEvent::DeviceConnected(device) => {
                info!("{} connected to {}", self.prefix, device.address)
            }
            AdapterEvent::DeviceDisconnected { device, reason } => {
                info!("{} disconnected from {}: {:?}", self.prefix, device.address, reason)
            }
            AdapterEvent::DeviceDiscovered(device) => debug!(
                "{} discovered {} {:?} rssi {:?}",
                self.prefix, device.address, device.name, device.rssi
            ),
        }
    }
}
