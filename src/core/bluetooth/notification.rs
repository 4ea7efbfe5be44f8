//! Notification handling for one adapter
//! This module runs the task that drains a controller's event stream and
//! applies each event to the adapter it belongs to.

use std::sync::Weak;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::AdapterInner;
use crate::core::bluetooth::commands::ControllerEvent;

/// Event pump for a single open adapter
pub(super) struct NotificationHandler;

impl NotificationHandler {
    /// Start processing `events` until `cancel_token` fires or the stream ends.
    pub(super) fn spawn(
        adapter: Weak<AdapterInner>,
        events: mpsc::UnboundedReceiver<ControllerEvent>,
        cancel_token: CancellationToken,
    ) {
        tokio::spawn(Self::process_notifications(adapter, events, cancel_token));
    }

    async fn process_notifications(
        adapter: Weak<AdapterInner>,
        mut events: mpsc::UnboundedReceiver<ControllerEvent>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    debug!("Notification pump cancelled");
                    break;
                }
                event = events.recv() => {
                    let Some(adapter) = adapter.upgrade() else {
                        debug!("Adapter dropped, stopping notification pump");
                        break;
                    };
                    match event {
                        Some(event) => {
                            // close() may have run while we waited.
                            if cancel_token.is_cancelled() {
                                break;
                            }
                            adapter.handle_controller_event(event, &cancel_token);
                        }
                        None => {
                            info!("[{}] controller event stream ended", adapter.instance_id());
                            adapter.transport_lost(&cancel_token);
                            break;
                        }
                    }
                }
            }
        }
    }
}
