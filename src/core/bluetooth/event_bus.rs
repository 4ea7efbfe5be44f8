//! Per-adapter event multiplexer.
//!
//! Observers register for a subset of [`EventKind`]s and receive every later
//! event of those kinds, in the order the adapter published them. Callback
//! observers implement [`EventObserver`]; stream observers come from
//! [`EventBus::subscribe`] and deregister when dropped.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures_util::Stream;
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::core::bluetooth::events::{AdapterEvent, EventKind, EventKindSet};

/// Receives events synchronously, on the adapter's delivery path.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &AdapterEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&AdapterEvent) + Send + Sync,
{
    fn on_event(&self, event: &AdapterEvent) {
        self(event)
    }
}

/// Registration token returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct Entry {
    id: ObserverId,
    kinds: EventKindSet,
    observer: Arc<dyn EventObserver>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panicking observer must not take the whole bus down with it.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers `observer` for `kinds`. Takes effect from the next published event.
    pub fn register(
        &self,
        kinds: impl Into<EventKindSet>,
        observer: Arc<dyn EventObserver>,
    ) -> ObserverId {
        let mut registry = self.registry();
        let id = ObserverId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            kinds: kinds.into(),
            observer,
        });
        id
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn deregister(&self, id: ObserverId) -> bool {
        let mut registry = self.registry();
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        registry.entries.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.registry().entries.len()
    }

    /// Opens a stream of events of the given kinds.
    pub fn subscribe(&self, kinds: impl Into<EventKindSet>) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let forward = move |event: &AdapterEvent| {
            // The receiver side deregisters on drop; a send racing that is harmless.
            let _ = tx.send(event.clone());
        };
        let id = self.register(kinds, Arc::new(forward));
        EventSubscription {
            id,
            bus: self.clone(),
            rx,
        }
    }

    /// Resolves with the next event of `kind`. The subscription is taken
    /// when this is called, not when the future is first polled.
    pub fn once(&self, kind: EventKind) -> impl Future<Output = Option<AdapterEvent>> + Send + use<> {
        let mut subscription = self.subscribe(kind);
        async move { subscription.recv().await }
    }

    /// Delivers `event` to every observer registered for its kind and
    /// returns how many received it.
    ///
    /// Observers are snapshotted under the registry lock and called after it
    /// is released, so a callback may register or deregister observers; the
    /// change applies from the next event.
    pub fn publish(&self, event: &AdapterEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Arc<dyn EventObserver>> = self
            .registry()
            .entries
            .iter()
            .filter(|entry| entry.kinds.contains(kind))
            .map(|entry| entry.observer.clone())
            .collect();

        if targets.is_empty() && kind == EventKind::Error {
            warn!("Error event published with no observers: {:?}", event);
        }
        for observer in &targets {
            observer.on_event(event);
        }
        debug!("Delivered {:?} to {} observer(s)", kind, targets.len());
        targets.len()
    }
}

/// Stream of events from one bus. Dropping it deregisters.
pub struct EventSubscription {
    id: ObserverId,
    bus: EventBus,
    rx: mpsc::UnboundedReceiver<AdapterEvent>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<AdapterEvent> {
        self.rx.recv().await
    }

    /// Returns an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<AdapterEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventSubscription {
    type Item = AdapterEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.bus.deregister(self.id);
    }
}
