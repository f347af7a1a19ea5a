use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use super::event_types::AppEvent;

const BUS_CAPACITY: usize = 1024;

/// Soft cap on handlers per event name before a leak warning is logged.
pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Envelope published to async subscribers for every emitted event.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub seq: i64,
    pub name: String,
    pub category: String,
    pub event: AppEvent,
    pub created_at: String,
}

pub type Handler = Arc<dyn Fn(&AppEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    handler: Handler,
    once: bool,
}

type ListenerMap = HashMap<String, Vec<Listener>>;

/// Handle returned by [`EventBus::on`]. Dropping it leaves the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    listeners: Weak<Mutex<ListenerMap>>,
    event: String,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns false if the handler was already removed or the bus is gone.
    pub fn unsubscribe(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        let mut guard = listeners.lock().expect("event bus mutex poisoned");
        remove_listener(&mut guard, &self.event, self.id)
    }
}

pub struct EventBus {
    listeners: Arc<Mutex<ListenerMap>>,
    next_id: AtomicU64,
    max_listeners: usize,
    tx: broadcast::Sender<BusEvent>,
    seq: AtomicI64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_max_listeners(DEFAULT_MAX_LISTENERS)
    }

    pub fn with_max_listeners(max_listeners: usize) -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            max_listeners,
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Register a handler invoked synchronously on every emit of `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(handler), false)
    }

    /// Register a handler that is removed before its first invocation.
    pub fn once<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(handler), true)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock().expect("event bus mutex poisoned");
        remove_listener(&mut guard, event, id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        let guard = self.listeners.lock().expect("event bus mutex poisoned");
        guard.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Dispatch `event` to its handlers in registration order, then publish it
    /// to async subscribers.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers still
    /// run. Handlers are invoked without the registry lock held, so they may
    /// register, remove, or emit.
    pub fn emit(&self, event: AppEvent) -> BusEvent {
        let name = event.name();
        for handler in self.take_handlers(name) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                tracing::error!(
                    event = name,
                    "event handler panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        let envelope = BusEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            category: event.category().to_string(),
            event,
            created_at: Utc::now().to_rfc3339(),
        };
        if self.tx.send(envelope.clone()).is_err() {
            tracing::trace!(event = name, "no async subscribers for bus event");
        }
        envelope
    }

    /// Get a new receiver for every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    fn register(&self, event: String, handler: Handler, once: bool) -> Subscription {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.listeners.lock().expect("event bus mutex poisoned");
        let list = guard.entry(event.clone()).or_default();
        list.push(Listener { id, handler, once });
        if list.len() > self.max_listeners {
            tracing::warn!(
                event = %event,
                count = list.len(),
                max = self.max_listeners,
                "possible event handler leak: listener count exceeds soft cap"
            );
        }

        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            event,
            id,
        }
    }

    fn take_handlers(&self, event: &str) -> Vec<Handler> {
        let mut guard = self.listeners.lock().expect("event bus mutex poisoned");
        let Some(list) = guard.get_mut(event) else {
            return Vec::new();
        };
        let handlers = list.iter().map(|l| l.handler.clone()).collect();
        list.retain(|l| !l.once);
        let empty = list.is_empty();
        if empty {
            guard.remove(event);
        }
        handlers
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_listener(map: &mut ListenerMap, event: &str, id: ListenerId) -> bool {
    let Some(list) = map.get_mut(event) else {
        return false;
    };
    let before = list.len();
    list.retain(|l| l.id != id);
    let removed = list.len() != before;
    if list.is_empty() {
        map.remove(event);
    }
    removed
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
