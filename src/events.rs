//! Publish/subscribe surface for sender lifecycle events.
//!
//! Two events exist: [`SenderEvent::Connect`] fires whenever the worker
//! establishes a connection, and [`SenderEvent::Error`] fires for validation,
//! transport and acknowledgement failures. Listeners are kept per event in
//! subscription order. Dispatch copies the listener list out of the lock first,
//! so a listener may subscribe or unsubscribe while being called.

use std::{fmt, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use crate::error::ForwardError;

/// Completion handle invoked exactly once per submitted event.
pub type Completion = Box<dyn FnOnce(Result<(), ForwardError>) + Send + 'static>;

type ConnectListener = Arc<dyn Fn() + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&ForwardError) + Send + Sync>;

/// Events published by a sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SenderEvent {
    Connect,
    Error,
}

impl SenderEvent {
    /// Event name as used in log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderEvent::Connect => "connect",
            SenderEvent::Error => "error",
        }
    }
}

impl fmt::Display for SenderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by every subscription, used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry<L> {
    id: SubscriptionId,
    once: bool,
    listener: L,
}

/// Clone the listeners due for this dispatch, dropping `once` entries.
fn take_due<L: Clone>(entries: &mut Vec<Entry<L>>) -> Vec<L> {
    let due = entries.iter().map(|e| e.listener.clone()).collect();
    entries.retain(|e| !e.once);
    due
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    connect: Vec<Entry<ConnectListener>>,
    error: Vec<Entry<ErrorListener>>,
}

impl Registry {
    fn allocate(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

/// Listener registry shared between a sender handle and its worker.
#[derive(Default)]
pub struct EventHub {
    registry: Mutex<Registry>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every `connect` event.
    pub fn on_connect(&self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.add_connect(Arc::new(listener), false)
    }

    /// Subscribe to the next `connect` event only.
    pub fn once_connect(&self, listener: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        self.add_connect(Arc::new(listener), true)
    }

    /// Subscribe to every `error` event.
    pub fn on_error(
        &self,
        listener: impl Fn(&ForwardError) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_error(Arc::new(listener), false)
    }

    /// Subscribe to the next `error` event only.
    pub fn once_error(
        &self,
        listener: impl Fn(&ForwardError) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_error(Arc::new(listener), true)
    }

    /// Remove a subscription. Returns `false` when it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.connect.len() + registry.error.len();
        registry.connect.retain(|e| e.id != id);
        registry.error.retain(|e| e.id != id);
        before != registry.connect.len() + registry.error.len()
    }

    /// Number of listeners currently subscribed to `event`.
    pub fn listener_count(&self, event: SenderEvent) -> usize {
        let registry = self.registry.lock();
        match event {
            SenderEvent::Connect => registry.connect.len(),
            SenderEvent::Error => registry.error.len(),
        }
    }

    fn add_connect(&self, listener: ConnectListener, once: bool) -> SubscriptionId {
        let mut registry = self.registry.lock();
        let id = registry.allocate();
        registry.connect.push(Entry { id, once, listener });
        id
    }

    fn add_error(&self, listener: ErrorListener, once: bool) -> SubscriptionId {
        let mut registry = self.registry.lock();
        let id = registry.allocate();
        registry.error.push(Entry { id, once, listener });
        id
    }

    /// Broadcast a `connect` event.
    pub(crate) fn emit_connect(&self) {
        let due = take_due(&mut self.registry.lock().connect);
        for listener in due {
            listener();
        }
    }

    /// Broadcast an `error` event. Returns `false` when nobody was listening.
    pub(crate) fn emit_error(&self, err: &ForwardError) -> bool {
        let due = take_due(&mut self.registry.lock().error);
        if due.is_empty() {
            return false;
        }
        for listener in due {
            listener(err);
        }
        true
    }

    /// Report `err` to the per-event callback first, then to subscribers.
    ///
    /// An unobserved error is only logged at debug level.
    pub(crate) fn dispatch_error(&self, err: ForwardError, callback: Option<Completion>) {
        if let Some(callback) = callback {
            callback(Err(err.clone()));
        }
        if !self.emit_error(&err) {
            debug!("fluent sender error with no subscribers: {err}");
        }
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("EventHub")
            .field("connect_listeners", &registry.connect.len())
            .field("error_listeners", &registry.error.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[rstest]
    fn on_error_receives_every_error() {
        let hub = EventHub::new();
        let seen = counter();
        let sink = Arc::clone(&seen);
        hub.on_error(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        assert!(hub.emit_error(&ForwardError::MissingTag));
        assert!(hub.emit_error(&ForwardError::MissingTag));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn once_listeners_fire_a_single_time() {
        let hub = EventHub::new();
        let seen = counter();
        let sink = Arc::clone(&seen);
        hub.once_connect(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        hub.emit_connect();
        hub.emit_connect();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.listener_count(SenderEvent::Connect), 0);
    }

    #[rstest]
    fn off_removes_subscription() {
        let hub = EventHub::new();
        let id = hub.on_error(|_| {});
        assert!(hub.off(id));
        assert!(!hub.off(id));
        assert!(!hub.emit_error(&ForwardError::Closed));
    }

    #[rstest]
    fn dispatch_invokes_callback_before_subscribers() {
        let hub = EventHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let from_listener = Arc::clone(&order);
        hub.on_error(move |_| from_listener.lock().push("listener"));
        let from_callback = Arc::clone(&order);
        hub.dispatch_error(
            ForwardError::MissingTag,
            Some(Box::new(move |result| {
                assert!(matches!(result, Err(ForwardError::MissingTag)));
                from_callback.lock().push("callback");
            })),
        );
        assert_eq!(*order.lock(), vec!["callback", "listener"]);
    }

    #[rstest]
    fn dispatch_without_subscribers_is_silent() {
        let hub = EventHub::new();
        let called = counter();
        let sink = Arc::clone(&called);
        hub.dispatch_error(
            ForwardError::Closed,
            Some(Box::new(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    fn listeners_may_unsubscribe_during_dispatch() {
        let hub = Arc::new(EventHub::new());
        let inner = Arc::clone(&hub);
        let slot = Arc::new(Mutex::new(None));
        let id_slot = Arc::clone(&slot);
        let id = hub.on_error(move |_| {
            if let Some(id) = id_slot.lock().take() {
                inner.off(id);
            }
        });
        *slot.lock() = Some(id);
        hub.emit_error(&ForwardError::Closed);
        assert_eq!(hub.listener_count(SenderEvent::Error), 0);
    }
}
