//! HMR channel abstraction.
//!
//! A channel delivers payloads to one kind of client (WebSocket browsers, an
//! SSR runtime, tests). The broadcaster wraps all channels of an environment:
//! `send` fans out to every channel, and `on_connection` fires once every
//! constituent channel has seen at least one client.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::message::HmrPayload;

/// Callback invoked when a channel (or all channels) becomes connected.
pub type ConnectionListener = Box<dyn Fn() + Send + Sync>;

/// Callback for a client-sent custom event.
pub type EventListener = Box<dyn Fn(&serde_json::Value) + Send + Sync>;

/// One payload delivery surface.
pub trait HmrChannel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Dispatch a payload to all clients of this channel.
    fn send(&self, payload: &HmrPayload);

    /// Start accepting clients.
    fn listen(&self);

    /// Disconnect all clients and stop accepting.
    fn close(&self);

    /// Register a listener fired on the first client connection.
    fn on_connection(&self, listener: ConnectionListener);

    /// Register a listener for a client-sent custom event.
    fn on(&self, event: &str, listener: EventListener);

    /// Drop all listeners for a custom event.
    fn off(&self, event: &str);
}

/// Listener registry shared by channel implementations.
#[derive(Default)]
pub(crate) struct EventListeners {
    by_event: Mutex<rustc_hash::FxHashMap<String, Vec<EventListener>>>,
}

impl EventListeners {
    pub(crate) fn add(&self, event: &str, listener: EventListener) {
        self.by_event
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(listener);
    }

    pub(crate) fn remove(&self, event: &str) {
        self.by_event.lock().remove(event);
    }

    pub(crate) fn dispatch(&self, event: &str, data: &serde_json::Value) {
        if let Some(listeners) = self.by_event.lock().get(event) {
            for listener in listeners {
                listener(data);
            }
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fans payloads out to every channel of an environment.
pub struct ChannelBroadcaster {
    channels: Vec<Arc<dyn HmrChannel>>,
    ready: Arc<AtomicUsize>,
    listeners: Arc<Mutex<Vec<ConnectionListener>>>,
}

impl ChannelBroadcaster {
    pub fn new(channels: Vec<Arc<dyn HmrChannel>>) -> Self {
        let ready = Arc::new(AtomicUsize::new(0));
        let listeners: Arc<Mutex<Vec<ConnectionListener>>> = Arc::new(Mutex::new(Vec::new()));

        // Each constituent reports its first connection once; when all have,
        // the broadcaster-level listeners fire.
        let total = channels.len();
        for channel in &channels {
            let ready = Arc::clone(&ready);
            let listeners = Arc::clone(&listeners);
            channel.on_connection(Box::new(move || {
                if ready.fetch_add(1, Ordering::SeqCst) + 1 == total {
                    for listener in listeners.lock().iter() {
                        listener();
                    }
                }
            }));
        }

        Self {
            channels,
            ready,
            listeners,
        }
    }

    /// Broadcaster over no channels (environments without clients).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn send(&self, payload: &HmrPayload) {
        for channel in &self.channels {
            channel.send(payload);
        }
    }

    pub fn listen(&self) {
        for channel in &self.channels {
            channel.listen();
        }
    }

    pub fn close(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }

    /// Fires once every constituent channel has a connected client.
    pub fn on_connection(&self, listener: ConnectionListener) {
        if self.is_ready() {
            listener();
            return;
        }
        self.listeners.lock().push(listener);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) >= self.channels.len() && !self.channels.is_empty()
    }

    /// Register a custom-event listener on every channel.
    pub fn on(&self, event: &str, listener: Arc<dyn Fn(&serde_json::Value) + Send + Sync>) {
        for channel in &self.channels {
            let listener = Arc::clone(&listener);
            channel.on(event, Box::new(move |data| listener(data)));
        }
    }

    /// Remove a custom event from every channel.
    pub fn off(&self, event: &str) {
        for channel in &self.channels {
            channel.off(event);
        }
    }
}

// =============================================================================
// In-memory channel
// =============================================================================

/// Channel that records every payload. Used by tests and by the SSR
/// environment, which consumes invalidations in-process.
#[derive(Default)]
pub struct MemoryChannel {
    sent: Mutex<Vec<HmrPayload>>,
    listeners: Mutex<Vec<ConnectionListener>>,
    events: EventListeners,
}

impl MemoryChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Payloads sent so far.
    pub fn sent(&self) -> Vec<HmrPayload> {
        self.sent.lock().clone()
    }

    /// Drop recorded payloads.
    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    /// Simulate a client connecting.
    pub fn connect(&self) {
        for listener in self.listeners.lock().iter() {
            listener();
        }
    }

    /// Simulate a client-sent custom event.
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        self.events.dispatch(event, &data);
    }
}

impl HmrChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    fn send(&self, payload: &HmrPayload) {
        self.sent.lock().push(payload.clone());
    }

    fn listen(&self) {}

    fn close(&self) {
        self.sent.lock().clear();
    }

    fn on_connection(&self, listener: ConnectionListener) {
        self.listeners.lock().push(listener);
    }

    fn on(&self, event: &str, listener: EventListener) {
        self.events.add(event, listener);
    }

    fn off(&self, event: &str) {
        self.events.remove(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_broadcaster_fans_out() {
        let a = MemoryChannel::new();
        let b = MemoryChannel::new();
        let broadcaster = ChannelBroadcaster::new(vec![
            Arc::clone(&a) as Arc<dyn HmrChannel>,
            Arc::clone(&b) as Arc<dyn HmrChannel>,
        ]);

        broadcaster.send(&HmrPayload::full_reload("/x.js"));

        assert_eq!(a.sent().len(), 1);
        assert_eq!(b.sent().len(), 1);
    }

    #[test]
    fn test_on_connection_requires_all_channels() {
        let a = MemoryChannel::new();
        let b = MemoryChannel::new();
        let broadcaster = ChannelBroadcaster::new(vec![
            Arc::clone(&a) as Arc<dyn HmrChannel>,
            Arc::clone(&b) as Arc<dyn HmrChannel>,
        ]);

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        broadcaster.on_connection(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));

        a.connect();
        assert!(!fired.load(Ordering::SeqCst));

        b.connect();
        assert!(fired.load(Ordering::SeqCst));
        assert!(broadcaster.is_ready());
    }

    #[test]
    fn test_on_connection_after_ready_fires_immediately() {
        let a = MemoryChannel::new();
        let broadcaster =
            ChannelBroadcaster::new(vec![Arc::clone(&a) as Arc<dyn HmrChannel>]);
        a.connect();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        broadcaster.on_connection(Box::new(move || {
            fired_clone.store(true, Ordering::SeqCst);
        }));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_empty_broadcaster_never_ready() {
        let broadcaster = ChannelBroadcaster::empty();
        broadcaster.send(&HmrPayload::prune(vec![]));
        assert!(!broadcaster.is_ready());
    }

    #[test]
    fn test_custom_event_listeners() {
        let channel = MemoryChannel::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        channel.on(
            "my-plugin:ping",
            Box::new(move |data| {
                assert_eq!(data["n"], 1);
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        channel.emit("my-plugin:ping", serde_json::json!({"n": 1}));
        channel.emit("unrelated", serde_json::json!(null));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        channel.off("my-plugin:ping");
        channel.emit("my-plugin:ping", serde_json::json!({"n": 1}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
