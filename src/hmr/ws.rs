//! WebSocket HMR channel.
//!
//! Browser clients connect over a dedicated WebSocket port; payloads are
//! broadcast as JSON. The acceptor runs on its own thread with blocking
//! sockets; the client list is shared behind a mutex with the sender.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use tungstenite::WebSocket;
use tungstenite::protocol::Message;

use super::channel::{ConnectionListener, EventListener, EventListeners, HmrChannel};
use super::message::HmrPayload;
use crate::{debug, log};

/// Maximum port retry attempts when the preferred port is taken.
const MAX_PORT_RETRIES: u16 = 10;

/// Poll cadence of the client-reader sweep.
const READ_POLL_MS: u64 = 100;

/// WebSocket channel for browser clients.
pub struct WsChannel {
    base_port: u16,
    bound_port: AtomicU16,
    clients: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
    listeners: Arc<Mutex<Vec<ConnectionListener>>>,
    events: Arc<EventListeners>,
    closed: Arc<AtomicBool>,
}

impl WsChannel {
    pub fn new(base_port: u16) -> Arc<Self> {
        Arc::new(Self {
            base_port,
            bound_port: AtomicU16::new(0),
            clients: Arc::new(Mutex::new(Vec::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(EventListeners::default()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The actually bound port (after `listen`, may differ from the base
    /// port when retries were needed).
    pub fn bound_port(&self) -> u16 {
        self.bound_port.load(Ordering::SeqCst)
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn spawn_acceptor(&self, listener: TcpListener) {
        let clients = Arc::clone(&self.clients);
        let connection_listeners = Arc::clone(&self.listeners);
        let closed = Arc::clone(&self.closed);

        std::thread::spawn(move || {
            loop {
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, addr)) => {
                        debug!("hmr"; "client connected: {}", addr);
                        let _ = stream.set_nonblocking(false);
                        match tungstenite::accept(stream) {
                            Ok(mut ws) => {
                                // Greet so clients can confirm the protocol.
                                let connected = HmrPayload::Custom {
                                    event: "connected".to_string(),
                                    data: serde_json::Value::Null,
                                };
                                let _ = ws.send(Message::Text(connected.to_json().into()));
                                clients.lock().push(ws);
                                for listener in connection_listeners.lock().iter() {
                                    listener();
                                }
                            }
                            Err(e) => {
                                debug!("hmr"; "websocket handshake failed: {}", e);
                            }
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(std::time::Duration::from_millis(100));
                    }
                    Err(e) => {
                        if closed.load(Ordering::SeqCst) {
                            break;
                        }
                        log!("hmr"; "accept error: {}", e);
                        std::thread::sleep(std::time::Duration::from_millis(100));
                    }
                }
            }
        });
    }

    /// Poll connected clients for custom events (sweep with short
    /// non-blocking reads, as writes share the same sockets).
    fn spawn_reader(&self) {
        let clients = Arc::clone(&self.clients);
        let events = Arc::clone(&self.events);
        let closed = Arc::clone(&self.closed);

        std::thread::spawn(move || {
            while !closed.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(READ_POLL_MS));
                let mut clients = clients.lock();
                for ws in clients.iter_mut() {
                    let _ = ws.get_ref().set_nonblocking(true);
                    while let Ok(message) = ws.read() {
                        let Ok(text) = message.to_text() else { continue };
                        if let Some(HmrPayload::Custom { event, data }) =
                            HmrPayload::from_json(text)
                        {
                            events.dispatch(&event, &data);
                        }
                    }
                    let _ = ws.get_ref().set_nonblocking(false);
                }
            }
        });
    }
}

impl HmrChannel for WsChannel {
    fn name(&self) -> &str {
        "ws"
    }

    fn send(&self, payload: &HmrPayload) {
        let json = payload.to_json();
        let mut clients = self.clients.lock();
        // Drop clients whose socket went away.
        clients.retain_mut(|ws| ws.send(Message::Text(json.clone().into())).is_ok());
    }

    fn listen(&self) {
        match try_bind_port(self.base_port, MAX_PORT_RETRIES) {
            Ok((listener, port)) => {
                self.bound_port.store(port, Ordering::SeqCst);
                if listener.set_nonblocking(true).is_err() {
                    log!("hmr"; "failed to configure websocket listener");
                    return;
                }
                self.spawn_acceptor(listener);
                self.spawn_reader();
            }
            Err(e) => log!("hmr"; "websocket server failed to start: {}", e),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut clients = self.clients.lock();
        for ws in clients.iter_mut() {
            let _ = ws.close(None);
        }
        clients.clear();
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

/// Try binding to a port, retrying on the next ports if taken.
fn try_bind_port(base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    Err(anyhow::anyhow!(
        "failed to bind websocket server after {} attempts: {}",
        max_retries,
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}
