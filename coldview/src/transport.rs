//! Reconnecting WebSocket transport with publish/subscribe fan-out.
//!
//! A [`Transport`] owns at most one live socket. Every inbound frame and every
//! connection status change is handed to all current subscribers, in receipt
//! order. When the socket fails or closes, subscribers get one status event
//! and the transport dials again after a fixed delay.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::types::StatusEvent;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid websocket url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
    #[error("transport is not connected")]
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub reconnect_delay: Duration,
    /// Consecutive reconnects before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_attempts: None,
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<Url, TransportError> {
        let url = Url::parse(&self.url).map_err(|source| TransportError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What subscribers receive. Frames are forwarded verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Status(StatusEvent),
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Subscriber registry. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct Subscribers {
    handlers: Arc<Mutex<Vec<(SubscriptionId, Handler)>>>,
    next_id: Arc<AtomicU64>,
}

impl Subscribers {
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(handler)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(i, _)| *i != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Calls every handler registered when the call starts. Handlers may
    /// subscribe or unsubscribe while this runs; changes apply to the next event.
    pub fn publish(&self, event: &TransportEvent) {
        let snapshot: Vec<Handler> = self.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in snapshot {
            handler(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Handler)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Session {
    // cleared by dispose() before the socket is closed
    live: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    outbound: mpsc::UnboundedSender<Message>,
    _task: JoinHandle<()>,
}

/// Connection owned by the application and passed by reference to whoever
/// needs it. Requires a tokio runtime for [`Transport::connect`].
pub struct Transport {
    config: TransportConfig,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
    session: Mutex<Option<Session>>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            subscribers: Subscribers::default(),
            state: Arc::new(state),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Subscribe with a channel instead of a callback, for async consumers.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Starts the connection loop, replacing any previous session.
    pub fn connect(&self) -> Result<(), TransportError> {
        let url = self.config.validate()?;
        self.dispose();

        let live = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let link = Link {
            url,
            reconnect_delay: self.config.reconnect_delay,
            max_attempts: self.config.max_attempts,
            subscribers: self.subscribers.clone(),
            state: Arc::clone(&self.state),
            live: Arc::clone(&live),
        };
        link.set_state(ConnectionState::Connecting);
        let task = tokio::spawn(run(link, outbound_rx, shutdown_rx));

        *self.lock_session() = Some(Session {
            live,
            shutdown: Some(shutdown_tx),
            outbound: outbound_tx,
            _task: task,
        });
        Ok(())
    }

    /// Queues a text frame on the live socket.
    pub fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let session = self.lock_session();
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;
        session
            .outbound
            .send(Message::Text(text.to_owned()))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Releases the current socket. The session's handlers are detached
    /// before the close is requested, so a disposed session never publishes
    /// a status event or reconnects.
    pub fn dispose(&self) {
        let Some(mut session) = self.lock_session().take() else {
            return;
        };
        close_gate(&self.state, &session.live);
        if let Some(tx) = session.shutdown.take() {
            let _ = tx.send(());
        }
        self.state.send_replace(ConnectionState::Disconnected);
        debug!(url = %self.config.url, "transport disposed");
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}

// Everything the connection task needs, detached from the Transport.
struct Link {
    url: Url,
    reconnect_delay: Duration,
    max_attempts: Option<u32>,
    subscribers: Subscribers,
    state: Arc<watch::Sender<ConnectionState>>,
    live: Arc<AtomicBool>,
}

impl Link {
    fn emit(&self, event: TransportEvent) {
        if self.live.load(Ordering::SeqCst) {
            self.subscribers.publish(&event);
        }
    }

    // gate checked under the watch lock; see close_gate
    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if !self.live.load(Ordering::SeqCst) {
                return false;
            }
            *current = state;
            true
        });
    }
}

// Clears the session gate and publishes `Closing` under the watch lock, so a
// racing `set_state` lands either before it or not at all.
fn close_gate(state: &watch::Sender<ConnectionState>, live: &AtomicBool) {
    state.send_modify(|current| {
        live.store(false, Ordering::SeqCst);
        *current = ConnectionState::Closing;
    });
}

enum SessionEnd {
    Disposed,
    Lost(StatusEvent),
}

async fn run(
    link: Link,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut attempts: u32 = 0;
    loop {
        link.set_state(ConnectionState::Connecting);
        debug!(url = %link.url, attempt = attempts, "connecting");

        let dialed = tokio::select! {
            _ = &mut shutdown => return,
            res = connect_async(link.url.as_str()) => res,
        };

        let lost = match dialed {
            Ok((ws, _)) => {
                attempts = 0;
                // drop anything queued while we were down
                while outbound.try_recv().is_ok() {}
                link.set_state(ConnectionState::Connected);
                info!(url = %link.url, "websocket connected");
                link.emit(TransportEvent::Status(StatusEvent::connected()));
                match pump(&link, ws, &mut outbound, &mut shutdown).await {
                    SessionEnd::Disposed => return,
                    SessionEnd::Lost(status) => status,
                }
            }
            Err(e) => StatusEvent::error(format!("websocket error [connect]: {e}")),
        };

        link.set_state(ConnectionState::Disconnected);
        warn!(url = %link.url, status = %lost.value, desc = %lost.desc, "websocket down");
        link.emit(TransportEvent::Status(lost));

        if let Some(max) = link.max_attempts {
            if attempts >= max {
                warn!(url = %link.url, attempts, "giving up reconnecting");
                return;
            }
        }
        attempts = attempts.saturating_add(1);

        tokio::select! {
            _ = &mut shutdown => return,
            _ = sleep(link.reconnect_delay) => {}
        }
    }
}

async fn pump(
    link: &Link,
    ws: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    shutdown: &mut oneshot::Receiver<()>,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = sink.close().await;
                return SessionEnd::Disposed;
            }
            Some(msg) = outbound.recv() => {
                if let Err(e) = sink.send(msg).await {
                    return SessionEnd::Lost(StatusEvent::error(format!("websocket error [send]: {e}")));
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!(bytes = text.len(), "text frame");
                    link.emit(TransportEvent::Text(text));
                }
                Some(Ok(Message::Binary(bytes))) => link.emit(TransportEvent::Binary(bytes)),
                Some(Ok(Message::Close(frame))) => {
                    return SessionEnd::Lost(closed_status(frame.as_ref()));
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return SessionEnd::Lost(StatusEvent::error(format!("websocket error [io]: {e}")));
                }
                None => return SessionEnd::Lost(StatusEvent::closed("websocket closed [1006]: unknown")),
            }
        }
    }
}

fn closed_status(frame: Option<&CloseFrame<'_>>) -> StatusEvent {
    match frame {
        Some(f) => {
            let reason = if f.reason.is_empty() {
                "unknown"
            } else {
                f.reason.as_ref()
            };
            StatusEvent::closed(format!("websocket closed [{}]: {reason}", u16::from(f.code)))
        }
        None => StatusEvent::closed("websocket closed [1005]: unknown"),
    }
}
