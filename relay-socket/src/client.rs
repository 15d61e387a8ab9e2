//! Client side of a relay connection.
//!
//! A [`ClientConnection`] owns one logical connection to the hub. It opens
//! the transport through a [`Connector`], remembers the start call so it can
//! be replayed on reconnect, and turns transport callbacks into registry
//! events: `connect`, `close`, and one event per received envelope (bundles
//! are expanded item by item).
//!
//! State machine:
//!
//! ```text
//! Idle --start--> Connecting --open--> Open --close--> Closed
//!                      ^                                  |
//!                      +------------- start --------------+
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn, Level};

use relay_core::config::{normalize_url, ClientSettings};
use relay_core::constants::{self, events};
use relay_core::error::{RelayError, RelayResult};
use relay_core::logging::{noop_sink, LogSink};

use crate::envelope::{self, BundleItem};
use crate::registry::EventRegistry;
use crate::transport::{ClientTransport, Connector, TransportHandler};

/// Options for [`ClientConnection::start`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Server URL. A scheme is added when missing.
    pub url: String,
    /// Destination for connection diagnostics. Discards by default.
    pub logging: Arc<dyn LogSink>,
    /// Label passed to `logging` with every line.
    pub logging_context: String,
    /// Scheme used when `url` has none, e.g. the scheme of the hosting page.
    pub default_scheme: String,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Build options from the `[client]` configuration section.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            logging: noop_sink(),
            logging_context: settings.logging_context.clone(),
            default_scheme: settings.default_scheme.clone(),
        }
    }

    pub fn with_logging(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.logging = sink;
        self
    }

    pub fn with_logging_context(mut self, context: impl Into<String>) -> Self {
        self.logging_context = context.into();
        self
    }

    pub fn with_default_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.default_scheme = scheme.into();
        self
    }

    fn log(&self, level: Level, message: &str) {
        self.logging.log(level, &self.logging_context, message);
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            logging: noop_sink(),
            logging_context: constants::DEFAULT_LOGGING_CONTEXT.to_string(),
            default_scheme: constants::DEFAULT_URL_SCHEME.to_string(),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("url", &self.url)
            .field("logging_context", &self.logging_context)
            .field("default_scheme", &self.default_scheme)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started.
    Idle,
    /// Transport instantiated, waiting for it to open.
    Connecting,
    /// Transport open; frames can be sent.
    Open,
    /// Transport closed. Only a new `start` leaves this state.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// A recorded `start` call, replayed verbatim on reconnect.
#[derive(Clone)]
struct StartCall {
    connector: Option<Arc<dyn Connector>>,
    options: ClientOptions,
}

struct Inner {
    registry: EventRegistry<Value>,
    state: Mutex<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    transport: Mutex<Option<Arc<dyn ClientTransport>>>,
    last_start: Mutex<Option<StartCall>>,
    /// Bumped by every start and disconnect. Callbacks carrying an older
    /// generation come from a replaced transport and are ignored.
    generation: AtomicU64,
}

impl Inner {
    fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.lock();
        if *state != new_state {
            info!("connection state: {} -> {}", *state, new_state);
            *state = new_state;
            self.state_tx.send_replace(new_state);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// One logical client connection to the hub.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`ClientConnection`], for handlers that must
/// not keep the connection alive.
#[derive(Clone)]
pub struct WeakClientConnection {
    inner: Weak<Inner>,
}

impl WeakClientConnection {
    pub fn upgrade(&self) -> Option<ClientConnection> {
        self.inner.upgrade().map(|inner| ClientConnection { inner })
    }
}

impl ClientConnection {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                registry: EventRegistry::new(),
                state: Mutex::new(ConnectionState::Idle),
                state_tx,
                transport: Mutex::new(None),
                last_start: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakClientConnection {
        WeakClientConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Subscribe to connection state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// The normalized URL of the last start call.
    pub fn url(&self) -> Option<String> {
        self.inner
            .last_start
            .lock()
            .as_ref()
            .map(|call| call.options.url.clone())
    }

    /// Register a handler for `event`.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.on(event, handler);
    }

    /// Dispatch `event` to this connection's handlers.
    pub fn internal_emit(&self, event: &str, data: &Value) -> usize {
        self.inner.registry.emit(event, data)
    }

    /// Start (or restart) the connection.
    ///
    /// The call is recorded before anything else so [`restart`](Self::restart)
    /// can replay it. Without a connector a `failure` event is emitted and
    /// nothing else happens. A connector error counts as an immediate close.
    pub fn start(&self, connector: Option<Arc<dyn Connector>>, mut options: ClientOptions) {
        options.url = normalize_url(&options.url, &options.default_scheme);

        *self.inner.last_start.lock() = Some(StartCall {
            connector: connector.clone(),
            options: options.clone(),
        });

        let Some(connector) = connector else {
            let err = RelayError::TransportUnavailable;
            options.log(Level::ERROR, &format!("error :: {err}"));
            warn!("start called without a connector: {err}");
            self.internal_emit(events::FAILURE, &Value::Null);
            return;
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let replaced = self.inner.transport.lock().take();
        if let Some(old) = replaced {
            debug!("closing replaced transport");
            old.close();
        }

        self.inner.set_state(ConnectionState::Connecting);
        options.log(
            Level::INFO,
            &format!("Starting socket interface on: {}", options.url),
        );

        let link = Arc::new(Link {
            generation,
            conn: Arc::downgrade(&self.inner),
            options: options.clone(),
        });

        match connector.connect(&options.url, link) {
            Ok(transport) => {
                let transport: Arc<dyn ClientTransport> = Arc::from(transport);
                if self.inner.is_current(generation) && self.state() != ConnectionState::Closed {
                    *self.inner.transport.lock() = Some(transport);
                } else {
                    debug!("transport closed before connect returned");
                    transport.close();
                }
            }
            Err(e) => {
                options.log(Level::ERROR, &format!("error :: failed to open transport: {e}"));
                warn!("transport connect to {} failed: {e}", options.url);
                self.inner.set_state(ConnectionState::Closed);
                self.internal_emit(events::CLOSE, &Value::Null);
            }
        }
    }

    /// Replay the last recorded start call. Returns false if there is none.
    pub fn restart(&self) -> bool {
        let call = self.inner.last_start.lock().clone();
        match call {
            Some(call) => {
                self.start(call.connector, call.options);
                true
            }
            None => {
                debug!("restart requested before any start");
                false
            }
        }
    }

    /// Send a typed message.
    ///
    /// Requires the connection to be open; otherwise returns `NotConnected`
    /// and sends nothing.
    pub fn emit<T: Serialize>(&self, kind: &str, data: T) -> RelayResult<()> {
        let frame = envelope::encode(kind, &serde_json::to_value(data)?)?;
        self.send_frame(&frame)
    }

    /// Send several items as one bundle frame.
    pub fn emit_bundle(&self, items: &[BundleItem]) -> RelayResult<()> {
        let frame = envelope::encode_bundle(items)?;
        self.send_frame(&frame)
    }

    fn send_frame(&self, frame: &str) -> RelayResult<()> {
        if self.state() != ConnectionState::Open {
            return Err(RelayError::NotConnected);
        }
        let transport = self.inner.transport.lock().clone();
        match transport {
            Some(transport) => transport.send(frame),
            None => Err(RelayError::NotConnected),
        }
    }

    /// Force the connection closed without waiting for the network.
    ///
    /// The transport is detached and closed, and `close` is emitted right
    /// away. Does nothing when no transport is attached.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let transport = self.inner.transport.lock().take();
        let Some(transport) = transport else {
            debug!("disconnect without a live transport");
            return;
        };

        transport.close();
        self.inner.set_state(ConnectionState::Closed);
        self.internal_emit(events::CLOSE, &Value::Null);
    }
}

impl Default for ClientConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport callbacks for one start generation.
struct Link {
    generation: u64,
    conn: Weak<Inner>,
    options: ClientOptions,
}

impl Link {
    fn live(&self) -> Option<Arc<Inner>> {
        let inner = self.conn.upgrade()?;
        if !inner.is_current(self.generation) {
            debug!("ignoring callback from replaced transport");
            return None;
        }
        Some(inner)
    }
}

impl TransportHandler for Link {
    fn on_open(&self) {
        let Some(inner) = self.live() else { return };
        inner.set_state(ConnectionState::Open);
        inner.registry.emit(events::CONNECT, &Value::Null);
    }

    fn on_close(&self) {
        let Some(inner) = self.live() else { return };
        let closed = inner.transport.lock().take();
        drop(closed);
        inner.set_state(ConnectionState::Closed);
        inner.registry.emit(events::CLOSE, &Value::Null);
    }

    fn on_message(&self, frame: &str) {
        let Some(inner) = self.live() else { return };
        let envelope = match envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.options
                    .log(Level::ERROR, &format!("error :: dropping message :: {e}"));
                warn!("dropping incoming frame: {e}");
                return;
            }
        };

        if envelope.is_bundle() && !envelope.data.is_array() {
            debug!("ignoring bundle without an item array");
            return;
        }
        for message in envelope.expand() {
            inner.registry.emit(&message.kind, &message.data);
        }
    }
}
