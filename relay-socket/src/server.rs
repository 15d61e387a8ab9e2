//! Server side of relay connections.
//!
//! A [`ServerConnection`] accepts sessions from a [`Listener`], wraps each
//! one in a [`ClientHandle`] with its own event registry, and keeps the set
//! of live handles for broadcasting. Server-level events (`connect`,
//! `close`, `bundle`) go to the server's registry; messages a client sends
//! are dispatched on that client's handle, so per-client logic attaches
//! there.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn, Level};
use uuid::Uuid;

use relay_core::config::ServerSettings;
use relay_core::constants::{self, events};
use relay_core::error::RelayResult;
use relay_core::logging::{noop_sink, LogSink};

use crate::envelope::{self, BundleItem};
use crate::registry::EventRegistry;
use crate::transport::{Listener, Session, SessionAcceptor, SessionListener};

/// Options for [`ServerConnection::start`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Destination for server diagnostics. Discards by default.
    pub logging: Arc<dyn LogSink>,
    /// Reserved per-message bundling policy. Stored only.
    pub bundling: bool,
}

impl ServerOptions {
    /// Build options from the `[server]` configuration section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            logging: noop_sink(),
            bundling: settings.bundling,
        }
    }

    pub fn with_logging(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.logging = sink;
        self
    }

    pub fn with_bundling(mut self, bundling: bool) -> Self {
        self.bundling = bundling;
        self
    }

    fn log(&self, level: Level, message: &str) {
        self.logging
            .log(level, constants::DEFAULT_LOGGING_CONTEXT, message);
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            logging: noop_sink(),
            bundling: false,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("bundling", &self.bundling)
            .finish_non_exhaustive()
    }
}

struct HandleInner {
    id: Uuid,
    connected_at: DateTime<Utc>,
    session: Arc<dyn Session>,
    registry: EventRegistry<Value>,
}

/// One accepted client session and its event registry.
///
/// Cheap to clone; clones refer to the same session.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Arc<HandleInner>,
}

impl ClientHandle {
    fn new(session: Arc<dyn Session>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: Uuid::new_v4(),
                connected_at: Utc::now(),
                session,
                registry: EventRegistry::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// Register a handler for messages of type `event` from this client.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.registry.on(event, handler);
    }

    /// Send a typed message to this client.
    pub fn emit<T: Serialize>(&self, kind: &str, data: T) -> RelayResult<()> {
        let frame = envelope::encode(kind, &serde_json::to_value(data)?)?;
        self.send_frame(&frame)
    }

    /// Send several items to this client as one bundle frame.
    pub fn emit_bundle(&self, items: &[BundleItem]) -> RelayResult<()> {
        let frame = envelope::encode_bundle(items)?;
        self.send_frame(&frame)
    }

    /// Ask the transport to end this session.
    pub fn close(&self) {
        self.inner.session.close();
    }

    fn send_frame(&self, frame: &str) -> RelayResult<()> {
        self.inner.session.write(frame)
    }
}

impl PartialEq for ClientHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ClientHandle {}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.inner.id)
            .field("connected_at", &self.inner.connected_at)
            .finish_non_exhaustive()
    }
}

/// Argument passed to server-level event handlers.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A session was accepted.
    Connect(ClientHandle),
    /// A session closed and left the active set.
    Close(ClientHandle),
    /// [`ServerConnection::bundle`] was called.
    Bundle { items: Vec<BundleItem>, id: Value },
}

struct ServerInner {
    registry: EventRegistry<ServerEvent>,
    connections: RwLock<HashMap<Uuid, ClientHandle>>,
    options: RwLock<ServerOptions>,
}

impl ServerInner {
    fn log(&self, level: Level, message: &str) {
        self.options.read().log(level, message);
    }
}

/// The hub end of relay connections.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<ServerInner>,
}

impl ServerConnection {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                registry: EventRegistry::new(),
                connections: RwLock::new(HashMap::new()),
                options: RwLock::new(ServerOptions::default()),
            }),
        }
    }

    /// Store `options` and start accepting sessions from `listener`.
    pub fn start(&self, listener: &dyn Listener, options: ServerOptions) {
        debug!("server starting (bundling: {})", options.bundling);
        *self.inner.options.write() = options;
        self.inner.log(Level::INFO, "Starting socket listeners");

        listener.on_connection(Arc::new(Acceptor {
            server: Arc::downgrade(&self.inner),
        }));
    }

    /// Whether the reserved bundling flag was set on start.
    pub fn bundling(&self) -> bool {
        self.inner.options.read().bundling
    }

    /// Register a handler for a server-level event.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner.registry.on(event, handler);
    }

    /// Register a handler for newly accepted clients.
    pub fn on_connect<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle) + Send + Sync + 'static,
    {
        self.on(events::CONNECT, move |event: &ServerEvent| {
            if let ServerEvent::Connect(handle) = event {
                handler(handle);
            }
        });
    }

    /// Register a handler for clients whose session closed.
    pub fn on_close<F>(&self, handler: F)
    where
        F: Fn(&ClientHandle) + Send + Sync + 'static,
    {
        self.on(events::CLOSE, move |event: &ServerEvent| {
            if let ServerEvent::Close(handle) = event {
                handler(handle);
            }
        });
    }

    /// Register a handler for bundles passed to [`bundle`](Self::bundle).
    pub fn on_bundle<F>(&self, handler: F)
    where
        F: Fn(&[BundleItem], &Value) + Send + Sync + 'static,
    {
        self.on(events::BUNDLE, move |event: &ServerEvent| {
            if let ServerEvent::Bundle { items, id } = event {
                handler(items, id);
            }
        });
    }

    /// Emit a `bundle` event carrying `items` and `id`.
    pub fn bundle(&self, items: Vec<BundleItem>, id: Value) {
        self.inner
            .registry
            .emit(events::BUNDLE, &ServerEvent::Bundle { items, id });
    }

    /// Send a typed message to every handle in `list`.
    ///
    /// The frame is encoded once. A handle whose write fails is logged and
    /// skipped. Returns the number of successful deliveries.
    pub fn broadcast_to<T: Serialize>(
        &self,
        kind: &str,
        data: T,
        list: &[ClientHandle],
    ) -> RelayResult<usize> {
        let frame = envelope::encode(kind, &serde_json::to_value(data)?)?;

        let mut delivered = 0;
        for handle in list {
            match handle.send_frame(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("broadcast of {kind} to {} failed: {e}", handle.id());
                    self.inner.log(
                        Level::WARN,
                        &format!("error :: broadcast to {} failed :: {e}", handle.id()),
                    );
                }
            }
        }
        debug!("broadcast {kind} to {delivered}/{} client(s)", list.len());
        Ok(delivered)
    }

    /// Send a typed message to every live handle.
    pub fn broadcast<T: Serialize>(&self, kind: &str, data: T) -> RelayResult<usize> {
        let handles = self.connections();
        self.broadcast_to(kind, data, &handles)
    }

    /// Snapshot of the live handles.
    pub fn connections(&self) -> Vec<ClientHandle> {
        self.inner.connections.read().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    pub fn get(&self, id: &Uuid) -> Option<ClientHandle> {
        self.inner.connections.read().get(id).cloned()
    }
}

impl Default for ServerConnection {
    fn default() -> Self {
        Self::new()
    }
}

struct Acceptor {
    server: Weak<ServerInner>,
}

impl SessionAcceptor for Acceptor {
    fn accept(&self, session: Arc<dyn Session>) -> Arc<dyn SessionListener> {
        let handle = ClientHandle::new(session);

        if let Some(server) = self.server.upgrade() {
            info!("accepted client {}", handle.id());
            server
                .registry
                .emit(events::CONNECT, &ServerEvent::Connect(handle.clone()));
            server
                .connections
                .write()
                .insert(handle.id(), handle.clone());
        } else {
            debug!("session accepted after server was dropped");
        }

        Arc::new(HandleListener {
            handle,
            server: self.server.clone(),
        })
    }
}

/// Session callbacks for one accepted client.
struct HandleListener {
    handle: ClientHandle,
    server: Weak<ServerInner>,
}

impl HandleListener {
    fn log(&self, level: Level, message: &str) {
        if let Some(server) = self.server.upgrade() {
            server.log(level, message);
        }
    }
}

impl SessionListener for HandleListener {
    fn on_data(&self, frame: &str) {
        match envelope::decode(frame) {
            Ok(message) => {
                self.handle.inner.registry.emit(&message.kind, &message.data);
            }
            Err(e) => {
                warn!("dropping frame from {}: {e}", self.handle.id());
                self.log(Level::ERROR, &format!("error :: dropping message :: {e}"));
            }
        }
    }

    fn on_close(&self) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        let removed = server.connections.write().remove(&self.handle.id());
        if removed.is_none() {
            debug!("close for client {} that was not active", self.handle.id());
            return;
        }
        info!("client {} closed", self.handle.id());
        server
            .registry
            .emit(events::CLOSE, &ServerEvent::Close(self.handle.clone()));
    }
}
