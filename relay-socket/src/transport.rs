//! Transport collaborator interfaces.
//!
//! The connection layer never touches sockets itself. A client is handed a
//! [`Connector`] that opens one duplex session and reports its lifecycle
//! through a [`TransportHandler`]; a server is handed a [`Listener`] that
//! passes every accepted [`Session`] to a [`SessionAcceptor`], which returns
//! the [`SessionListener`] receiving that session's data and close signals.
//!
//! Implementations may invoke callbacks from any thread, but must deliver
//! the callbacks of one session sequentially and in order.

use std::sync::Arc;

use relay_core::error::RelayResult;

/// Callbacks a client transport drives.
pub trait TransportHandler: Send + Sync {
    /// The session is established and frames may be sent.
    fn on_open(&self);
    /// The session ended, cleanly or not.
    fn on_close(&self);
    /// A text frame arrived.
    fn on_message(&self, frame: &str);
}

/// The sending half of an open client session.
pub trait ClientTransport: Send + Sync {
    fn send(&self, frame: &str) -> RelayResult<()>;
    /// Tear the session down. Whether `on_close` follows is up to the
    /// implementation.
    fn close(&self);
}

/// Opens client sessions.
pub trait Connector: Send + Sync {
    /// Begin connecting to `url`. Lifecycle events arrive on `handler`,
    /// normally after this call returns.
    fn connect(
        &self,
        url: &str,
        handler: Arc<dyn TransportHandler>,
    ) -> RelayResult<Box<dyn ClientTransport>>;
}

/// One accepted server-side session.
pub trait Session: Send + Sync {
    fn write(&self, frame: &str) -> RelayResult<()>;
    fn close(&self);
}

/// Callbacks a server transport drives for one session.
pub trait SessionListener: Send + Sync {
    fn on_data(&self, frame: &str);
    fn on_close(&self);
}

/// Receives sessions as the server transport accepts them.
pub trait SessionAcceptor: Send + Sync {
    fn accept(&self, session: Arc<dyn Session>) -> Arc<dyn SessionListener>;
}

/// A server transport emitting a `connection` event per accepted session.
pub trait Listener: Send + Sync {
    /// Route future connections to `acceptor`, replacing any previous one.
    fn on_connection(&self, acceptor: Arc<dyn SessionAcceptor>);
}
