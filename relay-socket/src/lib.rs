//! Relay Socket - typed, reconnecting message channels over any duplex transport.
//!
//! This crate provides the layer between a raw byte-stream transport and
//! application code:
//! - Per-connection event registries with ordered synchronous fan-out
//! - The `{type, data}` envelope codec, including batched bundles
//! - A client connection that replays its start call on reconnect
//! - Automatic reconnection with bounded exponential backoff (no jitter)
//! - A server connection with per-client handles and broadcast helpers
//! - An in-process transport for tests and local wiring

pub mod client;
pub mod envelope;
pub mod memory;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod transport;

// Re-export key types
pub use client::{ClientConnection, ClientOptions, ConnectionState, WeakClientConnection};
pub use envelope::{decode, encode, encode_bundle, BundleItem, Envelope};
pub use memory::MemoryNetwork;
pub use reconnect::{ReconnectConfig, ReconnectState, ReconnectSupervisor};
pub use registry::EventRegistry;
pub use server::{ClientHandle, ServerConnection, ServerEvent, ServerOptions};
pub use transport::{
    ClientTransport, Connector, Listener, Session, SessionAcceptor, SessionListener,
    TransportHandler,
};
