//! Protocol and configuration constants.

/// Envelope type that marks a batched multi-message payload.
pub const BUNDLE_TYPE: &str = "bundle";

/// Default multiplier applied to the reconnect delay after each attempt.
pub const DEFAULT_RECONNECT_FACTOR: u32 = 2;

/// Default first reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_FLOOR_MS: u64 = 500;

/// Default upper bound for the reconnect delay in milliseconds.
pub const DEFAULT_RECONNECT_CEILING_MS: u64 = 30_000;

/// Scheme prepended to client URLs that do not carry one.
pub const DEFAULT_URL_SCHEME: &str = "http";

/// Default prefix for lines written through an injected log sink.
pub const DEFAULT_LOGGING_CONTEXT: &str = "Connection";

/// Lifecycle events emitted on connection registries.
pub mod events {
    /// The transport opened (client) or a session was accepted (server).
    pub const CONNECT: &str = "connect";
    /// The transport or a session closed.
    pub const CLOSE: &str = "close";
    /// The client was started without a usable transport.
    pub const FAILURE: &str = "failure";
    /// A bundle was handed to the server for delivery.
    pub const BUNDLE: &str = "bundle";
}
