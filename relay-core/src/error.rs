//! Error types for the relay workspace.
//!
//! All error categories are unified into a single `RelayError` enum with
//! conversions from underlying library errors. Payload decoding has its own
//! narrower `DecodeError`, since decode failures are always recovered where
//! they happen and only need to be described, not propagated.

use thiserror::Error;

/// Convenience type alias for Results using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;

/// Reasons an incoming frame could not be turned into an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not a well-formed JSON document.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The document parsed but has no usable `type` field.
    #[error("invalid message: no type specified")]
    MissingType,
}

/// Unified error type covering all error categories in relay.
#[derive(Error, Debug)]
pub enum RelayError {
    // -- Transport errors --
    /// `start` was called without a transport connector.
    #[error("transport is undefined")]
    TransportUnavailable,

    /// The transport failed to open a session or to write a frame.
    #[error("transport error: {0}")]
    Transport(String),

    /// A send was attempted while no transport is attached.
    #[error("not connected")]
    NotConnected,

    // -- Envelope errors --
    /// An envelope was built with an empty `type`.
    #[error("envelope type must not be empty")]
    EmptyType,

    /// An incoming payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    // -- Configuration errors --
    /// Failed to load, parse or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Wrapping anyhow errors from transport implementations.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(e: toml::de::Error) -> Self {
        RelayError::Config(e.to_string())
    }
}
