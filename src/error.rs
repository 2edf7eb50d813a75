//! Error types for the synchronization engine.

use std::fmt;

/// Result type alias for synchronizer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running the synchronization protocol.
///
/// Handler failures never cross the event-loop boundary: they are turned
/// into a logged event plus a peer penalty, or a `Rejected` response to
/// the originator. Only fatal errors interrupt the loop.
#[derive(Debug)]
pub enum Error {
    /// Malformed bundle or message; the frame could not be decoded.
    Decode(String),

    /// A well-formed frame describing an impossible state (unknown
    /// session, wrong peer status, certificate mismatch).
    ProtocolViolation(String),

    /// A bounded resource is full (session table, outbound queue).
    ResourceExhausted {
        /// Name of the exhausted resource.
        resource: &'static str,
        /// Configured limit that was hit.
        limit: usize,
    },

    /// Transport hiccup; safe to retry on a later heartbeat.
    Transient(String),

    /// Invalid configuration value.
    Config(String),

    /// An internal channel was closed unexpectedly.
    Channel(String),

    /// Unrecoverable failure (state facade unavailable, crypto subsystem
    /// unusable). Shuts the loop down.
    Fatal(String),
}

impl Error {
    /// Whether this error must terminate the event loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_) | Error::Channel(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode(msg) => {
                write!(f, "failed to decode: {}", msg)
            }
            Error::ProtocolViolation(msg) => {
                write!(f, "protocol violation: {}", msg)
            }
            Error::ResourceExhausted { resource, limit } => {
                write!(f, "{} is full (limit: {})", resource, limit)
            }
            Error::Transient(msg) => {
                write!(f, "transient failure: {}", msg)
            }
            Error::Config(msg) => {
                write!(f, "configuration error: {}", msg)
            }
            Error::Channel(msg) => {
                write!(f, "channel error: {}", msg)
            }
            Error::Fatal(msg) => {
                write!(f, "fatal: {}", msg)
            }
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(err: async_channel::SendError<T>) -> Self {
        Error::Channel(err.to_string())
    }
}

impl From<async_channel::RecvError> for Error {
    fn from(err: async_channel::RecvError) -> Self {
        Error::Channel(err.to_string())
    }
}
