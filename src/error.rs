//! Error taxonomy for the engine.
//!
//! Every failure surfaces to the immediate caller exactly once. Nothing is
//! logged and swallowed internally; cleanup is performed by guards on every
//! path.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the connection pool, request streams and the
/// concurrency limiter.
#[derive(Debug, Error)]
pub enum Error {
    /// A malformed request head or an unsupported URI scheme.
    ///
    /// Raised before any byte reaches the network; never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The connector failed to establish a connection.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The underlying connection errored or closed before the response head
    /// was received.
    #[error("underlying stream error: {0}")]
    Transport(#[source] std::io::Error),

    /// The response head or body framing could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer ended the connection before a complete response head
    /// arrived.
    #[error("connection ended before receiving response")]
    ConnectionEnded,

    /// The operation never ran: a queued handler was cancelled or a request
    /// stream was closed before it connected.
    #[error("{0}")]
    Cancelled(&'static str),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Returns true if the failure means the work was never started.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Returns true for failures caused by the caller's input.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    /// Short, stable label used for metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Io(_) => "connect",
            Error::Transport(_) => "transport",
            Error::Protocol(_) => "protocol",
            Error::ConnectionEnded => "connection_ended",
            Error::Cancelled(_) => "cancelled",
        }
    }
}
