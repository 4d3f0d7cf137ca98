//! Client error types.
//!
//! The reactor thread never propagates errors to application code
//! directly; every failure travels through an operation's sink into its
//! future. The variants here are therefore both what futures resolve to
//! and what the synchronous façade methods return.

/// Errors surfaced by the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Key rejected before enqueueing (length or forbidden bytes).
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// The target node's ingress queue is at capacity; retry or shed
    /// load.
    #[error("operation queue full")]
    QueueFull,

    /// The future was not resolved within the deadline. The operation
    /// itself keeps running and may still complete.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled, or its bytes were partially written
    /// when the connection dropped and it could not be replayed safely.
    #[error("operation cancelled")]
    Cancelled,

    /// The node's connection dropped and the failure mode does not
    /// replay this operation.
    #[error("connection lost")]
    ConnectionLost,

    /// The server sent something unparsable; the connection was dropped.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `SERVER_ERROR` with the server's message verbatim.
    #[error("server error: {0}")]
    Server(String),

    /// `CLIENT_ERROR` with the server's message verbatim.
    #[error("client error: {0}")]
    Client(String),

    /// Submitted after shutdown was initiated.
    #[error("client is shut down")]
    Shutdown,

    /// I/O failure outside any single operation (socket setup, reactor).
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<protocol_memcache::ParseError> for Error {
    fn from(err: protocol_memcache::ParseError) -> Self {
        Error::Protocol(err.to_string())
    }
}
