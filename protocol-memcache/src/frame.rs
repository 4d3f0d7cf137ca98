//! Decoder output: a tagged alphabet of response events.
//!
//! Both decoders emit the same [`Frame`] type, so the layer reconciling
//! responses with in-flight commands is protocol-agnostic. A response is
//! zero or more `Value`/`Stat` frames followed by exactly one
//! `Done(reply)` terminal.

use bytes::Bytes;

/// Terminal reply line (or binary status) ending one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Ok,
    /// `END` for retrieval/stats responses; also the binary terminator
    /// (noop after quiet gets, empty stat packet).
    End,
    /// New counter value from incr/decr.
    Numeric(u64),
    Version(Bytes),
    Error,
    ClientError(String),
    ServerError(String),
}

impl Reply {
    /// Returns true for ERROR / CLIENT_ERROR / SERVER_ERROR.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Reply::Error | Reply::ClientError(_) | Reply::ServerError(_)
        )
    }

    /// Human-readable message for this reply, verbatim for server and
    /// client errors.
    pub fn message(&self) -> String {
        match self {
            Reply::Stored => "STORED".into(),
            Reply::NotStored => "NOT_STORED".into(),
            Reply::Exists => "EXISTS".into(),
            Reply::NotFound => "NOT_FOUND".into(),
            Reply::Deleted => "DELETED".into(),
            Reply::Ok => "OK".into(),
            Reply::End => "END".into(),
            Reply::Numeric(n) => n.to_string(),
            Reply::Version(v) => String::from_utf8_lossy(v).into_owned(),
            Reply::Error => "ERROR".into(),
            Reply::ClientError(msg) => msg.clone(),
            Reply::ServerError(msg) => msg.clone(),
        }
    }
}

/// One decoded response event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One `VALUE` block (or binary get hit). `cas` is present for
    /// `gets` and always present on the binary path.
    Value {
        key: Bytes,
        flags: u32,
        cas: Option<u64>,
        data: Bytes,
    },
    /// One `STAT` line (or binary stat packet).
    Stat { name: Bytes, value: Bytes },
    /// Terminal reply: completes the response in progress.
    Done(Reply),
}
