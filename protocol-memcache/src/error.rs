//! Parse errors shared by the ASCII and binary decoders.

/// Error type for response decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// More data is needed. Not fatal: buffer more bytes and retry.
    #[error("incomplete data")]
    Incomplete,

    /// The server sent something outside the protocol grammar. Fatal for
    /// the connection: responses can no longer be reconciled with
    /// in-flight commands.
    #[error("protocol error: {0}")]
    Protocol(&'static str),

    /// A numeric field failed to parse.
    #[error("invalid number")]
    InvalidNumber,

    /// Unknown opcode in a binary response header.
    #[cfg(feature = "binary")]
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Wrong magic byte in a binary response header.
    #[cfg(feature = "binary")]
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),
}

impl ParseError {
    /// Returns true if this error only indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}
