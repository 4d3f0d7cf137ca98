//! Client-side memcached wire protocol.
//!
//! This crate encodes commands and incrementally decodes responses for
//! both the ASCII protocol (default) and the binary protocol (`binary`
//! feature). Decoding is event-based: a response is a stream of
//! [`Frame`]s — zero or more `Value`/`Stat` events followed by one
//! `Done(Reply)` terminal — which lets a connection reconcile partial
//! reads against its in-flight command queue without buffering whole
//! responses.
//!
//! # Example
//!
//! ```
//! use protocol_memcache::{AsciiDecoder, Frame, Reply, Request};
//!
//! // Encode a SET command.
//! let encoded = Request::Set { key: b"foo", flags: 0, exptime: 0, data: b"bar" }.to_bytes();
//! assert_eq!(encoded, b"set foo 0 0 3\r\nbar\r\n");
//!
//! // Decode the server's reply.
//! let mut decoder = AsciiDecoder::new();
//! let (frame, consumed) = decoder.decode(b"STORED\r\n").unwrap();
//! assert_eq!(frame, Some(Frame::Done(Reply::Stored)));
//! assert_eq!(consumed, 8);
//! ```

#[cfg(feature = "ascii")]
mod ascii;
mod error;
mod frame;
#[cfg(feature = "ascii")]
mod request;

#[cfg(feature = "binary")]
pub mod binary;

#[cfg(feature = "ascii")]
pub use ascii::AsciiDecoder;
pub use error::ParseError;
pub use frame::{Frame, Reply};
#[cfg(feature = "ascii")]
pub use request::Request;
