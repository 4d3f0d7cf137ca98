//! Asynchronous client for a distributed memcached fleet.
//!
//! A single reactor thread owns one persistent TCP connection per
//! server and multiplexes operations from any number of application
//! threads onto them. Keys route deterministically via consistent
//! hashing ([`hashring`]); commands are framed and responses decoded by
//! [`protocol_memcache`]; results come back through futures that can be
//! awaited, waited on with a timeout, or cancelled.
//!
//! Per node, operations complete in submission order. Submission never
//! blocks on I/O: it either enqueues onto the node's bounded queue or
//! fails fast (`Error::QueueFull`). When a connection drops, operations
//! that were not yet written are replayed, failed, or rerouted according
//! to the configured [`FailureMode`]; partially-written operations are
//! always cancelled, never silently retried.
//!
//! ```no_run
//! use spindle::{Client, ClientConfig};
//!
//! # fn main() -> Result<(), spindle::Error> {
//! let servers: Vec<std::net::SocketAddr> = vec![
//!     "10.0.1.1:11211".parse().unwrap(),
//!     "10.0.1.2:11211".parse().unwrap(),
//! ];
//! let client = Client::new(&servers, ClientConfig::default())?;
//!
//! client.set("greeting", 0, "hello")?.wait()?;
//! let hit = client.get("greeting")?.wait()?;
//! assert_eq!(hit.unwrap().data.as_ref(), b"hello");
//!
//! let count = client.incr_with_default("visits", 1, 1, 0)?;
//! assert!(count >= 1);
//! # Ok(())
//! # }
//! ```

mod buffer;
mod client;
mod config;
mod error;
mod future;
mod node;
mod operation;
mod reactor;
mod transcoder;

pub use client::{Client, MAX_KEY_LEN};
pub use config::{ClientConfig, ConnectionObserver, FailureMode, HashAlg, LocatorKind, Protocol};
pub use error::Error;
pub use future::OperationFuture;
pub use operation::CasResponse;
pub use transcoder::{CachedData, CasValue, RawTranscoder, Transcoder, Value};
