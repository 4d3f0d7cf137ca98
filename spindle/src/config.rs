//! Client configuration and the connection observer contract.

use std::net::SocketAddr;
use std::time::Duration;

pub use hashring::HashAlg;

/// Wire protocol selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Ascii,
    Binary,
}

/// Key-to-node placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocatorKind {
    /// `hash(key) % N`. Cheap, but a membership change remaps nearly
    /// every key.
    Array,
    /// Ketama consistent hashing.
    #[default]
    Ketama,
}

/// What happens to operations when their node's connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Replay still-unwritten operations on the same node after it
    /// reconnects. Partially-written operations are cancelled.
    #[default]
    Retry,
    /// Fail everything queued for the node.
    Cancel,
    /// Reroute still-unwritten single-key operations to the next live
    /// node in the key's fallback sequence.
    Redistribute,
}

/// Client tunables. `Default` matches a small production deployment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for synchronous calls and the default future timeout.
    pub operation_timeout: Duration,
    /// When true the reactor thread is detached; dropping the client
    /// does not join it.
    pub daemon: bool,
    /// Per-node receive buffer capacity.
    pub read_buf_size: usize,
    /// Per-node send buffer capacity.
    pub write_buf_size: usize,
    /// Per-node ingress queue capacity; submissions beyond this fail
    /// fast with `Error::QueueFull`.
    pub op_queue_max: usize,
    pub locator: LocatorKind,
    pub hash_alg: HashAlg,
    pub failure_mode: FailureMode,
    pub protocol: Protocol,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(2500),
            daemon: false,
            read_buf_size: 16 * 1024,
            write_buf_size: 16 * 1024,
            op_queue_max: 16 * 1024,
            locator: LocatorKind::default(),
            hash_alg: HashAlg::Ketama,
            failure_mode: FailureMode::default(),
            protocol: Protocol::default(),
        }
    }
}

/// Callbacks for connection state transitions, invoked on the reactor
/// thread. Implementations must not block.
pub trait ConnectionObserver: Send {
    /// A node's connection came up. `reconnect_count` is 0 on the first
    /// establishment.
    fn connection_established(&self, addr: SocketAddr, reconnect_count: u32);

    /// A node's connection dropped.
    fn connection_lost(&self, addr: SocketAddr);
}
