//! The client façade.
//!
//! Validates keys, routes them through the locator snapshot, builds
//! pre-encoded operations and hands them to the reactor via each node's
//! bounded ingress channel. Methods never block on I/O: asynchronous
//! calls return a future immediately, and the synchronous conveniences
//! wait on that future with the configured operation timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use hashring::NodeLocator;
use mio::Waker;
use protocol_memcache::binary::{request as binary_request, Opcode};
use protocol_memcache::Request;

use crate::config::{ClientConfig, ConnectionObserver, FailureMode, LocatorKind, Protocol};
use crate::error::Error;
use crate::future::{promise, Latch, OperationFuture};
use crate::operation::{
    CasResponse, HitMap, OpKind, Operation, RetrieveTarget, Sink, StatsMap, VersionMap,
};
use crate::reactor::{Control, Reactor};
use crate::transcoder::{CachedData, CasValue, Value};

/// Longest accepted key.
pub const MAX_KEY_LEN: usize = 250;

/// Reject keys the server would refuse, before anything is enqueued.
fn validate_key(key: &[u8]) -> Result<(), Error> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey("key too long (max 250 bytes)"));
    }
    for &byte in key {
        if byte == b' ' || byte == b'\r' || byte == b'\n' || byte == 0 {
            return Err(Error::InvalidKey("key contains forbidden byte"));
        }
    }
    Ok(())
}

/// Asynchronous memcached client over a fixed set of servers.
///
/// One background reactor thread services every connection. The client
/// is `Send + Sync`; submissions from any thread go through bounded
/// per-node queues and results come back through futures.
///
/// # Example
///
/// ```no_run
/// use spindle::{Client, ClientConfig};
///
/// # fn main() -> Result<(), spindle::Error> {
/// let servers = vec!["127.0.0.1:11211".parse().unwrap()];
/// let client = Client::new(&servers, ClientConfig::default())?;
/// client.set("hello", 0, "world")?.wait()?;
/// let value = client.get("hello")?.wait()?;
/// assert_eq!(value.unwrap().data.as_ref(), b"world");
/// # Ok(())
/// # }
/// ```
pub struct Client {
    locator: Arc<NodeLocator>,
    addrs: Vec<SocketAddr>,
    actives: Vec<Arc<AtomicBool>>,
    senders: Vec<Sender<Operation>>,
    waker: Arc<Waker>,
    control: Sender<Control>,
    shutdown: Arc<AtomicBool>,
    join: Mutex<Option<thread::JoinHandle<()>>>,
    timeout: Duration,
    protocol: Protocol,
    failure_mode: FailureMode,
    daemon: bool,
}

impl Client {
    /// Connect to `servers` with the given configuration. Connections
    /// are established in the background; operations submitted before a
    /// node comes up queue on that node.
    pub fn new(servers: &[SocketAddr], config: ClientConfig) -> Result<Self, Error> {
        Self::build(servers, config, None)
    }

    /// Like [`Client::new`], with a connection state observer.
    pub fn with_observer(
        servers: &[SocketAddr],
        config: ClientConfig,
        observer: Box<dyn ConnectionObserver>,
    ) -> Result<Self, Error> {
        Self::build(servers, config, Some(observer))
    }

    fn build(
        servers: &[SocketAddr],
        config: ClientConfig,
        observer: Option<Box<dyn ConnectionObserver>>,
    ) -> Result<Self, Error> {
        if servers.is_empty() {
            return Err(Error::Io("at least one server address is required".into()));
        }

        let identities: Vec<String> = servers.iter().map(|addr| addr.to_string()).collect();
        let locator = Arc::new(match config.locator {
            LocatorKind::Ketama => NodeLocator::ketama(&identities, config.hash_alg),
            LocatorKind::Array => NodeLocator::array(servers.len(), config.hash_alg),
        });

        let mut senders = Vec::with_capacity(servers.len());
        let mut receivers = Vec::with_capacity(servers.len());
        let mut actives = Vec::with_capacity(servers.len());
        for _ in servers {
            let (tx, rx) = bounded(config.op_queue_max);
            senders.push(tx);
            receivers.push(rx);
            actives.push(Arc::new(AtomicBool::new(false)));
        }

        let (control_tx, control_rx) = unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));

        let (reactor, waker) = Reactor::new(
            servers,
            receivers,
            actives.clone(),
            Arc::clone(&locator),
            &config,
            control_rx,
            Arc::clone(&shutdown),
            observer,
        )?;

        let handle = thread::Builder::new()
            .name("spindle-io".into())
            .spawn(move || reactor.run())?;

        Ok(Self {
            locator,
            addrs: servers.to_vec(),
            actives,
            senders,
            waker: Arc::new(waker),
            control: control_tx,
            shutdown,
            join: Mutex::new(if config.daemon { None } else { Some(handle) }),
            timeout: config.operation_timeout,
            protocol: config.protocol,
            failure_mode: config.failure_mode,
            daemon: config.daemon,
        })
    }

    // -- Storage -------------------------------------------------------------

    /// Store a value unconditionally.
    pub fn set(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Set, key.as_ref(), 0, exptime, value.as_ref())
    }

    /// Store transcoded data (flags travel with the payload).
    pub fn set_data(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        data: &CachedData,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Set, key.as_ref(), data.flags, exptime, &data.data)
    }

    /// Store only if the key does not exist. Resolves `false` when it
    /// already does.
    pub fn add(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Add, key.as_ref(), 0, exptime, value.as_ref())
    }

    pub fn add_data(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        data: &CachedData,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Add, key.as_ref(), data.flags, exptime, &data.data)
    }

    /// Store only if the key already exists.
    pub fn replace(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Replace, key.as_ref(), 0, exptime, value.as_ref())
    }

    pub fn replace_data(
        &self,
        key: impl AsRef<[u8]>,
        exptime: u32,
        data: &CachedData,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Replace, key.as_ref(), data.flags, exptime, &data.data)
    }

    /// Append bytes to an existing value.
    pub fn append(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Append, key.as_ref(), 0, 0, value.as_ref())
    }

    /// Prepend bytes to an existing value.
    pub fn prepend(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<bool>, Error> {
        self.store(OpKind::Prepend, key.as_ref(), 0, 0, value.as_ref())
    }

    fn store(
        &self,
        kind: OpKind,
        key: &[u8],
        flags: u32,
        exptime: u32,
        data: &[u8],
    ) -> Result<OperationFuture<bool>, Error> {
        validate_key(key)?;
        let payload = self.store_payload(kind, key, flags, exptime, data);
        let (p, f) = promise(self.timeout);
        let op = Operation::new(kind, Some(Bytes::copy_from_slice(key)), payload, Sink::Store(p));
        self.submit(self.route_key(key), op)?;
        Ok(f)
    }

    fn store_payload(
        &self,
        kind: OpKind,
        key: &[u8],
        flags: u32,
        exptime: u32,
        data: &[u8],
    ) -> Vec<u8> {
        match self.protocol {
            Protocol::Ascii => {
                let request = match kind {
                    OpKind::Set => Request::Set {
                        key,
                        flags,
                        exptime,
                        data,
                    },
                    OpKind::Add => Request::Add {
                        key,
                        flags,
                        exptime,
                        data,
                    },
                    OpKind::Replace => Request::Replace {
                        key,
                        flags,
                        exptime,
                        data,
                    },
                    OpKind::Append => Request::Append { key, data },
                    OpKind::Prepend => Request::Prepend { key, data },
                    _ => unreachable!("not a storage command"),
                };
                request.to_bytes()
            }
            Protocol::Binary => {
                let mut buf = Vec::with_capacity(64 + key.len() + data.len());
                match kind {
                    OpKind::Set => {
                        binary_request::store(&mut buf, Opcode::Set, key, flags, exptime, data, 0)
                    }
                    OpKind::Add => {
                        binary_request::store(&mut buf, Opcode::Add, key, flags, exptime, data, 0)
                    }
                    OpKind::Replace => binary_request::store(
                        &mut buf,
                        Opcode::Replace,
                        key,
                        flags,
                        exptime,
                        data,
                        0,
                    ),
                    OpKind::Append => binary_request::concat(&mut buf, Opcode::Append, key, data),
                    OpKind::Prepend => binary_request::concat(&mut buf, Opcode::Prepend, key, data),
                    _ => unreachable!("not a storage command"),
                }
                buf
            }
        }
    }

    /// Compare-and-swap: store only while `cas_id` still matches the
    /// server's current token (from [`Client::gets`]).
    pub fn cas(
        &self,
        key: impl AsRef<[u8]>,
        cas_id: u64,
        exptime: u32,
        value: impl AsRef<[u8]>,
    ) -> Result<OperationFuture<CasResponse>, Error> {
        self.cas_inner(key.as_ref(), cas_id, 0, exptime, value.as_ref())
    }

    pub fn cas_data(
        &self,
        key: impl AsRef<[u8]>,
        cas_id: u64,
        exptime: u32,
        data: &CachedData,
    ) -> Result<OperationFuture<CasResponse>, Error> {
        self.cas_inner(key.as_ref(), cas_id, data.flags, exptime, &data.data)
    }

    fn cas_inner(
        &self,
        key: &[u8],
        cas_id: u64,
        flags: u32,
        exptime: u32,
        data: &[u8],
    ) -> Result<OperationFuture<CasResponse>, Error> {
        validate_key(key)?;
        let payload = match self.protocol {
            Protocol::Ascii => Request::Cas {
                key,
                flags,
                exptime,
                cas: cas_id,
                data,
            }
            .to_bytes(),
            Protocol::Binary => {
                let mut buf = Vec::with_capacity(64 + key.len() + data.len());
                binary_request::store(&mut buf, Opcode::Set, key, flags, exptime, data, cas_id);
                buf
            }
        };
        let (p, f) = promise(self.timeout);
        let op = Operation::new(
            OpKind::Cas,
            Some(Bytes::copy_from_slice(key)),
            payload,
            Sink::Cas(p),
        );
        self.submit(self.route_key(key), op)?;
        Ok(f)
    }

    // -- Retrieval -----------------------------------------------------------

    /// Fetch one key. Resolves `None` on a miss.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<OperationFuture<Option<Value>>, Error> {
        let key = key.as_ref();
        validate_key(key)?;
        let key = Bytes::copy_from_slice(key);
        let (p, f) = promise(self.timeout);
        let op = Operation::new(
            OpKind::Get,
            Some(key.clone()),
            self.retrieval_payload(&[key.as_ref()], false),
            Sink::Retrieve {
                hits: HitMap::default(),
                latch: Arc::new(Latch::new(1)),
                target: RetrieveTarget::One {
                    key: key.clone(),
                    promise: p,
                },
            },
        );
        self.submit(self.route_key(&key), op)?;
        Ok(f)
    }

    /// Fetch one key together with its CAS token.
    pub fn gets(&self, key: impl AsRef<[u8]>) -> Result<OperationFuture<Option<CasValue>>, Error> {
        let key = key.as_ref();
        validate_key(key)?;
        let key = Bytes::copy_from_slice(key);
        let (p, f) = promise(self.timeout);
        let op = Operation::new(
            OpKind::Gets,
            Some(key.clone()),
            self.retrieval_payload(&[key.as_ref()], true),
            Sink::Retrieve {
                hits: HitMap::default(),
                latch: Arc::new(Latch::new(1)),
                target: RetrieveTarget::OneCas {
                    key: key.clone(),
                    promise: p,
                },
            },
        );
        self.submit(self.route_key(&key), op)?;
        Ok(f)
    }

    /// Fetch many keys at once. Keys are grouped per node and fetched
    /// with one command per node; the future resolves when every group
    /// answers. Missing keys are absent from the map, not errors.
    pub fn get_bulk(
        &self,
        keys: &[impl AsRef<[u8]>],
    ) -> Result<OperationFuture<HashMap<Bytes, Value>>, Error> {
        let (p, f) = promise(self.timeout);
        if keys.is_empty() {
            p.fulfill(Ok(HashMap::new()));
            return Ok(f);
        }

        let mut groups: HashMap<usize, Vec<Bytes>> = HashMap::new();
        for key in keys {
            let key = key.as_ref();
            validate_key(key)?;
            let node = self.fallback_route(key);
            groups.entry(node).or_default().push(Bytes::copy_from_slice(key));
        }

        let hits = HitMap::default();
        let latch = Arc::new(Latch::new(groups.len()));
        for (node, group) in groups {
            let refs: Vec<&[u8]> = group.iter().map(|key| key.as_ref()).collect();
            let op = Operation::new(
                OpKind::Get,
                None,
                self.retrieval_payload(&refs, false),
                Sink::Retrieve {
                    hits: Arc::clone(&hits),
                    latch: Arc::clone(&latch),
                    target: RetrieveTarget::Bulk { promise: p.clone() },
                },
            );
            self.submit(node, op)?;
        }
        Ok(f)
    }

    fn retrieval_payload(&self, keys: &[&[u8]], with_cas: bool) -> Vec<u8> {
        match self.protocol {
            Protocol::Ascii => {
                if with_cas {
                    Request::Gets { keys }.to_bytes()
                } else {
                    Request::Get { keys }.to_bytes()
                }
            }
            Protocol::Binary => {
                // Quiet gets suppress misses; the noop flushes the batch
                // and terminates it. CAS tokens always ride in binary
                // response headers.
                let mut buf = Vec::with_capacity(keys.len() * 40 + 24);
                for key in keys {
                    binary_request::getkq(&mut buf, key, 0);
                }
                binary_request::noop(&mut buf);
                buf
            }
        }
    }

    // -- Arithmetic ----------------------------------------------------------

    /// Increment a counter. Resolves the new value, or -1 when the key
    /// does not exist (or holds a non-numeric value).
    pub fn async_incr(
        &self,
        key: impl AsRef<[u8]>,
        by: u64,
    ) -> Result<OperationFuture<i64>, Error> {
        self.mutate(OpKind::Incr, key.as_ref(), by, None)
    }

    /// Decrement a counter; see [`Client::async_incr`].
    pub fn async_decr(
        &self,
        key: impl AsRef<[u8]>,
        by: u64,
    ) -> Result<OperationFuture<i64>, Error> {
        self.mutate(OpKind::Decr, key.as_ref(), by, None)
    }

    /// Synchronous increment, bounded by the operation timeout.
    pub fn incr(&self, key: impl AsRef<[u8]>, by: u64) -> Result<i64, Error> {
        self.async_incr(key, by)?.wait()
    }

    /// Synchronous decrement, bounded by the operation timeout.
    pub fn decr(&self, key: impl AsRef<[u8]>, by: u64) -> Result<i64, Error> {
        self.async_decr(key, by)?.wait()
    }

    /// Increment, seeding the counter with `default` when it does not
    /// exist yet.
    pub fn incr_with_default(
        &self,
        key: impl AsRef<[u8]>,
        by: u64,
        default: u64,
        exptime: u32,
    ) -> Result<i64, Error> {
        self.mutate_with_default(OpKind::Incr, key.as_ref(), by, default, exptime)
    }

    /// Decrement, seeding the counter with `default` when it does not
    /// exist yet.
    pub fn decr_with_default(
        &self,
        key: impl AsRef<[u8]>,
        by: u64,
        default: u64,
        exptime: u32,
    ) -> Result<i64, Error> {
        self.mutate_with_default(OpKind::Decr, key.as_ref(), by, default, exptime)
    }

    fn mutate(
        &self,
        kind: OpKind,
        key: &[u8],
        by: u64,
        seed: Option<(u64, u32)>,
    ) -> Result<OperationFuture<i64>, Error> {
        validate_key(key)?;
        let payload = match self.protocol {
            Protocol::Ascii => match kind {
                OpKind::Incr => Request::Incr { key, delta: by }.to_bytes(),
                _ => Request::Decr { key, delta: by }.to_bytes(),
            },
            Protocol::Binary => {
                let opcode = if kind == OpKind::Incr {
                    Opcode::Increment
                } else {
                    Opcode::Decrement
                };
                let (initial, exptime) = seed.unwrap_or((0, binary_request::NO_CREATE));
                let mut buf = Vec::with_capacity(64 + key.len());
                binary_request::arith(&mut buf, opcode, key, by, initial, exptime);
                buf
            }
        };
        let (p, f) = promise(self.timeout);
        let op = Operation::new(
            kind,
            Some(Bytes::copy_from_slice(key)),
            payload,
            Sink::Mutate(p),
        );
        self.submit(self.route_key(key), op)?;
        Ok(f)
    }

    fn mutate_with_default(
        &self,
        kind: OpKind,
        key: &[u8],
        by: u64,
        default: u64,
        exptime: u32,
    ) -> Result<i64, Error> {
        // The binary protocol seeds server-side via the extras.
        if self.protocol == Protocol::Binary {
            return self.mutate(kind, key, by, Some((default, exptime)))?.wait();
        }

        let value = self.mutate(kind, key, by, None)?.wait()?;
        if value != -1 {
            return Ok(value);
        }
        // The ASCII protocol has no seeded arithmetic: add the default,
        // and if a concurrent writer wins the add, mutate again.
        let added = self
            .store(OpKind::Add, key, 0, exptime, default.to_string().as_bytes())?
            .wait()?;
        if added {
            return Ok(default as i64);
        }
        self.mutate(kind, key, by, None)?.wait()
    }

    // -- Deletion / broadcast ------------------------------------------------

    /// Delete a key. Resolves `true` when it existed.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<OperationFuture<bool>, Error> {
        let key = key.as_ref();
        validate_key(key)?;
        let payload = match self.protocol {
            Protocol::Ascii => Request::Delete { key }.to_bytes(),
            Protocol::Binary => {
                let mut buf = Vec::with_capacity(32 + key.len());
                binary_request::delete(&mut buf, key);
                buf
            }
        };
        let (p, f) = promise(self.timeout);
        let op = Operation::new(
            OpKind::Delete,
            Some(Bytes::copy_from_slice(key)),
            payload,
            Sink::Delete(p),
        );
        self.submit(self.route_key(key), op)?;
        Ok(f)
    }

    /// Flush every node, optionally after `delay` seconds. Resolves
    /// `true` when every node acknowledged.
    pub fn flush(&self, delay: Option<u32>) -> Result<OperationFuture<bool>, Error> {
        let (p, f) = promise(self.timeout);
        let all_ok = Arc::new(AtomicBool::new(true));
        let latch = Arc::new(Latch::new(self.addrs.len()));
        for idx in 0..self.addrs.len() {
            let payload = match self.protocol {
                Protocol::Ascii => Request::FlushAll { delay }.to_bytes(),
                Protocol::Binary => {
                    let mut buf = Vec::with_capacity(32);
                    binary_request::flush(&mut buf, delay);
                    buf
                }
            };
            let op = Operation::new(
                OpKind::Flush,
                None,
                payload,
                Sink::Flush {
                    all_ok: Arc::clone(&all_ok),
                    latch: Arc::clone(&latch),
                    promise: p.clone(),
                },
            );
            self.submit(idx, op)?;
        }
        Ok(f)
    }

    /// Version string of every node, keyed by address.
    pub fn version(&self) -> Result<HashMap<SocketAddr, String>, Error> {
        let (p, f) = promise(self.timeout);
        let out = VersionMap::default();
        let latch = Arc::new(Latch::new(self.addrs.len()));
        for idx in 0..self.addrs.len() {
            let payload = match self.protocol {
                Protocol::Ascii => Request::Version.to_bytes(),
                Protocol::Binary => {
                    let mut buf = Vec::with_capacity(24);
                    binary_request::version(&mut buf);
                    buf
                }
            };
            let op = Operation::new(
                OpKind::Version,
                None,
                payload,
                Sink::Version {
                    out: Arc::clone(&out),
                    addr: self.addrs[idx],
                    latch: Arc::clone(&latch),
                    promise: p.clone(),
                },
            );
            self.submit(idx, op)?;
        }
        f.wait()
    }

    /// Stats from every node, keyed by address. `arg` selects a stats
    /// subset (`items`, `slabs`, ...).
    pub fn stats(
        &self,
        arg: Option<&[u8]>,
    ) -> Result<HashMap<SocketAddr, HashMap<String, String>>, Error> {
        let (p, f) = promise(self.timeout);
        let out = StatsMap::default();
        {
            let mut map = match out.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            for addr in &self.addrs {
                map.insert(*addr, HashMap::new());
            }
        }
        let latch = Arc::new(Latch::new(self.addrs.len()));
        for idx in 0..self.addrs.len() {
            let payload = match self.protocol {
                Protocol::Ascii => Request::Stats { arg }.to_bytes(),
                Protocol::Binary => {
                    let mut buf = Vec::with_capacity(32);
                    binary_request::stat(&mut buf, arg);
                    buf
                }
            };
            let op = Operation::new(
                OpKind::Stats,
                None,
                payload,
                Sink::Stats {
                    out: Arc::clone(&out),
                    addr: self.addrs[idx],
                    latch: Arc::clone(&latch),
                    promise: p.clone(),
                },
            );
            self.submit(idx, op)?;
        }
        f.wait()
    }

    /// Wait until every node has answered a no-op round trip, bounding
    /// the wait by `timeout`. Returns whether the queues drained in
    /// time.
    pub fn wait_for_queues(&self, timeout: Duration) -> bool {
        let (p, f) = promise(timeout);
        let latch = Arc::new(Latch::new(self.addrs.len()));
        for idx in 0..self.addrs.len() {
            let payload = match self.protocol {
                // The ASCII protocol has no no-op; a version round trip
                // serves the same purpose.
                Protocol::Ascii => Request::Version.to_bytes(),
                Protocol::Binary => {
                    let mut buf = Vec::with_capacity(24);
                    binary_request::noop(&mut buf);
                    buf
                }
            };
            let op = Operation::new(
                OpKind::Noop,
                None,
                payload,
                Sink::Noop {
                    latch: Arc::clone(&latch),
                    promise: p.clone(),
                },
            );
            if self.submit(idx, op).is_err() {
                return false;
            }
        }
        f.wait_timeout(timeout).is_ok()
    }

    // -- Introspection / lifecycle -------------------------------------------

    /// A read-only snapshot of the locator in use.
    pub fn node_locator(&self) -> NodeLocator {
        self.locator.readonly_copy()
    }

    /// Server addresses, in node-index order.
    pub fn servers(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Stop accepting work, cancel queued operations, and stop the
    /// reactor thread (joining it unless `daemon` was set).
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.control.send(Control::Shutdown);
        let _ = self.waker.wake();
        let handle = {
            let mut join = match self.join.lock() {
                Ok(join) => join,
                Err(poisoned) => poisoned.into_inner(),
            };
            join.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // -- Internals -----------------------------------------------------------

    fn is_active(&self, idx: usize) -> bool {
        self.actives[idx].load(Ordering::Acquire)
    }

    /// Primary node for a key, honoring the failure mode: in
    /// redistribute mode an inactive primary falls through to the next
    /// live node in the key's sequence.
    fn route_key(&self, key: &[u8]) -> usize {
        let primary = self.locator.primary(key);
        if self.failure_mode == FailureMode::Redistribute && !self.is_active(primary) {
            return self
                .locator
                .sequence(key)
                .find(|&idx| self.is_active(idx))
                .unwrap_or(primary);
        }
        primary
    }

    /// Routing for multi-key gets: always prefer a live node, falling
    /// back to the primary when nothing is up yet.
    fn fallback_route(&self, key: &[u8]) -> usize {
        let primary = self.locator.primary(key);
        if self.is_active(primary) {
            return primary;
        }
        self.locator
            .sequence(key)
            .find(|&idx| self.is_active(idx))
            .unwrap_or(primary)
    }

    fn submit(&self, node: usize, op: Operation) -> Result<(), Error> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::Shutdown);
        }
        match self.senders[node].try_send(op) {
            Ok(()) => {
                let _ = self.waker.wake();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(Error::Shutdown),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if !self.daemon {
            self.shutdown();
        }
    }
}
