//! One request/response unit and its result plumbing.
//!
//! Decoded [`Frame`]s are dispatched to the operation's [`Sink`] — a
//! tagged variant per result shape rather than a callback object — by a
//! single `match`. Completion flows through [`Promise`]s whose first
//! fulfillment wins, so every operation delivers at most one status no
//! matter how completion, cancellation and connection loss interleave.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use protocol_memcache::{Frame, Reply};

use crate::error::Error;
use crate::future::{Latch, Promise};
use crate::transcoder::{CasValue, Value};

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResponse {
    /// The token matched and the value was stored.
    Ok,
    /// The key no longer exists.
    NotFound,
    /// The token was stale; another writer got there first.
    Exists,
    /// The server's answer could not be interpreted.
    ObserveError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Get,
    Gets,
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
    Delete,
    Incr,
    Decr,
    Flush,
    Version,
    Stats,
    Noop,
}

/// Lifecycle of an operation on its node. Advances monotonically except
/// for `Retry -> WriteQueued` when a connection is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpState {
    WriteQueued,
    Writing,
    Reading,
    Complete,
    Cancelled,
    Retry,
}

/// Shared hit accumulator: key -> (flags, cas, data).
pub(crate) type HitMap = Arc<Mutex<HashMap<Bytes, (u32, Option<u64>, Bytes)>>>;
pub(crate) type StatsMap = Arc<Mutex<HashMap<SocketAddr, HashMap<String, String>>>>;
pub(crate) type VersionMap = Arc<Mutex<HashMap<SocketAddr, String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// How a retrieval materializes its result once its latch drains.
pub(crate) enum RetrieveTarget {
    One {
        key: Bytes,
        promise: Promise<Option<Value>>,
    },
    OneCas {
        key: Bytes,
        promise: Promise<Option<CasValue>>,
    },
    Bulk {
        promise: Promise<HashMap<Bytes, Value>>,
    },
}

/// Result plumbing, one variant per operation shape.
pub(crate) enum Sink {
    Store(Promise<bool>),
    Cas(Promise<CasResponse>),
    Delete(Promise<bool>),
    Mutate(Promise<i64>),
    Retrieve {
        hits: HitMap,
        latch: Arc<Latch>,
        target: RetrieveTarget,
    },
    Stats {
        out: StatsMap,
        addr: SocketAddr,
        latch: Arc<Latch>,
        promise: Promise<HashMap<SocketAddr, HashMap<String, String>>>,
    },
    Version {
        out: VersionMap,
        addr: SocketAddr,
        latch: Arc<Latch>,
        promise: Promise<HashMap<SocketAddr, String>>,
    },
    Flush {
        all_ok: Arc<AtomicBool>,
        latch: Arc<Latch>,
        promise: Promise<bool>,
    },
    Noop {
        latch: Arc<Latch>,
        promise: Promise<()>,
    },
}

pub(crate) struct Operation {
    pub kind: OpKind,
    /// Routing key for single-key operations; `None` for broadcasts and
    /// multi-key gets (those are never rerouted).
    pub key: Option<Bytes>,
    /// Pre-encoded command bytes.
    pub payload: Vec<u8>,
    pub sink: Sink,
    pub state: OpState,
    /// Shared with the caller's future; checked cooperatively.
    pub cancel: Arc<AtomicBool>,
    /// Cumulative send-stream offset at which this operation's bytes
    /// end; set when the payload is copied into the node's send buffer.
    pub bytes_end: u64,
}

impl Operation {
    pub fn new(kind: OpKind, key: Option<Bytes>, payload: Vec<u8>, sink: Sink) -> Self {
        let cancel = sink.cancel_token();
        Self {
            kind,
            key,
            payload,
            sink,
            state: OpState::WriteQueued,
            cancel,
            bytes_end: 0,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Still safe to replay on another connection: nothing was written.
    #[inline]
    pub fn is_replayable(&self) -> bool {
        matches!(self.state, OpState::WriteQueued | OpState::Retry)
    }

    /// Apply one decoded frame. `Ok(true)` when the operation finished.
    /// An `Err` is a reconciliation failure and drops the connection.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<bool, Error> {
        match frame {
            Frame::Value {
                key,
                flags,
                cas,
                data,
            } => match &self.sink {
                Sink::Retrieve { hits, .. } => {
                    // A cancelled operation's response is parsed and
                    // discarded to keep the stream in sync.
                    if !self.is_cancelled() {
                        lock(hits).insert(key, (flags, cas, data));
                    }
                    Ok(false)
                }
                _ => Err(Error::Protocol("unexpected VALUE frame".into())),
            },

            Frame::Stat { name, value } => match &self.sink {
                Sink::Stats { out, addr, .. } => {
                    if !self.is_cancelled() {
                        lock(out).entry(*addr).or_default().insert(
                            String::from_utf8_lossy(&name).into_owned(),
                            String::from_utf8_lossy(&value).into_owned(),
                        );
                    }
                    Ok(false)
                }
                _ => Err(Error::Protocol("unexpected STAT frame".into())),
            },

            Frame::Done(reply) => {
                self.complete(reply)?;
                Ok(true)
            }
        }
    }

    /// Terminal reply received: resolve this operation.
    fn complete(&mut self, reply: Reply) -> Result<(), Error> {
        self.state = if self.is_cancelled() {
            OpState::Cancelled
        } else {
            OpState::Complete
        };

        match &self.sink {
            Sink::Store(promise) => {
                let result = match reply {
                    Reply::Stored => Ok(true),
                    Reply::NotStored | Reply::NotFound | Reply::Exists => Ok(false),
                    other => reply_error(other)?,
                };
                promise.fulfill(result);
            }

            Sink::Cas(promise) => {
                let result = match reply {
                    Reply::Stored => Ok(CasResponse::Ok),
                    Reply::Exists => Ok(CasResponse::Exists),
                    Reply::NotFound => Ok(CasResponse::NotFound),
                    Reply::NotStored => {
                        // The server must answer a cas with one of the
                        // three outcomes above.
                        let err = Error::Protocol("NOT_STORED in cas response".into());
                        promise.fulfill(Err(err.clone()));
                        return Err(err);
                    }
                    other => reply_error(other)?,
                };
                promise.fulfill(result);
            }

            Sink::Delete(promise) => {
                let result = match reply {
                    Reply::Deleted => Ok(true),
                    Reply::NotFound => Ok(false),
                    other => reply_error(other)?,
                };
                promise.fulfill(result);
            }

            Sink::Mutate(promise) => {
                // The counter value rides in the status line; any
                // unsuccessful status maps to -1 rather than an error.
                let result = match reply {
                    Reply::Numeric(n) => Ok(n as i64),
                    Reply::NotFound => Ok(-1),
                    Reply::Error | Reply::ClientError(_) | Reply::ServerError(_) => {
                        tracing::debug!(reply = ?reply, "mutate failed");
                        Ok(-1)
                    }
                    _ => {
                        let err = Error::Protocol("unexpected mutate response".into());
                        promise.fulfill(Err(err.clone()));
                        return Err(err);
                    }
                };
                promise.fulfill(result);
            }

            Sink::Retrieve {
                hits,
                latch,
                target,
            } => {
                match reply {
                    Reply::End => {}
                    Reply::Error | Reply::ClientError(_) | Reply::ServerError(_) => {
                        // Failed shards surface as missing keys.
                        tracing::warn!(reply = ?reply, "unsuccessful get");
                    }
                    _ => {
                        return Err(Error::Protocol("unexpected get response".into()));
                    }
                }
                if latch.count_down() {
                    finish_retrieve(hits, target);
                }
            }

            Sink::Stats {
                out,
                latch,
                promise,
                ..
            } => {
                match reply {
                    Reply::End => {}
                    Reply::Error | Reply::ClientError(_) | Reply::ServerError(_) => {
                        tracing::warn!(reply = ?reply, "unsuccessful stat fetch");
                    }
                    _ => {
                        return Err(Error::Protocol("unexpected stats response".into()));
                    }
                }
                if latch.count_down() {
                    promise.fulfill(Ok(lock(out).clone()));
                }
            }

            Sink::Version {
                out,
                addr,
                latch,
                promise,
            } => {
                match reply {
                    Reply::Version(version) => {
                        if !self.cancel.load(Ordering::Acquire) {
                            lock(out).insert(
                                *addr,
                                String::from_utf8_lossy(&version).into_owned(),
                            );
                        }
                    }
                    Reply::Error | Reply::ClientError(_) | Reply::ServerError(_) => {
                        tracing::warn!(reply = ?reply, "unsuccessful version fetch");
                    }
                    _ => {
                        return Err(Error::Protocol("unexpected version response".into()));
                    }
                }
                if latch.count_down() {
                    promise.fulfill(Ok(lock(out).clone()));
                }
            }

            Sink::Flush {
                all_ok,
                latch,
                promise,
            } => {
                match reply {
                    Reply::Ok => {}
                    Reply::Error | Reply::ClientError(_) | Reply::ServerError(_) => {
                        tracing::warn!(reply = ?reply, "unsuccessful flush");
                        all_ok.store(false, Ordering::Release);
                    }
                    _ => {
                        return Err(Error::Protocol("unexpected flush response".into()));
                    }
                }
                if latch.count_down() {
                    promise.fulfill(Ok(all_ok.load(Ordering::Acquire)));
                }
            }

            Sink::Noop { latch, promise } => {
                // Anything terminal counts: the carrier command differs
                // per protocol and only the round trip matters.
                if latch.count_down() {
                    promise.fulfill(Ok(()));
                }
            }
        }
        Ok(())
    }

    /// Resolve with a failure (connection loss, shutdown, cancellation).
    /// Latched sinks still count down so sibling operations' composites
    /// make progress.
    pub fn fail(&mut self, err: Error) {
        self.state = if matches!(err, Error::Cancelled) {
            OpState::Cancelled
        } else {
            OpState::Complete
        };

        match &self.sink {
            Sink::Store(promise) => {
                promise.fulfill(Err(err));
            }
            Sink::Cas(promise) => {
                promise.fulfill(Err(err));
            }
            Sink::Delete(promise) => {
                promise.fulfill(Err(err));
            }
            Sink::Mutate(promise) => {
                promise.fulfill(Err(err));
            }
            Sink::Retrieve { latch, target, .. } => {
                match target {
                    RetrieveTarget::One { promise, .. } => {
                        promise.fulfill(Err(err));
                    }
                    RetrieveTarget::OneCas { promise, .. } => {
                        promise.fulfill(Err(err));
                    }
                    RetrieveTarget::Bulk { promise } => {
                        promise.fulfill(Err(err));
                    }
                }
                latch.count_down();
            }
            Sink::Stats { latch, promise, .. } => {
                promise.fulfill(Err(err));
                latch.count_down();
            }
            Sink::Version { latch, promise, .. } => {
                promise.fulfill(Err(err));
                latch.count_down();
            }
            Sink::Flush { latch, promise, .. } => {
                promise.fulfill(Err(err));
                latch.count_down();
            }
            Sink::Noop { latch, promise } => {
                promise.fulfill(Err(err));
                latch.count_down();
            }
        }
    }
}

impl Sink {
    /// The cancellation token of the future this sink resolves.
    fn cancel_token(&self) -> Arc<AtomicBool> {
        match self {
            Sink::Store(promise) => promise.cancel_token(),
            Sink::Cas(promise) => promise.cancel_token(),
            Sink::Delete(promise) => promise.cancel_token(),
            Sink::Mutate(promise) => promise.cancel_token(),
            Sink::Retrieve { target, .. } => match target {
                RetrieveTarget::One { promise, .. } => promise.cancel_token(),
                RetrieveTarget::OneCas { promise, .. } => promise.cancel_token(),
                RetrieveTarget::Bulk { promise } => promise.cancel_token(),
            },
            Sink::Stats { promise, .. } => promise.cancel_token(),
            Sink::Version { promise, .. } => promise.cancel_token(),
            Sink::Flush { promise, .. } => promise.cancel_token(),
            Sink::Noop { promise, .. } => promise.cancel_token(),
        }
    }
}

/// Map an error reply onto the operation error, or flag a
/// reconciliation failure for anything else.
fn reply_error<T>(reply: Reply) -> Result<Result<T, Error>, Error> {
    let err = match reply {
        Reply::Error => Error::Protocol("ERROR".into()),
        Reply::ClientError(msg) => Error::Client(msg),
        Reply::ServerError(msg) => Error::Server(msg),
        other => {
            return Err(Error::Protocol(format!("unexpected reply: {other:?}")));
        }
    };
    Ok(Err(err))
}

fn finish_retrieve(hits: &HitMap, target: &RetrieveTarget) {
    let hits = lock(hits);
    match target {
        RetrieveTarget::One { key, promise } => {
            let value = hits.get(key).map(|(flags, _, data)| Value {
                flags: *flags,
                data: data.clone(),
            });
            promise.fulfill(Ok(value));
        }
        RetrieveTarget::OneCas { key, promise } => {
            let value = hits.get(key).and_then(|(flags, cas, data)| {
                cas.map(|cas| CasValue {
                    cas,
                    value: Value {
                        flags: *flags,
                        data: data.clone(),
                    },
                })
            });
            promise.fulfill(Ok(value));
        }
        RetrieveTarget::Bulk { promise } => {
            let map = hits
                .iter()
                .map(|(key, (flags, _, data))| {
                    (
                        key.clone(),
                        Value {
                            flags: *flags,
                            data: data.clone(),
                        },
                    )
                })
                .collect();
            promise.fulfill(Ok(map));
        }
    }
}
