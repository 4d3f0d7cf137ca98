//! Per-server connection state.
//!
//! A node owns one socket plus three operation queues: a bounded ingress
//! channel (the only cross-thread contact point), a write queue of
//! operations not yet serialized, and a strict-FIFO read queue of
//! operations whose bytes are in the send stream. Responses always
//! reconcile against the head of the read queue. All fields are touched
//! only by the reactor thread.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use mio::net::TcpStream;
use protocol_memcache::binary::BinaryDecoder;
use protocol_memcache::{AsciiDecoder, Frame, ParseError};

use crate::buffer::Buffer;
use crate::config::{ClientConfig, FailureMode, Protocol};
use crate::error::Error;
use crate::operation::{OpState, Operation};

/// Reconnect backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Protocol-selected response decoder.
pub(crate) enum Decoder {
    Ascii(AsciiDecoder),
    Binary(BinaryDecoder),
}

impl Decoder {
    fn new(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Ascii => Decoder::Ascii(AsciiDecoder::new()),
            Protocol::Binary => Decoder::Binary(BinaryDecoder::new()),
        }
    }

    fn decode(&mut self, input: &[u8]) -> Result<(Option<Frame>, usize), ParseError> {
        match self {
            Decoder::Ascii(decoder) => decoder.decode(input),
            Decoder::Binary(decoder) => decoder.decode(input),
        }
    }

    fn reset(&mut self) {
        match self {
            Decoder::Ascii(decoder) => decoder.reset(),
            Decoder::Binary(decoder) => decoder.reset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    /// No socket; a connect attempt is due at `retry_at`.
    Disconnected { retry_at: Instant },
    /// Non-blocking connect in flight; resolution arrives as a
    /// writability event.
    Connecting,
    Connected,
}

pub(crate) struct Node {
    pub addr: SocketAddr,
    pub stream: Option<TcpStream>,
    pub conn: ConnState,
    /// Bounded multi-producer ingress; submission failure is the
    /// caller's backpressure signal.
    pub ingress: Receiver<Operation>,
    pub write_queue: VecDeque<Operation>,
    pub read_queue: VecDeque<Operation>,
    send_buf: Buffer,
    recv_buf: Buffer,
    decoder: Decoder,
    /// Cumulative bytes staged into the send buffer.
    bytes_buffered: u64,
    /// Cumulative bytes confirmed written to the socket.
    bytes_flushed: u64,
    /// Soft cap on staged-but-unflushed bytes.
    write_buf_size: usize,
    pub reconnect_attempts: u32,
    /// Completed connection count; the observer's reconnect counter.
    pub established_count: u32,
    /// Shared with the routing snapshot on caller threads.
    pub active: Arc<AtomicBool>,
}

impl Node {
    pub fn new(
        addr: SocketAddr,
        ingress: Receiver<Operation>,
        active: Arc<AtomicBool>,
        config: &ClientConfig,
        now: Instant,
    ) -> Self {
        Self {
            addr,
            stream: None,
            conn: ConnState::Disconnected { retry_at: now },
            ingress,
            write_queue: VecDeque::new(),
            read_queue: VecDeque::new(),
            send_buf: Buffer::with_capacity(config.write_buf_size),
            recv_buf: Buffer::with_capacity(config.read_buf_size),
            decoder: Decoder::new(config.protocol),
            bytes_buffered: 0,
            bytes_flushed: 0,
            write_buf_size: config.write_buf_size,
            reconnect_attempts: 0,
            established_count: 0,
            active,
        }
    }

    /// Move newly submitted operations onto the write queue. Returns the
    /// number accepted.
    pub fn drain_ingress(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(mut op) = self.ingress.try_recv() {
            if op.is_cancelled() {
                op.fail(Error::Cancelled);
                continue;
            }
            self.write_queue.push_back(op);
            accepted += 1;
        }
        accepted
    }

    /// True when there are bytes or operations waiting to go out.
    pub fn wants_write(&self) -> bool {
        !self.send_buf.is_empty() || !self.write_queue.is_empty()
    }

    /// Serialize queued operations into the send buffer, bounded by the
    /// configured write buffer size.
    pub fn stage_writes(&mut self) {
        while self.send_buf.len() < self.write_buf_size {
            let Some(mut op) = self.write_queue.pop_front() else {
                break;
            };
            if op.is_cancelled() {
                // Nothing was sent for this operation.
                op.fail(Error::Cancelled);
                continue;
            }
            self.send_buf.extend_from_slice(&op.payload);
            self.bytes_buffered += op.payload.len() as u64;
            op.bytes_end = self.bytes_buffered;
            op.state = OpState::Writing;
            self.read_queue.push_back(op);
        }
    }

    /// Flush the send buffer to the socket and advance operations whose
    /// bytes are fully on the wire.
    pub fn flush(&mut self) -> io::Result<()> {
        loop {
            if self.send_buf.is_empty() {
                break;
            }
            let result = {
                let Some(stream) = self.stream.as_mut() else {
                    break;
                };
                self.send_buf.write_to(stream)
            };
            match result {
                Ok(0) => break,
                Ok(n) => self.bytes_flushed += n as u64,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        for op in self.read_queue.iter_mut() {
            if op.state != OpState::Writing {
                continue;
            }
            if op.bytes_end <= self.bytes_flushed {
                op.state = OpState::Reading;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// Read from the socket and reconcile decoded frames against the
    /// head of the read queue.
    pub fn receive(&mut self) -> Result<(), Error> {
        loop {
            let result = {
                let Some(stream) = self.stream.as_mut() else {
                    return Ok(());
                };
                self.recv_buf.read_from(stream)
            };
            match result {
                Ok(0) => return Err(Error::ConnectionLost),
                Ok(_) => self.dispatch_frames()?,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn dispatch_frames(&mut self) -> Result<(), Error> {
        loop {
            let (frame, consumed) = self.decoder.decode(self.recv_buf.as_slice())?;
            self.recv_buf.consume(consumed);
            let Some(frame) = frame else {
                return Ok(());
            };
            let Some(head) = self.read_queue.front_mut() else {
                return Err(Error::Protocol("response without pending operation".into()));
            };
            if head.handle_frame(frame)? {
                self.read_queue.pop_front();
            }
        }
    }

    /// Connect attempt resolved successfully.
    pub fn on_connected(&mut self) {
        self.conn = ConnState::Connected;
        self.active.store(true, Ordering::Release);
        self.reconnect_attempts = 0;
        self.established_count += 1;
        // Replayed operations re-enter the queue state machine.
        for op in self.write_queue.iter_mut() {
            if op.state == OpState::Retry {
                op.state = OpState::WriteQueued;
            }
        }
    }

    /// Tear down the connection and settle queued operations per the
    /// failure mode. Returns single-key operations to reroute
    /// (Redistribute mode only).
    pub fn on_disconnect(&mut self, mode: FailureMode, now: Instant) -> Vec<Operation> {
        self.stream = None;
        self.active.store(false, Ordering::Release);
        self.send_buf.clear();
        self.recv_buf.clear();
        self.decoder.reset();
        self.bytes_buffered = 0;
        self.bytes_flushed = 0;

        // Anything at least partially written cannot be replayed: the
        // replacement connection would desynchronize the stream.
        for mut op in self.read_queue.drain(..) {
            match mode {
                FailureMode::Retry => op.fail(Error::Cancelled),
                FailureMode::Cancel | FailureMode::Redistribute => {
                    op.fail(Error::ConnectionLost)
                }
            }
        }

        let mut reroute = Vec::new();
        match mode {
            FailureMode::Retry => {
                for op in self.write_queue.iter_mut() {
                    op.state = OpState::Retry;
                }
            }
            FailureMode::Cancel => {
                for mut op in self.write_queue.drain(..) {
                    op.fail(Error::ConnectionLost);
                }
            }
            FailureMode::Redistribute => {
                for mut op in self.write_queue.drain(..) {
                    if op.key.is_some() && op.is_replayable() {
                        op.state = OpState::WriteQueued;
                        reroute.push(op);
                    } else {
                        op.fail(Error::ConnectionLost);
                    }
                }
            }
        }

        let backoff = Duration::from_secs(1u64 << self.reconnect_attempts.min(5)).min(MAX_BACKOFF);
        self.conn = ConnState::Disconnected {
            retry_at: now + backoff,
        };
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        reroute
    }

    /// Fail everything queued on this node (shutdown path).
    pub fn fail_all(&mut self, err: Error) {
        self.drain_ingress();
        for mut op in self.write_queue.drain(..) {
            op.fail(err.clone());
        }
        for mut op in self.read_queue.drain(..) {
            op.fail(err.clone());
        }
    }

    /// Next reconnect deadline, when disconnected.
    pub fn retry_at(&self) -> Option<Instant> {
        match self.conn {
            ConnState::Disconnected { retry_at } => Some(retry_at),
            _ => None,
        }
    }
}
