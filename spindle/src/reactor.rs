//! The I/O reactor: one thread owning every socket, buffer and queue.
//!
//! Application threads only touch the bounded ingress channels, the
//! waker, and future state; everything else is single-threaded inside
//! [`Reactor::run`]. Each tick drains ingress, initiates due reconnects,
//! stages and flushes writes, then polls for readiness with a bounded
//! timeout so reconnect timers are honored. Errors inside the loop are
//! logged and handled per failure mode; only a failing poll is fatal.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use hashring::NodeLocator;
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};

use crate::config::{ClientConfig, ConnectionObserver, FailureMode};
use crate::error::Error;
use crate::node::{ConnState, Node};
use crate::operation::Operation;

/// Token reserved for the cross-thread waker.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Upper bound on one poll; keeps reconnect timers responsive.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Messages from the façade to the reactor.
pub(crate) enum Control {
    Shutdown,
}

pub(crate) struct Reactor {
    poll: Poll,
    events: Events,
    nodes: Vec<Node>,
    control: Receiver<Control>,
    shutdown: Arc<AtomicBool>,
    failure_mode: FailureMode,
    locator: Arc<NodeLocator>,
    observer: Option<Box<dyn ConnectionObserver>>,
}

impl Reactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        addrs: &[SocketAddr],
        receivers: Vec<Receiver<Operation>>,
        actives: Vec<Arc<AtomicBool>>,
        locator: Arc<NodeLocator>,
        config: &ClientConfig,
        control: Receiver<Control>,
        shutdown: Arc<AtomicBool>,
        observer: Option<Box<dyn ConnectionObserver>>,
    ) -> io::Result<(Self, Waker)> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;

        let now = Instant::now();
        let nodes = addrs
            .iter()
            .zip(receivers)
            .zip(actives)
            .map(|((&addr, ingress), active)| Node::new(addr, ingress, active, config, now))
            .collect();

        Ok((
            Self {
                poll,
                events: Events::with_capacity(256),
                nodes,
                control,
                shutdown,
                failure_mode: config.failure_mode,
                locator,
                observer,
            },
            waker,
        ))
    }

    pub fn run(mut self) {
        loop {
            while let Ok(Control::Shutdown) = self.control.try_recv() {
                self.shutdown.store(true, Ordering::Release);
            }
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            let now = Instant::now();
            for idx in 0..self.nodes.len() {
                self.service_node(idx, now);
            }

            let timeout = self.poll_timeout(Instant::now());
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Losing the selector is unrecoverable.
                    tracing::error!(error = %err, "poll failed, shutting down");
                    self.shutdown.store(true, Ordering::Release);
                    break;
                }
            }

            let events: Vec<(Token, bool, bool)> = self
                .events
                .iter()
                .map(|event| {
                    (
                        event.token(),
                        event.is_readable() || event.is_read_closed() || event.is_error(),
                        event.is_writable() || event.is_write_closed() || event.is_error(),
                    )
                })
                .collect();

            let now = Instant::now();
            for (token, readable, writable) in events {
                if token == WAKE_TOKEN {
                    // Woken for ingress; drained at the top of the tick.
                    continue;
                }
                if token.0 < self.nodes.len() {
                    self.handle_node_event(token.0, readable, writable, now);
                }
            }
        }

        self.settle_on_shutdown();
    }

    /// Per-tick service: ingress, reconnect timers, pending writes.
    fn service_node(&mut self, idx: usize, now: Instant) {
        self.nodes[idx].drain_ingress();

        match self.nodes[idx].conn {
            ConnState::Disconnected { retry_at } if retry_at <= now => {
                self.initiate_connect(idx, now);
            }
            ConnState::Connected if self.nodes[idx].wants_write() => {
                self.nodes[idx].stage_writes();
                if let Err(err) = self.nodes[idx].flush() {
                    self.disconnect(idx, Error::from(err), now);
                }
            }
            _ => {}
        }
    }

    fn handle_node_event(&mut self, idx: usize, readable: bool, writable: bool, now: Instant) {
        if writable {
            match self.nodes[idx].conn {
                ConnState::Connecting => self.finish_connect(idx, now),
                ConnState::Connected => {
                    if let Err(err) = self.nodes[idx].flush() {
                        self.disconnect(idx, Error::from(err), now);
                        return;
                    }
                }
                ConnState::Disconnected { .. } => {}
            }
        }

        if readable && self.nodes[idx].conn == ConnState::Connected {
            if let Err(err) = self.nodes[idx].receive() {
                self.disconnect(idx, err, now);
            }
        }
    }

    fn initiate_connect(&mut self, idx: usize, now: Instant) {
        let addr = self.nodes[idx].addr;
        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                if let Err(err) =
                    self.poll
                        .registry()
                        .register(&mut stream, Token(idx), Interest::READABLE | Interest::WRITABLE)
                {
                    tracing::warn!(addr = %addr, error = %err, "socket registration failed");
                    self.connect_attempt_failed(idx, now);
                    return;
                }
                tracing::debug!(addr = %addr, "connecting");
                self.nodes[idx].stream = Some(stream);
                self.nodes[idx].conn = ConnState::Connecting;
            }
            Err(err) => {
                tracing::debug!(addr = %addr, error = %err, "connect failed");
                self.connect_attempt_failed(idx, now);
            }
        }
    }

    /// A connecting socket became writable: resolve the attempt.
    fn finish_connect(&mut self, idx: usize, now: Instant) {
        let verdict = {
            let Some(stream) = self.nodes[idx].stream.as_ref() else {
                return;
            };
            match stream.take_error() {
                Ok(Some(err)) | Err(err) => Err(err),
                Ok(None) => match stream.peer_addr() {
                    Ok(_) => Ok(()),
                    Err(err) if err.kind() == io::ErrorKind::NotConnected => return,
                    Err(err) => Err(err),
                },
            }
        };

        let addr = self.nodes[idx].addr;
        match verdict {
            Ok(()) => {
                self.nodes[idx].on_connected();
                let reconnect_count = self.nodes[idx].established_count - 1;
                tracing::debug!(addr = %addr, reconnect_count, "connection established");
                if let Some(observer) = &self.observer {
                    observer.connection_established(addr, reconnect_count);
                }
                // Replay anything queued while we were down.
                self.nodes[idx].stage_writes();
                if let Err(err) = self.nodes[idx].flush() {
                    self.disconnect(idx, Error::from(err), now);
                }
            }
            Err(err) => {
                tracing::debug!(addr = %addr, error = %err, "connect failed");
                self.connect_attempt_failed(idx, now);
            }
        }
    }

    /// A connect attempt failed before being established: back off and
    /// settle queued work per failure mode, without notifying the
    /// observer (nothing was lost).
    fn connect_attempt_failed(&mut self, idx: usize, now: Instant) {
        self.drop_stream(idx);
        let reroute = self.nodes[idx].on_disconnect(self.failure_mode, now);
        self.redistribute(idx, reroute, now);
    }

    /// An established connection dropped.
    fn disconnect(&mut self, idx: usize, err: Error, now: Instant) {
        let addr = self.nodes[idx].addr;
        tracing::warn!(addr = %addr, error = %err, "connection lost");
        self.drop_stream(idx);
        let reroute = self.nodes[idx].on_disconnect(self.failure_mode, now);
        if let Some(observer) = &self.observer {
            observer.connection_lost(addr);
        }
        self.redistribute(idx, reroute, now);
    }

    fn drop_stream(&mut self, idx: usize) {
        if let Some(mut stream) = self.nodes[idx].stream.take() {
            let _ = self.poll.registry().deregister(&mut stream);
        }
    }

    /// Move replayable single-key operations from a dead node to the
    /// next live node in each key's fallback sequence.
    fn redistribute(&mut self, from: usize, ops: Vec<Operation>, now: Instant) {
        for mut op in ops {
            let Some(key) = op.key.clone() else {
                op.fail(Error::ConnectionLost);
                continue;
            };
            let target = self
                .locator
                .sequence(&key)
                .find(|&idx| idx != from && self.nodes[idx].conn == ConnState::Connected);
            match target {
                Some(target) => {
                    tracing::debug!(
                        from = %self.nodes[from].addr,
                        to = %self.nodes[target].addr,
                        "rerouting operation"
                    );
                    self.nodes[target].write_queue.push_back(op);
                    self.service_node(target, now);
                }
                None => op.fail(Error::ConnectionLost),
            }
        }
    }

    fn poll_timeout(&self, now: Instant) -> Duration {
        let mut timeout = MAX_POLL_INTERVAL;
        for node in &self.nodes {
            if let Some(retry_at) = node.retry_at() {
                timeout = timeout.min(retry_at.saturating_duration_since(now));
            }
        }
        timeout
    }

    /// Cancel everything still queued and tear down sockets.
    fn settle_on_shutdown(&mut self) {
        tracing::debug!("reactor shutting down");
        for idx in 0..self.nodes.len() {
            self.drop_stream(idx);
            self.nodes[idx].active.store(false, Ordering::Release);
            self.nodes[idx].fail_all(Error::Cancelled);
        }
    }
}
