//! Promise/future pair for operation results.
//!
//! Completion is idempotent: the first `fulfill` wins and later ones are
//! dropped, which is what guarantees at-most-one status delivery per
//! operation even when a cancel races the real result. Waiters can block
//! (`wait`, `wait_timeout`) or poll as a `std::future::Future`; the
//! timeout belongs to the waiter, never to the operation, so a timed-out
//! wait leaves the operation running.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::error::Error;

struct Inner<T> {
    value: Option<Result<T, Error>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    cancel: Arc<AtomicBool>,
}

impl<T> Shared<T> {
    /// First completion wins; returns whether this call delivered.
    fn fulfill(&self, result: Result<T, Error>) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.value.is_some() {
            return false;
        }
        inner.value = Some(result);
        let wakers = std::mem::take(&mut inner.wakers);
        drop(inner);
        self.cond.notify_all();
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Completion side, held by the operation's sink on the reactor thread.
pub(crate) struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Promise<T> {
    pub fn fulfill(&self, result: Result<T, Error>) -> bool {
        self.shared.fulfill(result)
    }

    /// The cooperative cancellation flag shared with the waiter.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.cancel)
    }
}

/// Waiting side, returned to the caller.
pub struct OperationFuture<T> {
    shared: Arc<Shared<T>>,
    timeout: Duration,
}

impl<T: Clone> OperationFuture<T> {
    /// Block until resolution or the configured operation timeout.
    pub fn wait(&self) -> Result<T, Error> {
        self.wait_timeout(self.timeout)
    }

    /// Block until resolution or `timeout`, whichever is first.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T, Error> {
        let deadline = Instant::now() + timeout;
        let mut inner = match self.shared.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if let Some(result) = &inner.value {
                return result.clone();
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (next, timed_out) = match self.shared.cond.wait_timeout(inner, deadline - now) {
                Ok((inner, wait)) => (inner, wait.timed_out()),
                Err(poisoned) => (poisoned.into_inner().0, false),
            };
            inner = next;
            if timed_out && inner.value.is_none() {
                return Err(Error::Timeout);
            }
        }
    }

    /// The result, if already resolved.
    pub fn try_result(&self) -> Option<Result<T, Error>> {
        let inner = match self.shared.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.value.clone()
    }
}

impl<T> OperationFuture<T> {
    /// Request cancellation. The future resolves to `Cancelled`
    /// immediately; the reactor discards the operation (and its response,
    /// if bytes were already sent) when it next touches it. Bytes already
    /// on the wire cannot be unsent, so the server may still execute the
    /// command.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.fulfill(Err(Error::Cancelled));
    }

    pub fn is_done(&self) -> bool {
        let inner = match self.shared.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.value.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }
}

impl<T: Clone> Future for OperationFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = match self.shared.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(result) = &inner.value {
            return Poll::Ready(result.clone());
        }
        if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            inner.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

/// Create a linked promise/future pair.
pub(crate) fn promise<T>(timeout: Duration) -> (Promise<T>, OperationFuture<T>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            value: None,
            wakers: Vec::new(),
        }),
        cond: Condvar::new(),
        cancel: Arc::new(AtomicBool::new(false)),
    });
    (
        Promise {
            shared: Arc::clone(&shared),
        },
        OperationFuture { shared, timeout },
    )
}

/// Countdown shared by the per-node operations of a broadcast or
/// multi-key get. The composite result materializes when the last
/// component counts down.
pub(crate) struct Latch {
    remaining: AtomicUsize,
}

impl Latch {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
        }
    }

    /// Returns true exactly once, when the count reaches zero.
    pub fn count_down(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|prev| prev == 1)
            .unwrap_or(false)
    }
}
