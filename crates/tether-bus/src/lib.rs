//! In-process typed publish/subscribe for Tether.
//!
//! The [`Bus`] is the only cross-component communication primitive in the
//! core: connection wrappers republish transport signals on an event bus and
//! decoded packets on a message bus, and every consumer (handshake, session,
//! driver) awaits those streams instead of calling into other components.
//!
//! Two guarantees matter to the rest of the system:
//!
//! 1. Values are delivered to each subscriber in publish order.
//! 2. A subscriber added after a publish never sees that value — only
//!    values published after `subscribe()` returns.
//!
//! Disposing a bus ends every subscriber's stream terminally (`recv()`
//! returns `None`); it is never surfaced as an error.
//!
//! The companion [`first_of`] utility expresses the system's single blocking
//! idiom: race two awaited sources against a timeout, with the losing
//! branches dropped (and therefore cancelled) in one place.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

/// Default channel depth per subscriber. Handshake and service loops consume
/// promptly, so this only needs to absorb short bursts.
const DEFAULT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// A typed broadcast channel with explicit disposal.
///
/// Cloning a `Bus` clones the handle, not the channel: all clones publish
/// into, and dispose, the same underlying stream.
pub struct Bus<T> {
    inner: Arc<Mutex<Option<broadcast::Sender<T>>>>,
}

impl<T> Clone for Bus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Bus<T> {
    /// Creates a bus with the default channel depth.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus whose subscribers can buffer `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Publishes a value to every current subscriber.
    ///
    /// Publishing with no subscribers, or after [`dispose`](Self::dispose),
    /// drops the value; both are normal (a message arriving while nothing
    /// is listening is dropped by design) and reported at debug level.
    pub fn publish(&self, value: T) {
        let guard = self.inner.lock().expect("bus lock poisoned");
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(value).is_err() {
                    tracing::debug!("bus publish with no subscribers; value dropped");
                }
            }
            None => {
                tracing::debug!("bus publish after dispose; value dropped");
            }
        }
    }

    /// Registers a new subscriber.
    ///
    /// The subscriber sees only values published after this call. Subscribing
    /// to a disposed bus yields a stream that is already ended.
    pub fn subscribe(&self) -> BusStream<T> {
        let guard = self.inner.lock().expect("bus lock poisoned");
        BusStream {
            rx: guard.as_ref().map(|tx| tx.subscribe()),
        }
    }

    /// Ends the stream for all subscribers. Idempotent.
    pub fn dispose(&self) {
        let mut guard = self.inner.lock().expect("bus lock poisoned");
        guard.take();
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.lock().expect("bus lock poisoned").is_none()
    }
}

// ---------------------------------------------------------------------------
// BusStream
// ---------------------------------------------------------------------------

/// One subscriber's view of a [`Bus`].
pub struct BusStream<T> {
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> BusStream<T> {
    /// Receives the next value, or `None` once the bus is disposed.
    ///
    /// A subscriber that falls too far behind skips the overwritten values
    /// with a warning rather than erroring; liveness matters more here than
    /// completeness (delivery is best-effort by design).
    pub async fn recv(&mut self) -> Option<T> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "bus subscriber lagged; values dropped");
                }
            }
        }
    }

    /// Receives values until one matches `pred`, returning it.
    ///
    /// Returns `None` if the bus is disposed before a match arrives.
    pub async fn first_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        while let Some(value) = self.recv().await {
            if pred(&value) {
                return Some(value);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// first_of — race two sources against a timeout
// ---------------------------------------------------------------------------

/// The result of racing two awaited sources against a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<L, R> {
    /// The left source resolved first.
    Left(L),
    /// The right source resolved first.
    Right(R),
    /// Neither source resolved within the window.
    TimedOut,
}

impl<L, R> Outcome<L, R> {
    /// Returns `true` for [`Outcome::TimedOut`].
    pub fn timed_out(&self) -> bool {
        matches!(self, Outcome::TimedOut)
    }
}

/// Awaits whichever of `left` and `right` resolves first, bounded by
/// `window`. Exactly one outcome is produced; the losing branches (the other
/// source and the timer) are dropped, which cancels them.
pub async fn first_of<L, R>(
    left: impl Future<Output = L>,
    right: impl Future<Output = R>,
    window: Duration,
) -> Outcome<L, R> {
    tokio::select! {
        l = left => Outcome::Left(l),
        r = right => Outcome::Right(r),
        _ = tokio::time::sleep(window) => Outcome::TimedOut,
    }
}

// =========================================================================
// Tests
// =========================================================================
