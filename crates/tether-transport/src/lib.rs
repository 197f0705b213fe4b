//! Transport abstraction layer for Tether.
//!
//! Provides the capability traits the core consumes — [`Transport`] /
//! [`Connection`] on the accepting side, [`ClientTransport`] on the dialing
//! side — plus the lifecycle [`Event`]s that transports republish so the
//! rest of the system never touches a socket directly.
//!
//! The concrete endpoints are Unix domain sockets ([`UnixServerTransport`],
//! [`UnixConnection`], [`Dialer`]) with form-feed-delimited JSON frames, and
//! an in-memory pair ([`memory::pair`]) for deterministic tests.

mod error;
mod framing;
pub mod memory;

#[cfg(unix)]
mod dialer;
#[cfg(unix)]
mod unix;

pub use error::{TransportError, is_refused};
pub use framing::{FRAME_DELIMITER, read_frame, write_frame};

#[cfg(unix)]
pub use dialer::Dialer;
#[cfg(unix)]
pub use unix::{UnixConnection, UnixServerTransport};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tether_bus::Bus;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a single physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// A transport lifecycle signal, republished on a [`Bus`] by connection
/// wrappers. Process-internal only — events are never serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// When it was observed.
    pub date: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            date: Utc::now(),
        }
    }
}

/// The kinds of transport signal the core reacts to.
///
/// These mirror what a raw socket can report. The core treats them as
/// opaque notifications: it matches on the kinds it cares about (data,
/// connect, the terminal ones) and republishes the rest untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A dialing transport established (or re-established) its connection.
    Connect,
    /// The connection is ready for writes.
    Ready,
    /// A dialing transport resolved its remote name before connecting.
    /// Unix-socket dials have nothing to resolve and never emit this.
    Lookup,
    /// One inbound frame.
    Data { bytes: Vec<u8> },
    /// The write buffer drained.
    Drain,
    /// The remote peer ended its write side.
    End,
    /// The transport's idle timeout fired.
    Timeout,
    /// A transport error. `refused` distinguishes the recoverable
    /// nobody-is-listening case from everything else.
    Error { message: String, refused: bool },
    /// The connection fully closed. Terminal.
    Close { had_error: bool },
    /// A dialing transport lost its connection. Terminal for the attempt;
    /// the dialer will retry.
    Disconnect,
    /// A dialing transport shut down for good; no further retries. Terminal.
    Destroy,
    /// The server observed a remote socket disconnect.
    SocketDisconnected,
}

impl EventKind {
    /// Whether this event means the connection is gone and must not be
    /// written to again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Close { .. } | EventKind::Disconnect | EventKind::Destroy
        )
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

// Methods are declared as `impl Future + Send` rather than plain `async fn`
// so that read pumps and service loops generic over these traits can be
// handed to `tokio::spawn`. Implementations still write `async fn`.

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Stops accepting and releases the listening resource.
    fn shutdown(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A single accepted connection that can send and receive frames.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is closed — locally or by the
    /// peer — after which `recv` keeps returning `Ok(None)`.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    /// Closes the connection. Idempotent; also ends any pending `recv`.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

/// A dialing transport that owns its own reconnect policy and reports
/// everything that happens as [`Event`]s.
pub trait ClientTransport: Send + Sync + 'static {
    /// The bus carrying this transport's lifecycle events, including one
    /// `Data` event per inbound frame.
    fn events(&self) -> &Bus<Event>;

    /// Sends one frame if currently connected; while disconnected the frame
    /// is dropped and reported at debug level.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stops the transport for good (emits `Destroy`, no further retries).
    fn close(&self) -> impl Future<Output = ()> + Send;
}
