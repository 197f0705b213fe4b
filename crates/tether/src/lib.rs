//! # Tether
//!
//! A session-oriented IPC protocol layer over Unix domain sockets.
//!
//! A Tether server identifies reconnecting clients by a stable logical id,
//! consolidates simultaneous connections under one session, detects
//! liveness with heartbeats, and keeps a fully-offline session alive for a
//! grace period so a quick reconnect finds it intact.
//!
//! ## The stack
//!
//! ```text
//! tether          ← this crate: the server acceptor and wiring
//! tether-client   ← client driver: reconnect, handshake, keepalive
//! tether-session  ← server sessions: users, registry, grace eviction
//! tether-transport← Unix sockets, framing, lifecycle events
//! tether-protocol ← packet types and the tolerant codec
//! tether-bus      ← in-process pub/sub everything above communicates on
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tether::Server;
//!
//! # async fn run() -> Result<(), tether::TetherError> {
//! let server = Server::builder()
//!     .socket_path("/tmp/tether.sock")
//!     .build()
//!     .await?;
//!
//! let mut messages = server.messages().subscribe();
//! tokio::spawn(server.run());
//!
//! while let Some(msg) = messages.recv().await {
//!     println!("{}: {}", msg.id, msg.message);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::TetherError;
pub use server::{Server, ServerBuilder, ServerConfig, UserMessage};

// Re-exports so simple consumers need only this crate.
pub use tether_client::{ClientError, DriverConfig, DriverState, SessionDriver};
pub use tether_protocol::{ClientBody, Packet, ServerBody};
pub use tether_session::SessionConfig;
pub use tether_transport::Dialer;
