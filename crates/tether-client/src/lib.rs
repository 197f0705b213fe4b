//! Client-side session machinery for Tether.
//!
//! The pieces, bottom up:
//!
//! 1. **[`Api`]** — wraps a reconnecting transport with the packet codec:
//!    inbound frames become typed server packets, outbound packets become
//!    frames
//! 2. **[`handshake`]** — one attempt at the identity exchange over an
//!    established link
//! 3. **[`SessionDriver`]** — the state machine that owns everything:
//!    waits for the link, handshakes, keeps the session alive with pings,
//!    and starts over when the link drops
//!
//! A minimal client:
//!
//! ```no_run
//! use tether_client::{DriverConfig, SessionDriver};
//! use tether_transport::Dialer;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), tether_client::ClientError> {
//! let config = DriverConfig::new("nick");
//! let dialer = Dialer::spawn("/tmp/tether.sock", config.retry_wait);
//! let driver = SessionDriver::new(dialer, config);
//! driver.run().await
//! # }
//! ```

mod api;
mod driver;
mod error;
pub mod handshake;

#[cfg(test)]
pub(crate) mod testing;

pub use api::Api;
pub use driver::{DriverConfig, DriverState, SessionDriver};
pub use error::{ClientError, HandshakeFailure};
