//! Server-side session layer for Tether.
//!
//! This crate turns raw accepted connections into logical sessions:
//!
//! 1. **Wrapping** — a [`Client`] pumps frames off one connection and
//!    republishes them as typed packets and lifecycle events
//! 2. **Handshake** — [`handshake::perform`] asks a new connection who it
//!    is and attaches it to a session
//! 3. **Consolidation** — a [`User`] owns every live connection that
//!    asserted the same id; messages from any of them merge into one stream
//! 4. **Grace eviction** — a user whose last connection drops is kept for a
//!    grace period before being disposed, so a reconnecting client finds
//!    its session still there
//!
//! # Session lifecycle
//!
//! ```text
//! accept ──→ handshake ──→ [attached] ──(last connection drops)──→ [offline]
//!                              ↑                                       │
//!                              └──────(reconnect within grace)─────────┤
//!                                                                      ▼ (grace elapsed)
//!                                                                  [disposed]
//! ```
//!
//! The registry is a value, not a global: every server (and every test)
//! constructs its own [`UserRegistry`] and hands clones to whoever needs one.

mod client;
mod config;
mod error;
pub mod handshake;
mod registry;
mod user;

pub use client::Client;
pub use config::SessionConfig;
pub use error::{HandshakeFailure, SessionError};
pub use registry::UserRegistry;
pub use user::User;
