//! Wire protocol for Tether.
//!
//! This crate defines the "language" that clients and servers speak:
//!
//! - **Types** ([`Packet`], [`ClientBody`], [`ServerBody`]) — the message
//!   structures that travel on the wire.
//! - **Codec** ([`encode`], [`decode`]) — how those messages are converted
//!   to/from bytes, tolerantly: malformed input is a typed failure, never a
//!   panic, and never fatal to the connection that received it.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while doing so.
//!
//! The protocol layer sits between transport (raw frames) and session
//! (logical identity). It doesn't know about connections or sessions — it
//! only knows how to serialize and deserialize packets.
//!
//! ```text
//! Transport (frames) → Protocol (Packet) → Session (identity context)
//! ```

mod codec;
mod error;
mod types;

pub use codec::{decode, decode_value, encode};
pub use error::ProtocolError;
pub use types::{ClientBody, Packet, ServerBody};
