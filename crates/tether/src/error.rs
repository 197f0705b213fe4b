//! Unified error type for the Tether stack.

use tether_protocol::ProtocolError;
use tether_session::SessionError;
use tether_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Users of the `tether` meta-crate deal with this single type instead of
/// importing errors from each sub-crate. The `#[from]` attribute on each
/// variant auto-generates `From` impls, so the `?` operator converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid packet).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (write to a session failed).
    #[error(transparent)]
    Session(#[from] SessionError),
}
