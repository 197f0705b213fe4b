//! Error types for the session layer.

/// Errors that can occur while operating a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying connection failed.
    #[error("transport failure: {0}")]
    Transport(#[from] tether_transport::TransportError),

    /// A packet could not be encoded for the wire.
    #[error("protocol failure: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),
}

/// Why a handshake attempt did not produce a session.
///
/// Exactly one of these is produced per attempt — the underlying race is
/// resolved once, and the losing branches are cancelled. The caller owns the
/// consequence (dispose the connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeFailure {
    /// The client sent nothing within the handshake window.
    #[error("handshake timed out waiting for the client")]
    TimedOut,

    /// The connection closed before the handshake completed.
    #[error("connection closed during handshake")]
    Closed,

    /// The client's first message was not a handshake.
    #[error("first message was not a handshake")]
    Unexpected,
}
