//! Error types for the client side.

/// Why a client handshake attempt failed.
///
/// One attempt, one outcome. Retrying is the driver's job, never the
/// handshake's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeFailure {
    /// The server sent nothing within the handshake window.
    #[error("handshake timed out waiting for the server")]
    TimedOut,

    /// The connection dropped before the handshake completed.
    #[error("connection closed during handshake")]
    Closed,

    /// The server sent something other than the expected handshake message.
    #[error("unexpected message during handshake")]
    Unexpected,
}

/// Errors that end a client session for good.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The underlying transport failed in a way that retrying cannot fix.
    ///
    /// A connection-refused error is *not* fatal (the server may simply not
    /// be up yet); anything else is.
    #[error("fatal transport error: {0}")]
    Fatal(String),

    /// A write to the transport failed.
    #[error("transport failure: {0}")]
    Transport(#[from] tether_transport::TransportError),

    /// A packet could not be encoded for the wire.
    #[error("protocol failure: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),
}
