//! Error types for the protocol layer.

/// Errors that can occur while encoding or decoding packets.
///
/// Decode failures are recoverable by contract: callers log them and drop
/// the offending frame, and the connection that carried it stays open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a packet into bytes).
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Deserialization failed: malformed JSON, or valid JSON whose shape
    /// does not match any known packet type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// The input parsed as JSON but is not a packet — wrong top-level type,
    /// or missing/mistyped `type` or `date` fields.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}
