//! Tolerant JSON codec for wire packets.
//!
//! [`encode`] is straightforward serialization. [`decode`] is deliberately
//! forgiving about how the packet arrives:
//!
//! 1. Some transports wrap every payload in a `{"type":"message","data":...}`
//!    shell, where `data` may be the packet object itself or a JSON-encoded
//!    string containing it. The shell is unwrapped if present.
//! 2. The result is structurally validated (`type` is a string or number,
//!    `date` is a string) before the typed parse, so failures name what is
//!    actually wrong instead of whatever serde noticed first.
//! 3. Every failure is a typed [`ProtocolError`] — decoding never panics,
//!    and a bad frame must never take down the connection that carried it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Packet, ProtocolError};

/// Serializes a packet to its JSON byte representation.
///
/// # Errors
/// Returns [`ProtocolError::Encode`] if serialization fails; for the packet
/// types defined in this crate it cannot.
pub fn encode<B: Serialize>(packet: &Packet<B>) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(packet).map_err(ProtocolError::Encode)
}

/// Decodes a raw frame into a typed packet.
///
/// # Errors
/// Returns [`ProtocolError::Decode`] for non-JSON input or an unknown packet
/// type, and [`ProtocolError::InvalidPacket`] for JSON that is structurally
/// not a packet.
pub fn decode<B: DeserializeOwned>(raw: &[u8]) -> Result<Packet<B>, ProtocolError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| ProtocolError::InvalidPacket("frame is not UTF-8".into()))?;
    let value: Value = serde_json::from_str(text.trim()).map_err(ProtocolError::Decode)?;
    decode_value(value)
}

/// Decodes an already-parsed JSON value into a typed packet.
///
/// # Errors
/// Same failure modes as [`decode`].
pub fn decode_value<B: DeserializeOwned>(value: Value) -> Result<Packet<B>, ProtocolError> {
    let value = unwrap_shell(value)?;
    validate_shape(&value)?;
    serde_json::from_value(value).map_err(ProtocolError::Decode)
}

/// Unwraps a `{"type":"message","data":...}` transport shell, if present.
///
/// `data` may be the packet object itself, or a string holding the packet's
/// JSON (double-encoded, as node-ipc style transports produce).
fn unwrap_shell(value: Value) -> Result<Value, ProtocolError> {
    match value {
        Value::Object(mut map)
            if map.get("type").and_then(Value::as_str) == Some("message") =>
        {
            match map.remove("data") {
                Some(Value::String(text)) => {
                    serde_json::from_str(text.trim()).map_err(ProtocolError::Decode)
                }
                Some(inner) => Ok(inner),
                None => Err(ProtocolError::InvalidPacket(
                    "message shell carries no data".into(),
                )),
            }
        }
        other => Ok(other),
    }
}

/// Checks the minimal packet shape: an object with a string-or-number
/// `type` and a string `date`.
fn validate_shape(value: &Value) -> Result<(), ProtocolError> {
    let Some(map) = value.as_object() else {
        return Err(ProtocolError::InvalidPacket("packet is not an object".into()));
    };
    match map.get("type") {
        Some(Value::String(_)) | Some(Value::Number(_)) => {}
        Some(_) => {
            return Err(ProtocolError::InvalidPacket(
                "packet `type` must be a string or number".into(),
            ));
        }
        None => {
            return Err(ProtocolError::InvalidPacket("packet is missing `type`".into()));
        }
    }
    match map.get("date") {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ProtocolError::InvalidPacket(
            "packet `date` must be a string".into(),
        )),
        None => Err(ProtocolError::InvalidPacket("packet is missing `date`".into())),
    }
}

// =========================================================================
// Tests
// =========================================================================
