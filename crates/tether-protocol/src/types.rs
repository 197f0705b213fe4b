//! Core protocol types for Tether's wire format.
//!
//! Every message on the wire is a [`Packet`]: a typed body plus an ISO-8601
//! timestamp. The two directions use disjoint type namespaces so a packet
//! can never be mistaken for one travelling the other way:
//!
//! ```text
//! client → server   CLIENT::PING  CLIENT::PONG  CLIENT::HANDSHAKE  CLIENT::MESSAGE
//! server → client   SERVER::PING  SERVER::PONG  SERVER::HANDSHAKE_REQUEST
//!                   SERVER::HANDSHAKE_CONFIRMED
//! ```
//!
//! Packets are immutable once created; the `type` tag determines the payload
//! shape. On the wire a packet is a JSON object:
//!
//! ```text
//! { "type": "CLIENT::HANDSHAKE", "data": { "id": "nick" }, "date": "2026-..." }
//! ```
//!
//! with `data` absent entirely for void payloads (ping/pong, the handshake
//! request).

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A wire packet: a typed body stamped with its creation time.
///
/// `#[serde(flatten)]` merges the body's `type`/`data` fields with `date`
/// into one flat JSON object, so the wire shape is
/// `{ "type": ..., "data": ..., "date": ... }` rather than a nested
/// envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet<B> {
    /// The typed payload. `#[serde(tag = "type", content = "data")]` on the
    /// body enums produces the `type`/`data` pair.
    #[serde(flatten)]
    pub body: B,

    /// ISO-8601 timestamp recorded when the packet was created.
    pub date: String,
}

impl<B> Packet<B> {
    /// Creates a packet stamped with the current UTC time.
    pub fn new(body: B) -> Self {
        Self {
            body,
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server packet bodies
// ---------------------------------------------------------------------------

/// Payloads a client may send to the server.
///
/// `#[serde(tag = "type", content = "data")]` produces adjacently tagged
/// JSON: `{ "type": "CLIENT::HANDSHAKE", "data": { "id": "nick" } }`. Unit
/// variants (ping/pong) serialize with no `data` key at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientBody {
    /// Keepalive probe; the server answers with [`ServerBody::Pong`].
    #[serde(rename = "CLIENT::PING")]
    Ping,

    /// Answer to a [`ServerBody::Ping`].
    #[serde(rename = "CLIENT::PONG")]
    Pong,

    /// Asserts the client's logical identity during the handshake.
    ///
    /// The id is caller-supplied and unverified: the server trusts it to
    /// consolidate connections, nothing more.
    #[serde(rename = "CLIENT::HANDSHAKE")]
    Handshake { id: String },

    /// An application text message.
    #[serde(rename = "CLIENT::MESSAGE")]
    Message { message: String },
}

// ---------------------------------------------------------------------------
// Server → client packet bodies
// ---------------------------------------------------------------------------

/// Payloads the server may send to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerBody {
    /// Keepalive probe; the client answers with [`ClientBody::Pong`].
    #[serde(rename = "SERVER::PING")]
    Ping,

    /// Answer to a [`ClientBody::Ping`].
    #[serde(rename = "SERVER::PONG")]
    Pong,

    /// First handshake message, sent by the server on every newly accepted
    /// connection: "tell me who you are".
    #[serde(rename = "SERVER::HANDSHAKE_REQUEST")]
    HandshakeRequest,

    /// Final handshake message: the server is ready to route for this id.
    #[serde(rename = "SERVER::HANDSHAKE_CONFIRMED")]
    HandshakeConfirmed { id: String },
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The wire format is consumed by non-Rust peers too, so these tests
    //! pin the exact JSON shapes, not just round-trip equality.

    use super::*;

    fn to_json<B: Serialize>(packet: &Packet<B>) -> serde_json::Value {
        serde_json::to_value(packet).expect("serialize")
    }

    // =====================================================================
    // Wire shape
    // =====================================================================

    #[test]
    fn test_packet_new_stamps_iso8601_date() {
        let packet = Packet::new(ClientBody::Ping);
        // e.g. "2026-08-23T10:15:30.123Z"
        assert!(packet.date.ends_with('Z'), "date should be UTC: {}", packet.date);
        assert!(packet.date.contains('T'));
    }

    #[test]
    fn test_client_ping_serializes_without_data() {
        let json = to_json(&Packet::new(ClientBody::Ping));
        assert_eq!(json["type"], "CLIENT::PING");
        assert!(json["date"].is_string());
        // Void payload: no `data` key at all.
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_client_handshake_serializes_id_under_data() {
        let json = to_json(&Packet::new(ClientBody::Handshake { id: "nick".into() }));
        assert_eq!(json["type"], "CLIENT::HANDSHAKE");
        assert_eq!(json["data"]["id"], "nick");
    }

    #[test]
    fn test_client_message_serializes_message_under_data() {
        let json = to_json(&Packet::new(ClientBody::Message { message: "hi".into() }));
        assert_eq!(json["type"], "CLIENT::MESSAGE");
        assert_eq!(json["data"]["message"], "hi");
    }

    #[test]
    fn test_server_handshake_request_serializes_without_data() {
        let json = to_json(&Packet::new(ServerBody::HandshakeRequest));
        assert_eq!(json["type"], "SERVER::HANDSHAKE_REQUEST");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_server_handshake_confirmed_serializes_id_under_data() {
        let json = to_json(&Packet::new(ServerBody::HandshakeConfirmed { id: "nick".into() }));
        assert_eq!(json["type"], "SERVER::HANDSHAKE_CONFIRMED");
        assert_eq!(json["data"]["id"], "nick");
    }

    // =====================================================================
    // Round trips
    // =====================================================================

    #[test]
    fn test_client_packet_round_trip() {
        let packet = Packet::new(ClientBody::Message { message: "hello".into() });
        let bytes = serde_json::to_vec(&packet).unwrap();
        let decoded: Packet<ClientBody> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_server_packet_round_trip() {
        let packet = Packet::new(ServerBody::Pong);
        let bytes = serde_json::to_vec(&packet).unwrap();
        let decoded: Packet<ServerBody> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_server_type_does_not_parse_as_client_packet() {
        // The two namespaces are disjoint: a server packet must not
        // deserialize as a client packet.
        let bytes = serde_json::to_vec(&Packet::new(ServerBody::Ping)).unwrap();
        let result: Result<Packet<ClientBody>, _> = serde_json::from_slice(&bytes);
        assert!(result.is_err());
    }
}
