//! Client-side handshake: answering "who are you?".
//!
//! The client waits to be asked, asserts its id, and waits to be confirmed:
//!
//! ```text
//! client ←──SERVER::HANDSHAKE_REQUEST─── server
//! client ──CLIENT::HANDSHAKE { id }───→ server
//! client ←──SERVER::HANDSHAKE_CONFIRMED { id }─── server
//! ```
//!
//! Both waits race the link dropping and the timeout via [`first_of`];
//! exactly one outcome per attempt, and losing branches are cancelled. The
//! caller (the driver) passes in streams it subscribed **before** the
//! connection came up, so the server's request cannot have slipped past.

use std::time::Duration;

use tether_bus::{BusStream, Outcome, first_of};
use tether_protocol::{ClientBody, Packet, ServerBody};
use tether_transport::{ClientTransport, Event};

use crate::{Api, HandshakeFailure};

/// Runs one handshake attempt over an already-established link.
///
/// Returns the id the server confirmed. Never retries; the driver owns the
/// retry policy.
pub async fn perform<T: ClientTransport>(
    api: &Api<T>,
    messages: &mut BusStream<Packet<ServerBody>>,
    events: &mut BusStream<Event>,
    id: &str,
    timeout: Duration,
) -> Result<String, HandshakeFailure> {
    // Phase 1: the server opens with a request.
    let packet = next_message(messages, events, timeout).await?;
    if packet.body != ServerBody::HandshakeRequest {
        tracing::warn!(body = ?packet.body, "expected handshake request");
        return Err(HandshakeFailure::Unexpected);
    }

    if api
        .send(&Packet::new(ClientBody::Handshake { id: id.to_string() }))
        .await
        .is_err()
    {
        return Err(HandshakeFailure::Closed);
    }

    // Phase 2: the server confirms the id it will route for.
    let packet = next_message(messages, events, timeout).await?;
    match packet.body {
        ServerBody::HandshakeConfirmed { id } => {
            tracing::info!(%id, "handshake confirmed");
            Ok(id)
        }
        other => {
            tracing::warn!(body = ?other, "expected handshake confirmation");
            Err(HandshakeFailure::Unexpected)
        }
    }
}

/// Waits for the next server packet, racing the link dropping and the
/// timeout.
async fn next_message(
    messages: &mut BusStream<Packet<ServerBody>>,
    events: &mut BusStream<Event>,
    timeout: Duration,
) -> Result<Packet<ServerBody>, HandshakeFailure> {
    match first_of(
        messages.recv(),
        events.first_where(|e| e.kind.is_terminal()),
        timeout,
    )
    .await
    {
        Outcome::Left(Some(packet)) => Ok(packet),
        Outcome::Left(None) | Outcome::Right(_) => Err(HandshakeFailure::Closed),
        Outcome::TimedOut => Err(HandshakeFailure::TimedOut),
    }
}

// =========================================================================
// Tests
// =========================================================================
