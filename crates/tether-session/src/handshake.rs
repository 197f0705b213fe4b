//! Server-side handshake: turning an anonymous connection into a session.
//!
//! The server opens the exchange; the client answers with its id:
//!
//! ```text
//! server ──SERVER::HANDSHAKE_REQUEST──→ client
//! server ←──CLIENT::HANDSHAKE { id }─── client
//! server ──SERVER::HANDSHAKE_CONFIRMED { id }──→ client
//! ```
//!
//! Between the request and the answer three things can happen, and exactly
//! one of them wins: the answer arrives, the connection dies, or the window
//! elapses. The race is [`first_of`]; its losing branches are dropped, so no
//! timer or subscription outlives the attempt.

use std::sync::Arc;
use std::time::Duration;

use tether_bus::{Outcome, first_of};
use tether_protocol::{ClientBody, Packet, ServerBody};
use tether_transport::Connection;

use crate::{Client, HandshakeFailure, UserRegistry};

/// Runs the handshake on a freshly accepted connection.
///
/// On success the connection is attached to the user with the asserted id
/// (created on first sight) and the confirmation has been sent; the id is
/// returned. On failure nothing was registered and the caller is expected
/// to dispose the client.
///
/// The client's **first** message decides the outcome: anything other than
/// `CLIENT::HANDSHAKE` fails the attempt with
/// [`HandshakeFailure::Unexpected`]. A peer that talks before being asked
/// who it is does not get a session.
pub async fn perform<C: Connection>(
    client: &Arc<Client<C>>,
    registry: &UserRegistry<C>,
    timeout: Duration,
) -> Result<String, HandshakeFailure> {
    // Subscribe before sending the request so a fast reply cannot slip
    // past between the send and the subscription.
    let mut messages = client.messages().subscribe();
    let mut events = client.events().subscribe();

    if client
        .send(&Packet::new(ServerBody::HandshakeRequest))
        .await
        .is_err()
    {
        return Err(HandshakeFailure::Closed);
    }

    let outcome = first_of(
        messages.recv(),
        events.first_where(|e| e.kind.is_terminal()),
        timeout,
    )
    .await;

    let id = match outcome {
        Outcome::Left(Some(packet)) => match packet.body {
            ClientBody::Handshake { id } => id,
            other => {
                tracing::warn!(conn_id = %client.id(), body = ?other,
                    "first message was not a handshake");
                return Err(HandshakeFailure::Unexpected);
            }
        },
        // A disposed message bus means the connection ended too.
        Outcome::Left(None) | Outcome::Right(_) => return Err(HandshakeFailure::Closed),
        Outcome::TimedOut => return Err(HandshakeFailure::TimedOut),
    };

    let connections = registry.handshake_complete(&id, Arc::clone(client));

    if client
        .send(&Packet::new(ServerBody::HandshakeConfirmed { id: id.clone() }))
        .await
        .is_err()
    {
        // Attached but already closing; the terminal event will detach it.
        tracing::debug!(%id, "confirmation write failed; connection closing");
    }

    tracing::info!(%id, connections, "handshake complete");
    Ok(id)
}

// =========================================================================
// Tests
// =========================================================================
