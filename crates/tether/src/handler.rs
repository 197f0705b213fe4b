//! Per-connection handler: handshake, then the service loop.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Wrap the connection and run the identity handshake
//!   2. Loop: keepalive pings out, ping/pong/message routing in
//!   3. On a terminal event, detach the connection from its user (which
//!      arms grace eviction if it was the last one)

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use tether_bus::Bus;
use tether_protocol::{ClientBody, Packet, ServerBody};
use tether_session::{Client, UserRegistry, handshake};
use tether_transport::Connection;

use crate::UserMessage;

/// Handles a single connection from accept to close.
///
/// Generic over the connection so integration tests can drive it with the
/// in-memory transport.
pub(crate) async fn handle_connection<C: Connection>(
    conn: C,
    registry: UserRegistry<C>,
    messages: Bus<UserMessage>,
    ping_interval: Duration,
    handshake_timeout: Duration,
) {
    let client = Client::spawn(conn);
    let conn_id = client.id();
    tracing::debug!(%conn_id, "handling new connection");

    let id = match handshake::perform(&client, &registry, handshake_timeout).await {
        Ok(id) => id,
        Err(failure) => {
            tracing::warn!(%conn_id, %failure, "handshake failed; dropping connection");
            client.dispose().await;
            return;
        }
    };

    service_loop(&client, &messages, &id, ping_interval).await;

    // Detaching the last connection arms the grace-eviction timer.
    registry.remove_client(&id, conn_id).await;
}

/// The per-connection service loop: keepalive out, routing in. Runs until
/// the connection ends.
async fn service_loop<C: Connection>(
    client: &Arc<Client<C>>,
    messages: &Bus<UserMessage>,
    id: &str,
    ping_interval: Duration,
) {
    let mut events = client.events().subscribe();
    let mut packets = client.messages().subscribe();

    let mut keepalive = tokio::time::interval(ping_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval's first tick is immediate; the first ping should wait a
    // full period.
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                if let Err(e) = client.send(&Packet::new(ServerBody::Ping)).await {
                    tracing::debug!(%id, error = %e, "keepalive write failed");
                }
            }
            event = events.recv() => match event {
                None => return,
                Some(e) if e.kind.is_terminal() => {
                    tracing::info!(%id, conn_id = %client.id(), "connection ended");
                    return;
                }
                Some(_) => {}
            },
            packet = packets.recv() => match packet {
                None => return,
                Some(packet) => match packet.body {
                    ClientBody::Ping => {
                        if let Err(e) = client.send(&Packet::new(ServerBody::Pong)).await {
                            tracing::debug!(%id, error = %e, "pong write failed");
                        }
                    }
                    ClientBody::Pong => {}
                    ClientBody::Message { message } => {
                        tracing::info!(%id, %message, "message received");
                        messages.publish(UserMessage {
                            id: id.to_string(),
                            message,
                        });
                    }
                    ClientBody::Handshake { .. } => {
                        tracing::warn!(%id, "handshake mid-session; dropped");
                    }
                },
            },
        }
    }
}
