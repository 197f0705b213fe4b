//! The server's view of one physical connection.
//!
//! A [`Client`] wraps an accepted [`Connection`] and runs a read pump that
//! republishes everything the connection produces onto two buses:
//!
//! - the **events bus** carries transport lifecycle signals — one
//!   [`EventKind::Data`] per inbound frame, then exactly one terminal
//!   [`EventKind::Close`] when the connection ends
//! - the **messages bus** carries the frames that decoded into a
//!   [`Packet<ClientBody>`]
//!
//! For every frame the raw `Data` event is published first, then the decoded
//! packet. A frame that fails to decode is logged and dropped; the
//! connection stays open (a hostile or buggy peer cannot take the session
//! down with one bad frame).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_bus::Bus;
use tether_protocol::{ClientBody, Packet, ServerBody, decode, encode};
use tether_transport::{Connection, ConnectionId, Event, EventKind};

use crate::SessionError;

/// One accepted connection, wrapped for the session layer.
pub struct Client<C: Connection> {
    conn: Arc<C>,
    id: ConnectionId,
    events: Bus<Event>,
    messages: Bus<Packet<ClientBody>>,
    disposed: AtomicBool,
}

impl<C: Connection> Client<C> {
    /// Wraps a connection and starts its read pump.
    pub fn spawn(conn: C) -> Arc<Self> {
        let conn = Arc::new(conn);
        let client = Arc::new(Self {
            id: conn.id(),
            conn: Arc::clone(&conn),
            events: Bus::new(),
            messages: Bus::new(),
            disposed: AtomicBool::new(false),
        });

        tokio::spawn(read_pump(
            conn,
            client.events.clone(),
            client.messages.clone(),
        ));

        client
    }

    /// Transport lifecycle events for this connection.
    pub fn events(&self) -> &Bus<Event> {
        &self.events
    }

    /// Decoded packets from this connection.
    pub fn messages(&self) -> &Bus<Packet<ClientBody>> {
        &self.messages
    }

    /// The wrapped connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Encodes and writes one packet to the peer.
    ///
    /// Writing after [`dispose`](Self::dispose) is a no-op reported at debug
    /// level, never an error — a terminal connection must not be written to,
    /// and racing senders should not have to care.
    pub async fn send(&self, packet: &Packet<ServerBody>) -> Result<(), SessionError> {
        if self.is_disposed() {
            tracing::debug!(id = %self.id, "send after dispose; packet dropped");
            return Ok(());
        }
        let bytes = encode(packet)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    /// Tears the client down: closes the connection, which ends the read
    /// pump; the pump publishes the terminal `Close` event and disposes both
    /// buses. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(id = %self.id, "client disposed");
        if let Err(e) = self.conn.close().await {
            tracing::debug!(id = %self.id, error = %e, "close failed during dispose");
        }
    }
}

/// Pumps frames off the connection until it ends, then publishes the single
/// terminal event and disposes both buses so every subscriber's stream ends.
async fn read_pump<C: Connection>(
    conn: Arc<C>,
    events: Bus<Event>,
    messages: Bus<Packet<ClientBody>>,
) {
    let id = conn.id();
    let had_error = loop {
        match conn.recv().await {
            Ok(Some(bytes)) => {
                // Raw event first, decoded packet second. Consumers that
                // watch both can rely on this order.
                events.publish(Event::now(EventKind::Data {
                    bytes: bytes.clone(),
                }));
                match decode::<ClientBody>(&bytes) {
                    Ok(packet) => messages.publish(packet),
                    Err(e) => {
                        tracing::warn!(%id, error = %e, "undecodable frame dropped");
                    }
                }
            }
            Ok(None) => break false,
            Err(e) => {
                events.publish(Event::now(EventKind::Error {
                    message: e.to_string(),
                    refused: false,
                }));
                break true;
            }
        }
    };

    tracing::debug!(%id, had_error, "connection ended");
    events.publish(Event::now(EventKind::Close { had_error }));
    events.dispose();
    messages.dispose();
}

// =========================================================================
// Tests
// =========================================================================
