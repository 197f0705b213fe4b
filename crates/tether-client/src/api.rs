//! The client's view of its transport.
//!
//! [`Api`] is the client-side twin of the server's connection wrapper: it
//! runs a decode pump that turns the transport's raw `Data` events into
//! typed [`Packet<ServerBody>`]s on a messages bus, and offers a typed
//! `send`. Lifecycle events pass through untouched on the transport's own
//! event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tether_bus::{Bus, BusStream};
use tether_protocol::{ClientBody, Packet, ServerBody, decode, encode};
use tether_transport::{ClientTransport, Event, EventKind};

use crate::ClientError;

/// A dialing transport wrapped with the packet codec.
pub struct Api<T: ClientTransport> {
    transport: Arc<T>,
    messages: Bus<Packet<ServerBody>>,
    disposed: AtomicBool,
}

impl<T: ClientTransport> Api<T> {
    /// Wraps a transport and starts the decode pump.
    ///
    /// The pump's event subscription is created here, before the task is
    /// spawned: an event published the instant `spawn` returns is already
    /// buffered for the pump, not lost.
    pub fn spawn(transport: T) -> Arc<Self> {
        let transport = Arc::new(transport);
        let api = Arc::new(Self {
            transport: Arc::clone(&transport),
            messages: Bus::new(),
            disposed: AtomicBool::new(false),
        });

        let events = transport.events().subscribe();
        tokio::spawn(decode_pump(events, api.messages.clone()));

        api
    }

    /// The transport's lifecycle events (connects, disconnects, errors).
    pub fn events(&self) -> &Bus<Event> {
        self.transport.events()
    }

    /// Decoded packets from the server.
    pub fn messages(&self) -> &Bus<Packet<ServerBody>> {
        &self.messages
    }

    /// Returns `true` once [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Encodes and sends one packet.
    ///
    /// While the transport is between connections the frame is dropped by
    /// the transport at debug level; after [`dispose`](Self::dispose) the
    /// drop happens here. Neither is an error.
    pub async fn send(&self, packet: &Packet<ClientBody>) -> Result<(), ClientError> {
        if self.is_disposed() {
            tracing::debug!("send after dispose; packet dropped");
            return Ok(());
        }
        let bytes = encode(packet)?;
        self.transport.send(&bytes).await?;
        Ok(())
    }

    /// Shuts the transport down for good. Idempotent. The transport emits
    /// `Destroy` and disposes its event bus, which ends the decode pump and
    /// with it the messages bus.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("api disposed");
        self.transport.close().await;
    }
}

/// Decodes `Data` events into server packets until the event bus ends.
async fn decode_pump(mut events: BusStream<Event>, messages: Bus<Packet<ServerBody>>) {
    while let Some(event) = events.recv().await {
        if let EventKind::Data { bytes } = event.kind {
            match decode::<ServerBody>(&bytes) {
                Ok(packet) => messages.publish(packet),
                Err(e) => tracing::warn!(error = %e, "undecodable frame dropped"),
            }
        }
    }
    messages.dispose();
}

// =========================================================================
// Tests
// =========================================================================
