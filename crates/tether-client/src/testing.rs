//! A captive transport for driver and handshake tests.
//!
//! The "server" is the test itself: it publishes lifecycle and `Data`
//! events into the transport's bus, and reads back every frame the code
//! under test sends.

use tokio::sync::mpsc;

use tether_bus::Bus;
use tether_transport::{ClientTransport, Event, EventKind, TransportError};

/// A transport whose events are scripted and whose writes are captured.
pub(crate) struct ScriptTransport {
    events: Bus<Event>,
    sent: mpsc::UnboundedSender<Vec<u8>>,
}

/// Returns the transport, the capture of its outbound frames, and a handle
/// for publishing events into it.
pub(crate) fn script() -> (
    ScriptTransport,
    mpsc::UnboundedReceiver<Vec<u8>>,
    Bus<Event>,
) {
    let events: Bus<Event> = Bus::new();
    let (sent, captured) = mpsc::unbounded_channel();
    (
        ScriptTransport {
            events: events.clone(),
            sent,
        },
        captured,
        events,
    )
}

impl ClientTransport for ScriptTransport {
    fn events(&self) -> &Bus<Event> {
        &self.events
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let _ = self.sent.send(data.to_vec());
        Ok(())
    }

    async fn close(&self) {
        self.events.publish(Event::now(EventKind::Destroy));
        self.events.dispose();
    }
}
