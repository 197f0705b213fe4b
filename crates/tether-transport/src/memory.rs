//! In-memory connection pair for tests.
//!
//! [`pair`] returns two [`Connection`]s wired back-to-back: frames sent on
//! one side arrive on the other, with the same close semantics as a real
//! socket (closing either side ends both `recv` streams). Session and
//! handshake tests use this to exercise connection lifecycles without a
//! filesystem socket.

use std::sync::Mutex as StdMutex;

use tokio::sync::{Mutex, mpsc, watch};

use crate::{Connection, ConnectionId, TransportError};

/// One side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    tx: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
}

/// Creates two connections wired back-to-back.
pub fn pair() -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection::new(a_tx, a_rx),
        MemoryConnection::new(b_tx, b_rx),
    )
}

impl MemoryConnection {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::next(),
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed,
        }
    }
}

impl Connection for MemoryConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock().expect("memory connection lock poisoned");
        let Some(tx) = guard.as_ref() else {
            return Err(TransportError::ConnectionClosed("send after close".into()));
        };
        tx.send(data.to_vec()).map_err(|_| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer closed",
            ))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            frame = rx.recv() => Ok(frame),
            _ = closed.wait_for(|c| *c) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping the sender ends the peer's recv stream; the watch flag
        // ends our own.
        self.tx.lock().expect("memory connection lock poisoned").take();
        self.closed.send_replace(true);
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
