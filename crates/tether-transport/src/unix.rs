//! Unix-domain-socket transport: the server listener and its per-connection
//! endpoint.
//!
//! The listener removes a stale socket file before binding so a server that
//! crashed without cleanup can rebind. Connections exchange form-feed
//! delimited frames (see [`crate::framing`]).

use std::path::{Path, PathBuf};

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, watch};

use crate::framing::{read_frame, write_frame};
use crate::{Connection, ConnectionId, Transport, TransportError};

/// A Unix-socket [`Transport`] that listens for incoming connections.
pub struct UnixServerTransport {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixServerTransport {
    /// Binds to the given socket path, replacing a stale socket file.
    pub async fn bind(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TransportError::BindFailed(e)),
        }
        let listener = UnixListener::bind(&path).map_err(TransportError::BindFailed)?;
        tracing::info!(path = %path.display(), "unix transport listening");
        Ok(Self { listener, path })
    }

    /// The socket path this transport is bound to.
    pub fn local_path(&self) -> &Path {
        &self.path
    }
}

impl Transport for UnixServerTransport {
    type Connection = UnixConnection;

    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let conn = UnixConnection::from_stream(stream);
        tracing::debug!(id = %conn.id(), "accepted unix connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::BindFailed(e)),
        }
    }
}

/// One end of a Unix-socket connection.
pub struct UnixConnection {
    id: ConnectionId,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    // Flipped once by close(); pending and future recv() calls observe it
    // and return Ok(None) instead of blocking on a peer that will never
    // speak again.
    closed: watch::Sender<bool>,
}

impl UnixConnection {
    fn from_stream(stream: tokio::net::UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            id: ConnectionId::next(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            closed,
        }
    }

    /// Dials the socket at `path` once (no retries).
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let stream = tokio::net::UnixStream::connect(path.as_ref())
            .await
            .map_err(TransportError::SendFailed)?;
        Ok(Self::from_stream(stream))
    }
}

impl Connection for UnixConnection {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::ConnectionClosed("send after close".into()));
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, data)
            .await
            .map_err(TransportError::SendFailed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        let mut reader = self.reader.lock().await;
        tokio::select! {
            res = read_frame(&mut *reader) => res.map_err(TransportError::ReceiveFailed),
            _ = closed.wait_for(|c| *c) => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(()); // already closed
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
