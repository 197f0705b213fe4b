//! Reconnecting Unix-socket dialer.
//!
//! The dialer owns the client side's retry policy (spec'd as the
//! transport's job, not the session layer's): it connects, pumps inbound
//! frames as [`EventKind::Data`] events, and when the link drops it waits
//! `retry_wait` and dials again — forever, until [`close`](Dialer::close).
//!
//! Everything that happens is reported on the event bus:
//!
//! ```text
//! Connect         link established (initial or after a retry)
//! Data            one inbound frame
//! Disconnect      link lost; a retry is scheduled
//! Error           dial or read failure; `refused` marks the
//!                 nobody-listening-yet case
//! Destroy         close() was called; no further retries
//! ```
//!
//! Classifying a non-refused error as fatal is the consumer's decision; the
//! dialer itself keeps retrying until told to stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, watch};

use tether_bus::Bus;

use crate::framing::{read_frame, write_frame};
use crate::{ClientTransport, Event, EventKind, TransportError, is_refused};

/// A [`ClientTransport`] over a Unix socket with automatic reconnection.
pub struct Dialer {
    events: Bus<Event>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    shutdown: watch::Sender<bool>,
}

impl Dialer {
    /// Starts the dial loop against the socket at `path`.
    ///
    /// The returned handle is immediately usable; `Connect` is emitted once
    /// the first dial succeeds.
    pub fn spawn(path: impl Into<PathBuf>, retry_wait: Duration) -> Self {
        let path = path.into();
        let events: Bus<Event> = Bus::new();
        let writer: Arc<Mutex<Option<OwnedWriteHalf>>> = Arc::new(Mutex::new(None));
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(dial_loop(
            path,
            retry_wait,
            events.clone(),
            Arc::clone(&writer),
            shutdown_rx,
        ));

        Self {
            events,
            writer,
            shutdown,
        }
    }
}

impl ClientTransport for Dialer {
    fn events(&self) -> &Bus<Event> {
        &self.events
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => write_frame(w, data)
                .await
                .map_err(TransportError::SendFailed),
            None => {
                tracing::debug!("write while disconnected; frame dropped");
                Ok(())
            }
        }
    }

    async fn close(&self) {
        self.shutdown.send_replace(true);
        self.writer.lock().await.take();
    }
}

/// The dial loop: connect, pump, reconnect. Exits only on shutdown.
async fn dial_loop(
    path: PathBuf,
    retry_wait: Duration,
    events: Bus<Event>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match UnixStream::connect(&path).await {
            Err(e) => {
                let refused = is_refused(&e);
                tracing::debug!(error = %e, refused, "dial failed");
                events.publish(Event::now(EventKind::Error {
                    message: e.to_string(),
                    refused,
                }));
                if wait_or_shutdown(retry_wait, &mut shutdown).await {
                    break;
                }
            }
            Ok(stream) => {
                let (read_half, write_half) = stream.into_split();
                *writer.lock().await = Some(write_half);
                tracing::debug!(path = %path.display(), "dialer connected");
                events.publish(Event::now(EventKind::Connect));

                let mut reader = BufReader::new(read_half);
                let lost = loop {
                    tokio::select! {
                        res = read_frame(&mut reader) => match res {
                            Ok(Some(bytes)) => {
                                events.publish(Event::now(EventKind::Data { bytes }));
                            }
                            Ok(None) => break true,
                            Err(e) => {
                                events.publish(Event::now(EventKind::Error {
                                    message: e.to_string(),
                                    refused: false,
                                }));
                                break true;
                            }
                        },
                        _ = shutdown.wait_for(|s| *s) => break false,
                    }
                };

                writer.lock().await.take();
                if !lost {
                    break; // shutdown requested
                }
                tracing::debug!("dialer disconnected; retry scheduled");
                events.publish(Event::now(EventKind::Disconnect));
                if wait_or_shutdown(retry_wait, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    events.publish(Event::now(EventKind::Destroy));
    events.dispose();
}

/// Sleeps for `wait`, returning early with `true` if shutdown fires first.
async fn wait_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        _ = shutdown.wait_for(|s| *s) => true,
    }
}
