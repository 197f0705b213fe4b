//! `Server` builder and accept loop.
//!
//! This is the entry point for running a Tether server. It ties together
//! the layers: transport → protocol → session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tether_bus::Bus;
use tether_session::{SessionConfig, UserRegistry};
use tether_transport::{Transport, UnixConnection, UnixServerTransport};

use crate::TetherError;
use crate::handler::handle_connection;

/// An application message, tagged with the logical id of the session it
/// arrived on (not the physical connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMessage {
    /// The sender's logical id.
    pub id: String,
    /// The message text.
    pub message: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The Unix socket to listen on.
    pub socket_path: PathBuf,
    /// How often the server pings each connection. Default: 20 seconds.
    pub ping_interval: Duration,
    /// Session-layer tunables (handshake window, eviction grace).
    pub session: SessionConfig,
}

/// Builder for configuring and starting a Tether server.
///
/// # Example
///
/// ```rust,ignore
/// let server = Server::builder()
///     .socket_path("/tmp/tether.sock")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig {
                socket_path: PathBuf::from("/tmp/tether.sock"),
                ping_interval: Duration::from_secs(20),
                session: SessionConfig::default(),
            },
        }
    }

    /// Sets the Unix socket path to listen on.
    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.socket_path = path.into();
        self
    }

    /// Sets the keepalive ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.config.session = config;
        self
    }

    /// Binds the socket and builds the server.
    pub async fn build(self) -> Result<Server, TetherError> {
        let transport = UnixServerTransport::bind(&self.config.socket_path).await?;
        let registry = UserRegistry::new(self.config.session.clone());

        Ok(Server {
            transport,
            registry,
            messages: Bus::new(),
            config: self.config,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Tether server.
///
/// Call [`run()`](Self::run) to start accepting connections. Grab
/// [`registry()`](Self::registry) and [`messages()`](Self::messages)
/// handles first — `run` consumes the server.
pub struct Server {
    transport: UnixServerTransport,
    registry: UserRegistry<UnixConnection>,
    messages: Bus<UserMessage>,
    config: ServerConfig,
}

impl Server {
    /// Creates a new builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// The socket path the server is listening on.
    pub fn socket_path(&self) -> &Path {
        self.transport.local_path()
    }

    /// A handle to the session table: who is connected, with how many
    /// connections, and a broadcast path back to them.
    pub fn registry(&self) -> UserRegistry<UnixConnection> {
        self.registry.clone()
    }

    /// The application message stream: every `CLIENT::MESSAGE` from every
    /// session, tagged with its sender's id.
    pub fn messages(&self) -> Bus<UserMessage> {
        self.messages.clone()
    }

    /// Runs the accept loop.
    ///
    /// Every accepted connection gets its own handler task (handshake,
    /// then the service loop). Runs until the process is terminated.
    pub async fn run(mut self) -> Result<(), TetherError> {
        tracing::info!(path = %self.config.socket_path.display(), "tether server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let registry = self.registry.clone();
                    let messages = self.messages.clone();
                    let ping_interval = self.config.ping_interval;
                    let handshake_timeout = self.config.session.handshake_timeout;
                    tokio::spawn(handle_connection(
                        conn,
                        registry,
                        messages,
                        ping_interval,
                        handshake_timeout,
                    ));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}
