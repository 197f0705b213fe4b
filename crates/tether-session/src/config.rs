//! Session layer configuration.

use std::time::Duration;

/// Tunables for session behavior.
///
/// The defaults match the protocol's reference timings; override individual
/// fields with struct update syntax when a test or deployment needs
/// different ones.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a fully-offline user survives before being disposed.
    ///
    /// A client that reconnects and completes a handshake within this window
    /// finds its session intact. Default: 5 seconds.
    pub evict_grace: Duration,

    /// How long a freshly accepted connection has to answer the handshake
    /// request. Default: 5 seconds.
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            evict_grace: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
