//! The user registry: every logical session the server knows about.
//!
//! The registry is a cheaply-cloneable handle (the map lives behind an
//! `Arc<Mutex<..>>`); the acceptor, every per-connection task, and every
//! eviction timer hold clones of the same registry. There is no global —
//! tests run as many independent registries as they like.
//!
//! # Lifecycle
//!
//! ```text
//! handshake_complete() ──→ [attached] ──remove_client()──→ [offline, timer armed]
//!         ↑                                                       │
//!         └──────────(handshake within grace cancels timer)───────┤
//!                                                                 ▼ (grace elapsed)
//!                                                              evicted
//! ```
//!
//! # Locking
//!
//! The mutex is a `std::sync::Mutex` and is never held across an `await`:
//! every method takes what it needs out of the map under the lock, releases
//! it, and does the async work (disposing connections, broadcasting) on the
//! extracted `Arc<Client>`s. Eviction timers carry a generation token and
//! verify it under the lock before removing anything, so a timer that slept
//! through a dispose-and-recreate cannot touch the new user.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tether_bus::BusStream;
use tether_protocol::{ClientBody, Packet, ServerBody};
use tether_transport::{Connection, ConnectionId};

use crate::{Client, SessionConfig, User};

/// Every armed eviction timer gets a unique token. When the timer fires it
/// must find its own token still recorded on the user, or it is stale: the
/// user was disposed (and possibly re-created) while the timer slept.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// A shared handle to the server's session table.
pub struct UserRegistry<C: Connection> {
    users: Arc<Mutex<HashMap<String, User<C>>>>,
    config: SessionConfig,
}

impl<C: Connection> Clone for UserRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
            config: self.config.clone(),
        }
    }
}

impl<C: Connection> UserRegistry<C> {
    /// Creates an empty registry with the given config.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            users: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Attaches a handshaken connection to the user with this id, creating
    /// the user if it does not exist yet. Returns the user's connection
    /// count after the attach.
    ///
    /// This is the insert-or-attach point that consolidates simultaneous
    /// connections: a given id maps to at most one user, ever.
    pub fn handshake_complete(&self, id: &str, client: Arc<Client<C>>) -> usize {
        let mut users = self.lock();
        let user = users.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(%id, "user created");
            User::new(id)
        });
        user.add_client(client);
        let connections = user.connections();
        tracing::info!(%id, connections, "connection attached");
        connections
    }

    /// Detaches one connection from a user and disposes it.
    ///
    /// When this was the user's last connection, a single grace-period timer
    /// is armed; it disposes the user unless a new connection attaches
    /// first. Unknown ids and unknown connections are no-ops.
    pub async fn remove_client(&self, id: &str, conn_id: ConnectionId) {
        let detached = {
            let mut users = self.lock();
            let Some(user) = users.get_mut(id) else {
                tracing::debug!(%id, %conn_id, "remove_client for unknown user");
                return;
            };
            let detached = user.detach(conn_id);

            if user.connections() == 0 && !user.eviction_pending() {
                let registry = self.clone();
                let owner = id.to_string();
                let grace = self.config.evict_grace;
                let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    registry.evict(&owner, generation).await;
                });
                user.set_eviction(generation, handle);
                tracing::info!(%id, grace_ms = self.config.evict_grace.as_millis() as u64,
                    "user fully offline; eviction armed");
            }
            detached
        };

        if let Some(client) = detached {
            client.dispose().await;
        }
    }

    /// Removes a user outright, disposing every connection it still owns.
    ///
    /// Returns `true` if the user existed. Exactly one caller wins; a
    /// second call finds nothing and returns `false`. A pending eviction
    /// timer is not aborted here — removing the user from the map makes the
    /// timer's generation stale, so it no-ops when it fires, even against a
    /// user re-created under the same id in the meantime.
    pub async fn dispose_user(&self, id: &str) -> bool {
        let Some(mut user) = self.lock().remove(id) else {
            return false;
        };

        let clients = user.detach_all();
        for client in &clients {
            client.dispose().await;
        }
        user.dispose_messages();
        tracing::info!(%id, connections = clients.len(), "user disposed");
        true
    }

    /// The grace-period timer's landing point: disposes the user only if the
    /// firing timer is still the one recorded on it and the user is still
    /// fully offline. Anything else means the world moved on while the timer
    /// slept, and it must not touch the (possibly re-created) user.
    async fn evict(&self, id: &str, generation: u64) {
        let mut user = {
            let mut users = self.lock();
            match users.entry(id.to_string()) {
                Entry::Occupied(entry)
                    if entry.get().eviction_generation() == Some(generation)
                        && entry.get().connections() == 0 =>
                {
                    entry.remove()
                }
                _ => {
                    tracing::debug!(%id, generation, "stale eviction timer; no-op");
                    return;
                }
            }
        };

        let clients = user.detach_all();
        for client in &clients {
            client.dispose().await;
        }
        user.dispose_messages();
        tracing::info!(%id, "user evicted after grace period");
    }

    /// Broadcasts one packet to every connection the user owns.
    ///
    /// Best-effort: a connection that fails to take the write is logged and
    /// skipped. Returns the number of connections written.
    pub async fn send(&self, id: &str, packet: &Packet<ServerBody>) -> usize {
        let clients = {
            let users = self.lock();
            users
                .get(id)
                .map(|user| user.clients_snapshot())
                .unwrap_or_default()
        };

        let mut delivered = 0;
        for client in clients {
            match client.send(packet).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(%id, conn_id = %client.id(), error = %e,
                        "broadcast write failed");
                }
            }
        }
        delivered
    }

    /// Subscribes to a user's aggregate message stream, if the user exists.
    pub fn subscribe(&self, id: &str) -> Option<BusStream<Packet<ClientBody>>> {
        self.lock().get(id).map(|user| user.subscribe())
    }

    /// The number of connections the user currently owns (0 if unknown).
    pub fn connections(&self, id: &str) -> usize {
        self.lock().get(id).map_or(0, |user| user.connections())
    }

    /// Whether a user with this id exists (attached or within grace).
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// The number of known users.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no users are known.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, User<C>>> {
        self.users.lock().expect("registry lock poisoned")
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Timer-dependent tests run under `start_paused = true`: virtual time
    //! advances instantly while the runtime is otherwise idle, so a 5-second
    //! grace period costs nothing and never flakes.

    use std::time::Duration;

    use super::*;
    use tether_protocol::encode;
    use tether_transport::memory::{self, MemoryConnection};

    fn client_pair() -> (Arc<Client<MemoryConnection>>, MemoryConnection) {
        let (local, peer) = memory::pair();
        (Client::spawn(local), peer)
    }

    fn registry() -> UserRegistry<MemoryConnection> {
        UserRegistry::new(SessionConfig::default())
    }

    /// Lets already-woken tasks (an expired eviction timer, client pumps)
    /// finish their remaining ready work.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    // =====================================================================
    // handshake_complete()
    // =====================================================================

    #[tokio::test]
    async fn test_handshake_complete_new_id_creates_user() {
        let registry = registry();
        let (client, _peer) = client_pair();

        let connections = registry.handshake_complete("nick", client);

        assert_eq!(connections, 1);
        assert!(registry.contains("nick"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_handshake_complete_same_id_consolidates_connections() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let (c2, _p2) = client_pair();

        assert_eq!(registry.handshake_complete("nick", c1), 1);
        assert_eq!(registry.handshake_complete("nick", c2), 2);

        // One user, two connections — not two users.
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connections("nick"), 2);
    }

    #[tokio::test]
    async fn test_handshake_complete_distinct_ids_stay_separate() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let (c2, _p2) = client_pair();

        registry.handshake_complete("nick", c1);
        registry.handshake_complete("maggie", c2);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.connections("nick"), 1);
        assert_eq!(registry.connections("maggie"), 1);
    }

    // =====================================================================
    // send() / subscribe()
    // =====================================================================

    #[tokio::test]
    async fn test_send_broadcasts_to_every_connection() {
        let registry = registry();
        let (c1, p1) = client_pair();
        let (c2, p2) = client_pair();
        registry.handshake_complete("nick", c1);
        registry.handshake_complete("nick", c2);

        let delivered = registry.send("nick", &Packet::new(ServerBody::Ping)).await;
        assert_eq!(delivered, 2);

        for peer in [&p1, &p2] {
            let bytes = peer.recv().await.unwrap().expect("frame");
            let packet: Packet<ServerBody> = tether_protocol::decode(&bytes).unwrap();
            assert_eq!(packet.body, ServerBody::Ping);
        }
    }

    #[tokio::test]
    async fn test_send_to_unknown_user_delivers_nothing() {
        let registry = registry();
        assert_eq!(registry.send("ghost", &Packet::new(ServerBody::Ping)).await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_merges_messages_from_all_connections() {
        let registry = registry();
        let (c1, p1) = client_pair();
        let (c2, p2) = client_pair();
        registry.handshake_complete("nick", c1);
        registry.handshake_complete("nick", c2);

        let mut stream = registry.subscribe("nick").expect("user exists");

        p1.send(&encode(&Packet::new(ClientBody::Message { message: "one".into() })).unwrap())
            .await
            .unwrap();
        let got = stream.recv().await.expect("merged packet");
        assert!(matches!(got.body, ClientBody::Message { ref message } if message == "one"));

        p2.send(&encode(&Packet::new(ClientBody::Message { message: "two".into() })).unwrap())
            .await
            .unwrap();
        let got = stream.recv().await.expect("merged packet");
        assert!(matches!(got.body, ClientBody::Message { ref message } if message == "two"));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_user_returns_none() {
        let registry = registry();
        assert!(registry.subscribe("ghost").is_none());
    }

    // =====================================================================
    // remove_client() / eviction
    // =====================================================================

    #[tokio::test]
    async fn test_remove_client_disposes_the_connection() {
        let registry = registry();
        let (client, peer) = client_pair();
        let conn_id = client.id();
        registry.handshake_complete("nick", client);

        registry.remove_client("nick", conn_id).await;

        // The peer observes the close.
        assert_eq!(peer.recv().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_last_client_evicts_after_grace() {
        let registry = registry();
        let (client, _peer) = client_pair();
        let conn_id = client.id();
        registry.handshake_complete("nick", client);

        registry.remove_client("nick", conn_id).await;

        // Fully offline but within grace: still registered.
        assert!(registry.contains("nick"));
        assert_eq!(registry.connections("nick"), 0);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        settle().await;

        assert!(!registry.contains("nick"), "grace elapsed; user evicted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_one_of_two_connections_does_not_arm_eviction() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let (c2, _p2) = client_pair();
        let c1_id = c1.id();
        registry.handshake_complete("nick", c1);
        registry.handshake_complete("nick", c2);

        registry.remove_client("nick", c1_id).await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        // Still one live connection: no eviction, ever.
        assert!(registry.contains("nick"));
        assert_eq!(registry.connections("nick"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattach_within_grace_cancels_eviction() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let c1_id = c1.id();
        registry.handshake_complete("nick", c1);
        registry.remove_client("nick", c1_id).await;

        tokio::time::sleep(Duration::from_secs(3)).await;

        // Reconnect before the 5s grace elapses.
        let (c2, _p2) = client_pair();
        registry.handshake_complete("nick", c2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert!(registry.contains("nick"), "cancelled timer must never fire");
        assert_eq!(registry.connections("nick"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_client_twice_arms_a_single_timer() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let c1_id = c1.id();
        registry.handshake_complete("nick", c1);

        registry.remove_client("nick", c1_id).await;
        // Second removal of the same (now unknown) connection: no-op, and
        // crucially no second timer.
        registry.remove_client("nick", c1_id).await;

        tokio::time::sleep(Duration::from_secs(4)).await;

        // Reattach at t=4s cancels the one pending timer. If a duplicate
        // timer had been armed by the second removal, it would still fire.
        let (c2, _p2) = client_pair();
        registry.handshake_complete("nick", c2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert!(registry.contains("nick"));
    }

    #[tokio::test]
    async fn test_remove_client_unknown_user_is_noop() {
        let registry = registry();
        registry.remove_client("ghost", ConnectionId::next()).await;
        assert!(registry.is_empty());
    }

    // =====================================================================
    // dispose_user()
    // =====================================================================

    #[tokio::test]
    async fn test_dispose_user_removes_and_reports_true() {
        let registry = registry();
        let (client, peer) = client_pair();
        registry.handshake_complete("nick", client);

        assert!(registry.dispose_user("nick").await);
        assert!(!registry.contains("nick"));
        // Owned connections are closed on teardown.
        assert_eq!(peer.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dispose_user_second_call_is_noop() {
        let registry = registry();
        let (client, _peer) = client_pair();
        registry.handshake_complete("nick", client);

        assert!(registry.dispose_user("nick").await);
        assert!(!registry.dispose_user("nick").await, "second dispose is a no-op");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_evict_recreated_user() {
        let registry = registry();
        let (c1, _p1) = client_pair();
        let c1_id = c1.id();
        registry.handshake_complete("nick", c1);

        // Arm the grace timer, then dispose the user explicitly while the
        // timer is still pending. The timer is now stale.
        registry.remove_client("nick", c1_id).await;
        assert!(registry.dispose_user("nick").await);

        // The same id comes back with a live connection.
        let (c2, _p2) = client_pair();
        registry.handshake_complete("nick", c2);

        // Let the stale timer fire. It must recognise the user as a new
        // incarnation and leave it alone.
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert!(registry.contains("nick"), "stale timer must not evict");
        assert_eq!(registry.connections("nick"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_fires_dispose_exactly_once() {
        let registry = registry();
        let (client, _peer) = client_pair();
        let conn_id = client.id();
        registry.handshake_complete("nick", client);
        registry.remove_client("nick", conn_id).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        // The timer already disposed the user; a manual dispose finds nothing.
        assert!(!registry.dispose_user("nick").await);
        assert!(registry.is_empty());
    }
}
