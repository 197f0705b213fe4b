//! A logical user: one identity, any number of live connections.
//!
//! When the same id completes a handshake on several physical connections
//! (two terminals, a reconnect racing the old link's teardown), they all
//! land on one `User`. Messages from any owned connection merge into the
//! user's aggregate bus; a send goes out on every owned connection.
//!
//! The `User` itself is a plain struct with no locking — it lives inside
//! the [`UserRegistry`](crate::UserRegistry)'s map and is only touched with
//! the registry lock held. Anything that must happen outside the lock
//! (disposing a connection) is done by the registry on the `Arc<Client>`s
//! this type hands back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use tether_bus::{Bus, BusStream};
use tether_protocol::{ClientBody, Packet};
use tether_transport::{Connection, ConnectionId};

use crate::Client;

/// One owned connection: the wrapped client plus the task forwarding its
/// messages into the user's aggregate bus.
struct ClientEntry<C: Connection> {
    client: Arc<Client<C>>,
    forward: JoinHandle<()>,
}

/// A logical session, keyed by the id the client asserted at handshake.
pub struct User<C: Connection> {
    id: String,
    clients: HashMap<ConnectionId, ClientEntry<C>>,
    messages: Bus<Packet<ClientBody>>,
    /// The pending grace-period timer, if the user is fully offline:
    /// the timer's generation token plus its task handle. At most one
    /// exists at a time; re-attaching a connection cancels it.
    eviction: Option<(u64, JoinHandle<()>)>,
}

impl<C: Connection> User<C> {
    /// Creates an empty user for the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            clients: HashMap::new(),
            messages: Bus::new(),
            eviction: None,
        }
    }

    /// The id this user's clients asserted.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The number of live connections owned by this user.
    pub fn connections(&self) -> usize {
        self.clients.len()
    }

    /// Attaches a connection to this user, cancelling any pending eviction.
    ///
    /// Attaching a connection the user already owns is a no-op.
    pub fn add_client(&mut self, client: Arc<Client<C>>) {
        self.cancel_eviction();

        let conn_id = client.id();
        if self.clients.contains_key(&conn_id) {
            tracing::debug!(id = %self.id, %conn_id, "client already attached");
            return;
        }

        // Forward everything this connection decodes into the aggregate
        // stream. The task ends when the client's message bus is disposed.
        let mut stream = client.messages().subscribe();
        let aggregate = self.messages.clone();
        let forward = tokio::spawn(async move {
            while let Some(packet) = stream.recv().await {
                aggregate.publish(packet);
            }
        });

        self.clients.insert(conn_id, ClientEntry { client, forward });
    }

    /// Detaches one connection, returning its client so the caller can
    /// dispose it outside the registry lock. `None` if not owned.
    pub fn detach(&mut self, conn_id: ConnectionId) -> Option<Arc<Client<C>>> {
        let entry = self.clients.remove(&conn_id)?;
        entry.forward.abort();
        Some(entry.client)
    }

    /// Detaches every connection for teardown.
    pub fn detach_all(&mut self) -> Vec<Arc<Client<C>>> {
        self.clients
            .drain()
            .map(|(_, entry)| {
                entry.forward.abort();
                entry.client
            })
            .collect()
    }

    /// Clients currently owned, for a broadcast outside the lock.
    pub fn clients_snapshot(&self) -> Vec<Arc<Client<C>>> {
        self.clients
            .values()
            .map(|entry| Arc::clone(&entry.client))
            .collect()
    }

    /// A new subscription to the aggregate message stream.
    pub fn subscribe(&self) -> BusStream<Packet<ClientBody>> {
        self.messages.subscribe()
    }

    /// Whether a grace-period timer is currently armed.
    pub fn eviction_pending(&self) -> bool {
        self.eviction.is_some()
    }

    /// The generation token of the pending grace-period timer, if any. A
    /// timer whose generation no longer matches is stale and must not fire.
    pub fn eviction_generation(&self) -> Option<u64> {
        self.eviction.as_ref().map(|(generation, _)| *generation)
    }

    /// Records the grace-period timer for this user.
    pub fn set_eviction(&mut self, generation: u64, handle: JoinHandle<()>) {
        debug_assert!(self.eviction.is_none(), "eviction timer armed twice");
        self.eviction = Some((generation, handle));
    }

    /// Cancels a pending grace-period timer, if any.
    pub fn cancel_eviction(&mut self) {
        if let Some((_, handle)) = self.eviction.take() {
            handle.abort();
            tracing::debug!(id = %self.id, "pending eviction cancelled");
        }
    }

    /// Ends the aggregate message stream. Called once, on teardown, after
    /// the client set has drained.
    pub fn dispose_messages(&self) {
        debug_assert!(self.clients.is_empty(), "teardown with clients attached");
        self.messages.dispose();
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::encode;
    use tether_transport::memory::{self, MemoryConnection};

    fn client_pair() -> (Arc<Client<MemoryConnection>>, MemoryConnection) {
        let (local, peer) = memory::pair();
        (Client::spawn(local), peer)
    }

    #[tokio::test]
    async fn test_add_client_same_connection_twice_is_noop() {
        let mut user: User<MemoryConnection> = User::new("nick");
        let (client, _peer) = client_pair();

        user.add_client(Arc::clone(&client));
        user.add_client(client);

        assert_eq!(user.connections(), 1);
    }

    #[tokio::test]
    async fn test_detach_unknown_connection_returns_none() {
        let mut user: User<MemoryConnection> = User::new("nick");
        assert!(user.detach(ConnectionId::next()).is_none());
    }

    #[tokio::test]
    async fn test_messages_from_any_connection_merge_into_one_stream() {
        let mut user: User<MemoryConnection> = User::new("nick");
        let (c1, p1) = client_pair();
        let (c2, p2) = client_pair();
        user.add_client(c1);
        user.add_client(c2);

        let mut stream = user.subscribe();

        let hello = encode(&Packet::new(ClientBody::Message {
            message: "from one".into(),
        }))
        .unwrap();
        p1.send(&hello).await.unwrap();
        let got = stream.recv().await.expect("forwarded packet");
        assert!(matches!(got.body, ClientBody::Message { ref message } if message == "from one"));

        let again = encode(&Packet::new(ClientBody::Message {
            message: "from two".into(),
        }))
        .unwrap();
        p2.send(&again).await.unwrap();
        let got = stream.recv().await.expect("forwarded packet");
        assert!(matches!(got.body, ClientBody::Message { ref message } if message == "from two"));
    }

    #[tokio::test]
    async fn test_detach_stops_forwarding_for_that_connection() {
        let mut user: User<MemoryConnection> = User::new("nick");
        let (c1, p1) = client_pair();
        let (c2, p2) = client_pair();
        let c1_id = c1.id();
        user.add_client(c1);
        user.add_client(c2);

        let mut stream = user.subscribe();
        let detached = user.detach(c1_id).expect("owned");
        detached.dispose().await;

        // A frame on the detached connection goes nowhere; one on the
        // remaining connection still arrives.
        let _ = p1.send(&encode(&Packet::new(ClientBody::Ping)).unwrap()).await;
        p2.send(&encode(&Packet::new(ClientBody::Pong)).unwrap())
            .await
            .unwrap();

        let got = stream.recv().await.expect("forwarded packet");
        assert_eq!(got.body, ClientBody::Pong);
    }
}
