//! The session driver: the client's reconnect/keepalive state machine.
//!
//! One task owns the whole client lifecycle:
//!
//! ```text
//!        ┌────────(link lost / handshake failed)────────┐
//!        ▼                                              │
//!      IDLE ──(connect event)──→ HANDSHAKING ──(confirmed)──→ ACTIVE
//! ```
//!
//! Because [`run`](SessionDriver::run) is a single loop, there is never
//! more than one handshake in flight and a new attempt starts only after
//! the state has settled back to [`DriverState::Idle`] — re-entrant connect
//! events cannot overlap attempts by construction.
//!
//! While ACTIVE the driver sends a keepalive ping on an interval, answers
//! the server's pings with exactly one pong each, ignores the server's pong
//! answers, and routes everything else to the application message bus.
//! When the link drops, ACTIVE ends: the keepalive stops, the cycle's
//! subscriptions drop, and the confirmed id is cleared before the next
//! attempt.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use tether_bus::{Bus, BusStream};
use tether_protocol::{ClientBody, Packet, ServerBody};
use tether_transport::{ClientTransport, Event, EventKind};

use crate::{Api, ClientError, HandshakeFailure, handshake};

// ---------------------------------------------------------------------------
// DriverState
// ---------------------------------------------------------------------------

/// Where the driver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No session: waiting for the transport to produce a link.
    Idle,
    /// A link is up and exactly one handshake attempt is in flight.
    Handshaking,
    /// The session is confirmed; keepalive is running.
    Active,
}

// ---------------------------------------------------------------------------
// DriverConfig
// ---------------------------------------------------------------------------

/// Tunables for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// The logical identity asserted at handshake.
    pub id: String,
    /// How often the client pings the server while ACTIVE.
    /// Default: 12.5 seconds.
    pub ping_interval: Duration,
    /// How long to wait after a failed handshake before the next attempt.
    /// Default: 2.5 seconds.
    pub retry_wait: Duration,
    /// The window for each handshake phase. Default: 5 seconds.
    pub handshake_timeout: Duration,
    /// How long to sit in IDLE before logging that the link is still down.
    /// Default: 5 seconds.
    pub connect_timeout: Duration,
}

impl DriverConfig {
    /// Reference timings for the given identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ping_interval: Duration::from_millis(12_500),
            retry_wait: Duration::from_millis(2_500),
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionDriver
// ---------------------------------------------------------------------------

/// How an ACTIVE phase ended.
enum ActiveEnd {
    /// The link dropped; the transport will redial, the driver re-attempts.
    LinkLost,
    /// The transport is gone for good; the driver exits.
    TransportGone,
}

/// Drives one client session against a reconnecting transport.
pub struct SessionDriver<T: ClientTransport> {
    api: Arc<Api<T>>,
    config: DriverConfig,
    state: watch::Sender<DriverState>,
    confirmed: Mutex<Option<String>>,
    messages: Bus<Packet<ServerBody>>,
    /// Subscriptions taken at construction, consumed by [`run`]'s first
    /// link iteration. A connect event that fires between `new` and the
    /// run task's first poll is buffered here instead of lost.
    startup: Mutex<Option<(BusStream<Event>, BusStream<Packet<ServerBody>>)>>,
}

impl<T: ClientTransport> SessionDriver<T> {
    /// Wraps a transport and prepares the driver. Nothing happens until
    /// [`run`](Self::run) is awaited, but the driver is already listening:
    /// transport signals from this point on are buffered for `run`.
    pub fn new(transport: T, config: DriverConfig) -> Self {
        let api = Api::spawn(transport);
        let startup = (api.events().subscribe(), api.messages().subscribe());
        let (state, _) = watch::channel(DriverState::Idle);
        Self {
            api,
            config,
            state,
            confirmed: Mutex::new(None),
            messages: Bus::new(),
            startup: Mutex::new(Some(startup)),
        }
    }

    /// A watch on the driver's state. `wait_for` lets callers block until
    /// the state settles somewhere.
    pub fn state(&self) -> watch::Receiver<DriverState> {
        self.state.subscribe()
    }

    /// The id the server confirmed, while ACTIVE.
    pub fn confirmed_id(&self) -> Option<String> {
        self.confirmed.lock().expect("driver lock poisoned").clone()
    }

    /// Server packets that are neither keepalive nor handshake traffic.
    pub fn messages(&self) -> &Bus<Packet<ServerBody>> {
        &self.messages
    }

    /// Sends one packet to the server (dropped by the transport while the
    /// link is down).
    pub async fn send(&self, packet: &Packet<ClientBody>) -> Result<(), ClientError> {
        self.api.send(packet).await
    }

    /// Shuts the driver down for good: the transport stops redialing and
    /// [`run`](Self::run) returns.
    pub async fn dispose(&self) {
        self.api.dispose().await;
    }

    /// Runs the session until the transport is destroyed (`Ok`) or a fatal
    /// transport error occurs (`Err`). The caller is expected to treat the
    /// error case as unrecoverable.
    pub async fn run(&self) -> Result<(), ClientError> {
        let result = self.drive().await;
        self.set_state(DriverState::Idle);
        self.messages.dispose();
        result
    }

    async fn drive(&self) -> Result<(), ClientError> {
        loop {
            // The first link uses the subscriptions taken at construction,
            // so nothing published before this task's first poll is missed.
            // Later links resubscribe fresh; either way the streams are held
            // across handshake retries so nothing published during a retry
            // wait is lost.
            let (mut events, mut messages) =
                match self.startup.lock().expect("driver lock poisoned").take() {
                    Some(streams) => streams,
                    None => (self.api.events().subscribe(), self.api.messages().subscribe()),
                };

            self.set_state(DriverState::Idle);
            if !self.wait_connected(&mut events).await? {
                return Ok(());
            }

            // One link, possibly several handshake attempts.
            let end = loop {
                self.set_state(DriverState::Handshaking);
                match handshake::perform(
                    &self.api,
                    &mut messages,
                    &mut events,
                    &self.config.id,
                    self.config.handshake_timeout,
                )
                .await
                {
                    Ok(id) => {
                        *self.confirmed.lock().expect("driver lock poisoned") = Some(id);
                        self.set_state(DriverState::Active);

                        let end = self.run_active(&mut events, &mut messages).await?;

                        self.confirmed.lock().expect("driver lock poisoned").take();
                        break Some(end);
                    }
                    // The link itself is gone; back to waiting for one.
                    Err(HandshakeFailure::Closed) => break None,
                    Err(failure) => {
                        tracing::warn!(%failure, "handshake failed; will retry");
                        self.set_state(DriverState::Idle);
                        tokio::time::sleep(self.config.retry_wait).await;
                    }
                }
            };

            match end {
                Some(ActiveEnd::TransportGone) => return Ok(()),
                Some(ActiveEnd::LinkLost) => {
                    tracing::info!("session ended; waiting for a new link");
                }
                None => {}
            }
        }
    }

    /// IDLE: waits for the transport to report a link.
    ///
    /// Returns `false` when the transport is gone for good. Refused errors
    /// are expected (the server may not be up yet) — the transport keeps
    /// redialing on its own schedule; anything else is fatal.
    async fn wait_connected(&self, events: &mut BusStream<Event>) -> Result<bool, ClientError> {
        loop {
            let event =
                match tokio::time::timeout(self.config.connect_timeout, events.recv()).await {
                    Err(_) => {
                        tracing::debug!("no link yet; still waiting");
                        continue;
                    }
                    Ok(None) => return Ok(false),
                    Ok(Some(event)) => event,
                };

            match event.kind {
                EventKind::Connect => return Ok(true),
                // A frame can only arrive over a live link; treat it as
                // proof of connection if the Connect itself was missed.
                EventKind::Data { .. } => return Ok(true),
                EventKind::Destroy => return Ok(false),
                EventKind::Error { message, refused } => {
                    if refused {
                        tracing::debug!("connection refused; server not up yet");
                    } else {
                        return Err(ClientError::Fatal(message));
                    }
                }
                _ => {}
            }
        }
    }

    /// ACTIVE: keepalive plus message routing, until the link drops.
    async fn run_active(
        &self,
        events: &mut BusStream<Event>,
        messages: &mut BusStream<Packet<ServerBody>>,
    ) -> Result<ActiveEnd, ClientError> {
        let mut keepalive = tokio::time::interval(self.config.ping_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick is immediate; the first ping should wait
        // a full period.
        keepalive.tick().await;

        loop {
            tokio::select! {
                _ = keepalive.tick() => {
                    self.api.send(&Packet::new(ClientBody::Ping)).await?;
                }
                event = events.recv() => match event {
                    None => return Ok(ActiveEnd::TransportGone),
                    Some(e) => match e.kind {
                        EventKind::Destroy => return Ok(ActiveEnd::TransportGone),
                        kind if kind.is_terminal() => return Ok(ActiveEnd::LinkLost),
                        EventKind::Error { message, refused: false } => {
                            return Err(ClientError::Fatal(message));
                        }
                        _ => {}
                    },
                },
                packet = messages.recv() => match packet {
                    None => return Ok(ActiveEnd::TransportGone),
                    Some(packet) => match &packet.body {
                        ServerBody::Ping => {
                            self.api.send(&Packet::new(ClientBody::Pong)).await?;
                        }
                        ServerBody::Pong => {}
                        _ => self.messages.publish(packet),
                    },
                },
            }
        }
    }

    fn set_state(&self, next: DriverState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = ?state, to = ?next, "driver state change");
            *state = next;
            true
        });
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! These tests script the server's half of the conversation by
    //! publishing events into a captive transport, and observe the driver
    //! through its state watch and its captured outbound frames. Virtual
    //! time (`start_paused`) makes the keepalive and retry timings exact.

    use super::*;
    use tether_protocol::{decode, encode};

    use crate::testing::{ScriptTransport, script};

    fn data(body: ServerBody) -> Event {
        Event::now(EventKind::Data {
            bytes: encode(&Packet::new(body)).expect("encode"),
        })
    }

    /// Driver plus its scripted surroundings, with `run()` already spawned.
    struct Harness {
        driver: Arc<SessionDriver<ScriptTransport>>,
        sent: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
        events: Bus<Event>,
        state: watch::Receiver<DriverState>,
        task: tokio::task::JoinHandle<Result<(), ClientError>>,
    }

    fn harness() -> Harness {
        let (transport, sent, events) = script();
        let driver = Arc::new(SessionDriver::new(transport, DriverConfig::new("nick")));
        let state = driver.state();
        let task = tokio::spawn({
            let driver = Arc::clone(&driver);
            async move { driver.run().await }
        });
        Harness {
            driver,
            sent,
            events,
            state,
            task,
        }
    }

    impl Harness {
        /// Walks the scripted server through one full handshake.
        async fn complete_handshake(&mut self) {
            self.events.publish(Event::now(EventKind::Connect));
            self.state
                .wait_for(|s| *s == DriverState::Handshaking)
                .await
                .expect("driver alive");

            self.events.publish(data(ServerBody::HandshakeRequest));

            let bytes = self.sent.recv().await.expect("handshake frame");
            let packet: Packet<ClientBody> = decode(&bytes).unwrap();
            assert_eq!(packet.body, ClientBody::Handshake { id: "nick".into() });

            self.events
                .publish(data(ServerBody::HandshakeConfirmed { id: "nick".into() }));
            self.state
                .wait_for(|s| *s == DriverState::Active)
                .await
                .expect("driver alive");
        }
    }

    #[tokio::test]
    async fn test_connect_event_published_at_startup_is_not_lost() {
        let (transport, _sent, events) = script();
        let driver = Arc::new(SessionDriver::new(transport, DriverConfig::new("nick")));
        let mut state = driver.state();

        // The connect fires before run() is even spawned; the driver's
        // construction-time subscription must have buffered it.
        events.publish(Event::now(EventKind::Connect));

        let task = tokio::spawn({
            let driver = Arc::clone(&driver);
            async move { driver.run().await }
        });

        state
            .wait_for(|s| *s == DriverState::Handshaking)
            .await
            .expect("driver alive");

        driver.dispose().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_reaches_active_and_records_confirmed_id() {
        let mut h = harness();
        assert_eq!(*h.state.borrow(), DriverState::Idle);

        h.complete_handshake().await;

        assert_eq!(h.driver.confirmed_id(), Some("nick".to_string()));
        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_link_loss_settles_to_idle_and_clears_id() {
        let mut h = harness();
        h.complete_handshake().await;

        h.events.publish(Event::now(EventKind::Disconnect));
        h.state
            .wait_for(|s| *s == DriverState::Idle)
            .await
            .expect("driver alive");

        assert_eq!(h.driver.confirmed_id(), None);
        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_runs_a_full_second_handshake() {
        let mut h = harness();
        h.complete_handshake().await;

        h.events.publish(Event::now(EventKind::Disconnect));
        h.state
            .wait_for(|s| *s == DriverState::Idle)
            .await
            .expect("driver alive");

        // The dialer comes back; the whole dance repeats.
        h.complete_handshake().await;
        assert_eq!(h.driver.confirmed_id(), Some("nick".to_string()));

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_retries_after_wait() {
        let mut h = harness();

        // Link up, but the server never sends its request.
        h.events.publish(Event::now(EventKind::Connect));
        h.state
            .wait_for(|s| *s == DriverState::Handshaking)
            .await
            .expect("driver alive");

        // 5s handshake window + 2.5s retry wait elapse; the driver settles
        // to Idle in between and only then accepts the next connect.
        h.state
            .wait_for(|s| *s == DriverState::Idle)
            .await
            .expect("driver alive");

        h.complete_handshake().await;
        assert_eq!(h.driver.confirmed_id(), Some("nick".to_string()));

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_pings_on_the_interval() {
        let mut h = harness();
        h.complete_handshake().await;

        tokio::time::sleep(Duration::from_millis(12_600)).await;

        let bytes = h.sent.recv().await.expect("keepalive frame");
        let packet: Packet<ClientBody> = decode(&bytes).unwrap();
        assert_eq!(packet.body, ClientBody::Ping);

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_ping_answered_with_one_pong() {
        let mut h = harness();
        h.complete_handshake().await;

        h.events.publish(data(ServerBody::Ping));

        let bytes = h.sent.recv().await.expect("pong frame");
        let packet: Packet<ClientBody> = decode(&bytes).unwrap();
        assert_eq!(packet.body, ClientBody::Pong);
        assert!(h.sent.try_recv().is_err(), "exactly one pong");

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_pong_is_ignored() {
        let mut h = harness();
        h.complete_handshake().await;

        h.events.publish(data(ServerBody::Pong));

        // Nothing goes out and nothing reaches the application.
        tokio::task::yield_now().await;
        assert!(h.sent.try_recv().is_err());

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_other_messages_route_to_application_bus() {
        let mut h = harness();
        h.complete_handshake().await;

        let mut app = h.driver.messages().subscribe();
        h.events
            .publish(data(ServerBody::HandshakeConfirmed { id: "late".into() }));

        let packet = app.recv().await.expect("routed packet");
        assert_eq!(packet.body, ServerBody::HandshakeConfirmed { id: "late".into() });

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_refused_error_keeps_waiting() {
        let mut h = harness();

        h.events.publish(Event::now(EventKind::Error {
            message: "connection refused".into(),
            refused: true,
        }));

        // Still alive, still Idle; the next connect works.
        h.complete_handshake().await;

        h.driver.dispose().await;
        h.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unclassifiable_error_is_fatal() {
        let h = harness();

        h.events.publish(Event::now(EventKind::Error {
            message: "permission denied".into(),
            refused: false,
        }));

        let result = h.task.await.unwrap();
        assert!(matches!(result, Err(ClientError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_dispose_ends_run_cleanly_from_idle() {
        let h = harness();

        h.driver.dispose().await;

        h.task.await.unwrap().unwrap();
        assert_eq!(*h.state.borrow(), DriverState::Idle);
    }
}
