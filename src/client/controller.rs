//! Connection controller task.
//!
//! One task owns the transport, the outbound queue, the heartbeat monitor
//! and every timer. Consumer calls arrive as [`Command`]s on an unbounded
//! channel, so they are processed strictly in call order, interleaved with
//! transport events and timer fires on a single sequence. Nothing here is
//! touched from two places at once; the only shared pieces are the
//! [`SubscriptionRouter`] and the [`SharedStats`] cells.
//!
//! Every timer is an owned `Option` cleared on each state exit, and every
//! fire re-checks the current state before acting.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};

use super::environment::{EnvironmentEvent, EnvironmentReaction, EnvironmentState};
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::auth::{CredentialFuture, CredentialProvider, authorize_target};
use crate::config::ClientConfig;
use crate::domain::{
    ConnectionState, ConnectionStatus, DisconnectReason, EventType, Message, OutboundQueue,
    SubscriptionRouter,
};
use crate::error::AuthError;
use crate::transport::{
    ABNORMAL_CLOSURE, CLIENT_RESET_CLOSURE, NORMAL_CLOSURE, Transport, TransportEvent,
};

/// Requests from the consumer handle.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send(Message),
    Environment(EnvironmentEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Lock-free mirror of controller state, readable from any thread.
#[derive(Debug, Default)]
pub(crate) struct SharedStats {
    state: AtomicU8,
    reconnect_attempts: AtomicU32,
    queued_messages: AtomicUsize,
}

impl SharedStats {
    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }

    pub(crate) fn queued_messages(&self) -> usize {
        self.queued_messages.load(Ordering::Acquire)
    }
}

pub(crate) struct Controller<T> {
    config: ClientConfig,
    transport: T,
    credentials: Arc<dyn CredentialProvider>,
    router: Arc<SubscriptionRouter>,
    stats: Arc<SharedStats>,
    commands: mpsc::UnboundedReceiver<Command>,

    state: ConnectionState,
    queue: OutboundQueue,
    heartbeat: HeartbeatMonitor,
    environment: EnvironmentState,
    reconnect_attempts: u32,

    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    pending_credentials: Option<CredentialFuture>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    /// Armed for the whole of `Connecting`.
    connect_deadline: Option<Pin<Box<Sleep>>>,

    /// Set by `connect()` and implicit connects; cleared by `disconnect()`.
    session_active: bool,
    /// Set by `disconnect()`; cleared by `connect()`.
    disconnect_requested: bool,
    gave_up: bool,
}

impl<T: Transport> Controller<T> {
    pub(crate) fn new(
        config: ClientConfig,
        transport: T,
        credentials: Arc<dyn CredentialProvider>,
        router: Arc<SubscriptionRouter>,
        stats: Arc<SharedStats>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let queue = OutboundQueue::with_capacity(config.queue_capacity);
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval, config.liveness);
        Self {
            config,
            transport,
            credentials,
            router,
            stats,
            commands,
            state: ConnectionState::Disconnected,
            queue,
            heartbeat,
            environment: EnvironmentState::default(),
            reconnect_attempts: 0,
            events: None,
            pending_credentials: None,
            reconnect_timer: None,
            connect_deadline: None,
            session_active: false,
            disconnect_requested: false,
            gave_up: false,
        }
    }

    /// Runs until shutdown or until every handle is dropped.
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.teardown();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        return;
                    }
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => self.handle_transport_event(TransportEvent::Close {
                        code: ABNORMAL_CLOSURE,
                        reason: "transport event channel closed".to_string(),
                    }),
                },
                resolved = resolve_pending(&mut self.pending_credentials) => {
                    self.pending_credentials = None;
                    self.handle_credentials(resolved);
                }
                () = wait_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.handle_reconnect_timer();
                }
                () = wait_timer(&mut self.connect_deadline) => {
                    self.connect_deadline = None;
                    self.handle_connect_timeout();
                }
                _ = self.heartbeat.tick() => self.handle_heartbeat_tick(Instant::now()),
            }
            self.publish_stats();
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.disconnect_requested = false;
                self.connect_now("requested");
            }
            Command::Disconnect => {
                self.disconnect_requested = true;
                self.session_active = false;
                self.close_session(DisconnectReason::Requested);
            }
            Command::Send(message) => self.send(message),
            Command::Environment(event) => self.handle_environment(event),
            // Handled by the run loop.
            Command::Shutdown(_) => {}
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    /// Starts a connection attempt now unless one is already under way.
    fn connect_now(&mut self, trigger: &'static str) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::debug!(state = %self.state, trigger, "connect ignored, already in progress");
            return;
        }
        self.session_active = true;
        self.reconnect_timer = None;
        if self.gave_up {
            self.gave_up = false;
            self.reconnect_attempts = 0;
        }
        tracing::debug!(trigger, "connecting");
        self.begin_connecting();
    }

    fn begin_connecting(&mut self) {
        self.transition(ConnectionState::Connecting, None);
        self.connect_deadline = Some(Box::pin(tokio::time::sleep(self.config.connect_timeout)));
        self.pending_credentials = Some(self.credentials.resolve());
    }

    /// A handshake that never completes produces no transport event, so the
    /// attempt is failed from here.
    fn handle_connect_timeout(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        tracing::warn!(
            timeout_ms = u64::try_from(self.config.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            "connection attempt timed out"
        );
        self.abandon_transport("connect timeout");
        self.connection_failed(DisconnectReason::ConnectTimeout);
    }

    fn handle_credentials(&mut self, resolved: Result<Option<String>, AuthError>) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        let token = match resolved {
            Ok(token) => token,
            Err(err) => {
                tracing::warn!(error = %err, "credential resolution failed");
                self.connection_failed(DisconnectReason::CredentialsUnavailable);
                return;
            }
        };

        let target = authorize_target(&self.config.url, &self.config.token_param, token.as_deref());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        match self.transport.open(&target, events_tx) {
            Ok(()) => {
                tracing::debug!(url = %self.config.url, "transport opening");
                self.events = Some(events_rx);
            }
            Err(err) => {
                tracing::warn!(error = %err, url = %self.config.url, "transport open failed");
                self.connection_failed(DisconnectReason::TransportError {
                    message: err.to_string(),
                });
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.on_open();
                }
            }
            TransportEvent::Message(text) => self.on_inbound(&text),
            TransportEvent::Close { code, reason } => {
                self.events = None;
                match self.state {
                    ConnectionState::Connected if code == NORMAL_CLOSURE => {
                        tracing::info!(code, %reason, "server closed connection");
                        self.heartbeat.stop();
                        self.session_active = false;
                        self.transition(
                            ConnectionState::Disconnected,
                            Some(DisconnectReason::ClosedNormally),
                        );
                    }
                    ConnectionState::Connecting | ConnectionState::Connected => {
                        tracing::warn!(code, %reason, state = %self.state, "connection closed abnormally");
                        self.connection_failed(DisconnectReason::ClosedAbnormally { code });
                    }
                    ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
                }
            }
            TransportEvent::Error(message) => {
                if matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    tracing::warn!(error = %message, state = %self.state, "transport error");
                    self.abandon_transport("transport error");
                    self.connection_failed(DisconnectReason::TransportError { message });
                }
            }
        }
    }

    fn on_open(&mut self) {
        self.connect_deadline = None;
        self.reconnect_attempts = 0;
        self.gave_up = false;
        self.state = ConnectionState::Connected;
        self.heartbeat.start(Instant::now());
        self.flush_queue();
        if self.state == ConnectionState::Connected {
            tracing::info!(url = %self.config.url, "connected");
            self.emit_status(None);
        }
    }

    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let transport = &mut self.transport;
        let result = self.queue.flush(|message| match message.to_wire() {
            Ok(payload) => transport.send(payload),
            Err(err) => {
                tracing::warn!(error = %err, event_type = %message.event_type(), "dropping unencodable queued message");
                Ok(())
            }
        });
        match result {
            Ok(sent) => tracing::debug!(sent, "outbound queue flushed"),
            Err(err) => {
                tracing::warn!(error = %err, remaining = self.queue.len(), "queue flush interrupted");
                self.abandon_transport("send failed");
                self.connection_failed(DisconnectReason::TransportError {
                    message: err.to_string(),
                });
            }
        }
    }

    fn on_inbound(&mut self, text: &str) {
        let now = Instant::now();
        match Message::from_wire(text) {
            Ok(message) => {
                self.heartbeat.observe(now, message.is_heartbeat());
                if message.is_heartbeat() {
                    tracing::trace!("heartbeat received");
                    return;
                }
                // Only the controller publishes on the status channel.
                if message.event_type() == &EventType::ConnectionStatus {
                    tracing::warn!("dropping inbound connection_status frame");
                    return;
                }
                let delivered = self.router.dispatch(&message);
                tracing::trace!(event_type = %message.event_type(), delivered, "inbound dispatched");
            }
            Err(err) => {
                self.heartbeat.observe(now, false);
                tracing::warn!(error = %err, len = text.len(), "dropping malformed inbound payload");
            }
        }
    }

    fn send(&mut self, message: Message) {
        if self.state == ConnectionState::Connected {
            let payload = match message.to_wire() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, event_type = %message.event_type(), "dropping unencodable message");
                    return;
                }
            };
            if let Err(err) = self.transport.send(payload) {
                tracing::warn!(error = %err, "live send failed, queueing");
                self.queue.enqueue(message);
                self.abandon_transport("send failed");
                self.connection_failed(DisconnectReason::TransportError {
                    message: err.to_string(),
                });
            }
            return;
        }

        self.queue.enqueue(message);
        tracing::debug!(queued = self.queue.len(), state = %self.state, "message queued");
        if self.state == ConnectionState::Disconnected
            && self.reconnect_timer.is_none()
            && !self.disconnect_requested
            && !self.gave_up
            && self.environment.is_online()
        {
            self.connect_now("send");
        }
    }

    /// Handles every failure that should feed the reconnect policy.
    fn connection_failed(&mut self, reason: DisconnectReason) {
        self.connect_deadline = None;
        self.heartbeat.stop();
        self.events = None;
        self.pending_credentials = None;

        if !self.environment.is_online() {
            self.transition(ConnectionState::Disconnected, Some(reason));
            return;
        }

        if !self.config.reconnect.allows(self.reconnect_attempts) {
            self.gave_up = true;
            self.reconnect_timer = None;
            tracing::info!(
                attempts = self.reconnect_attempts,
                "reconnect attempts exhausted, giving up"
            );
            self.transition(ConnectionState::Disconnected, Some(reason));
            return;
        }

        self.reconnect_attempts += 1;
        let delay = self.config.reconnect.delay_for_attempt(self.reconnect_attempts);
        tracing::debug!(
            attempt = self.reconnect_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        self.reconnect_timer = Some(Box::pin(tokio::time::sleep(delay)));
        self.transition(ConnectionState::Disconnected, Some(reason));
    }

    fn handle_reconnect_timer(&mut self) {
        if self.state != ConnectionState::Disconnected || !self.session_active {
            return;
        }
        if !self.environment.is_online() {
            return;
        }
        if self.environment.is_hidden() {
            // Becoming visible reconnects immediately.
            tracing::debug!("reconnect deferred while hidden");
            return;
        }
        self.transition(ConnectionState::Reconnecting, None);
        self.begin_connecting();
    }

    fn handle_heartbeat_tick(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            self.heartbeat.stop();
            return;
        }
        match self.heartbeat.on_tick(now) {
            None => {}
            Some(HeartbeatAction::SendProbe) => {
                let sent = Message::heartbeat()
                    .to_wire()
                    .map_err(|err| err.to_string())
                    .and_then(|payload| self.transport.send(payload).map_err(|err| err.to_string()));
                match sent {
                    Ok(()) => tracing::trace!("heartbeat sent"),
                    Err(message) => {
                        tracing::warn!(error = %message, "heartbeat send failed");
                        self.abandon_transport("send failed");
                        self.connection_failed(DisconnectReason::TransportError { message });
                    }
                }
            }
            Some(HeartbeatAction::Expired { silent_for }) => {
                tracing::warn!(
                    silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX),
                    "no liveness signal, forcing reconnect"
                );
                self.transport.close(CLIENT_RESET_CLOSURE, "heartbeat timeout");
                self.connection_failed(DisconnectReason::HeartbeatTimeout);
            }
        }
    }

    fn handle_environment(&mut self, event: EnvironmentEvent) {
        match self.environment.apply(event) {
            EnvironmentReaction::None => {}
            EnvironmentReaction::ReconnectNow => {
                if self.session_active {
                    self.connect_now("visible");
                }
            }
            EnvironmentReaction::ResetAndReconnect => {
                self.reconnect_attempts = 0;
                self.gave_up = false;
                if self.session_active {
                    self.connect_now("online");
                }
            }
            EnvironmentReaction::ForceDisconnect => {
                tracing::info!("network offline, closing connection");
                self.close_session(DisconnectReason::NetworkOffline);
            }
        }
    }

    /// Closes whatever is open and cancels every timer without scheduling
    /// a reconnect.
    fn close_session(&mut self, reason: DisconnectReason) {
        self.reconnect_timer = None;
        self.connect_deadline = None;
        self.pending_credentials = None;
        self.heartbeat.stop();
        if self.events.is_some() {
            self.transport.close(NORMAL_CLOSURE, "client disconnect");
            self.events = None;
        }
        if self.state != ConnectionState::Disconnected {
            tracing::info!(?reason, "disconnected");
            self.transition(ConnectionState::Disconnected, Some(reason));
        }
    }

    fn teardown(&mut self) {
        self.session_active = false;
        self.close_session(DisconnectReason::Requested);
        self.publish_stats();
        tracing::debug!(queued = self.queue.len(), "controller stopped");
    }

    /// Drops the current transport after a local failure.
    fn abandon_transport(&mut self, reason: &str) {
        self.transport.close(CLIENT_RESET_CLOSURE, reason);
        self.events = None;
    }

    // ── State + status ──────────────────────────────────────────────────

    fn transition(&mut self, next: ConnectionState, reason: Option<DisconnectReason>) {
        let previous = self.state;
        self.state = next;
        if previous == ConnectionState::Connected && next != ConnectionState::Connected {
            tracing::info!(?reason, "left connected state");
        }
        self.emit_status(reason);
    }

    fn emit_status(&self, reason: Option<DisconnectReason>) {
        let status = ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            gave_up: self.gave_up && self.state == ConnectionState::Disconnected,
            reason,
        };
        self.publish_stats();
        self.router.dispatch(&status.to_message());
    }

    fn publish_stats(&self) {
        self.stats.state.store(self.state.as_u8(), Ordering::Release);
        self.stats
            .reconnect_attempts
            .store(self.reconnect_attempts, Ordering::Release);
        self.stats
            .queued_messages
            .store(self.queue.len(), Ordering::Release);
    }
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events.as_mut() {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn resolve_pending(
    credentials: &mut Option<CredentialFuture>,
) -> Result<Option<String>, AuthError> {
    match credentials.as_mut() {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::FutureExt;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::auth::{NoCredentials, StaticCredentials};
    use crate::client::{
        ClientStats, EnvironmentEvent, NetworkStatus, RealtimeClient, ReconnectPolicy, Visibility,
        spawn_environment_listener,
    };
    use crate::domain::EventFilter;
    use crate::error::RealtimeError;
    use crate::transport::mock::MockTransport;

    const HEARTBEAT: Duration = Duration::from_millis(1_000);

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn config(max_attempts: u32) -> ClientConfig {
        let Ok(config) = ClientConfig::new("ws://realtime.test/ws") else {
            panic!("valid test url");
        };
        config
            .with_reconnect(ReconnectPolicy {
                base_delay: Duration::from_millis(1_000),
                max_delay: Duration::from_millis(30_000),
                max_attempts,
            })
            .with_heartbeat_interval(HEARTBEAT)
    }

    fn start_with<C: CredentialProvider>(
        config: ClientConfig,
        credentials: C,
    ) -> (RealtimeClient, MockTransport) {
        let transport = MockTransport::default();
        let Ok(client) = RealtimeClient::init(config, transport.clone(), credentials) else {
            panic!("client should start");
        };
        (client, transport)
    }

    fn start(max_attempts: u32) -> (RealtimeClient, MockTransport) {
        start_with(config(max_attempts), NoCredentials)
    }

    async fn connect(client: &RealtimeClient, transport: &MockTransport) {
        assert_ok!(client.connect());
        settle().await;
        transport.emit(TransportEvent::Open);
        settle().await;
        assert!(client.is_connected());
    }

    fn record_statuses(client: &RealtimeClient) -> Arc<Mutex<Vec<ConnectionStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.on_status(move |status| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(status.clone());
            }
        });
        seen
    }

    fn statuses(seen: &Mutex<Vec<ConnectionStatus>>) -> Vec<ConnectionStatus> {
        seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn sent_messages(transport: &MockTransport) -> Vec<Message> {
        transport
            .sent()
            .iter()
            .filter_map(|payload| Message::from_wire(payload).ok())
            .collect()
    }

    fn sent_numbers(transport: &MockTransport) -> Vec<i64> {
        sent_messages(transport)
            .iter()
            .filter(|m| !m.is_heartbeat())
            .filter_map(|m| m.data().get("n").and_then(serde_json::Value::as_i64))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn queued_sends_flush_in_order_on_open() {
        let (client, transport) = start(5);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert_ok!(client.send("ping", json!({"n": 1})));
        assert_ok!(client.send("ping", json!({"n": 2})));
        settle().await;

        assert_eq!(transport.open_count(), 1, "send starts a connection");
        assert!(transport.sent().is_empty());
        assert_eq!(client.stats().queued_messages, 2);

        transport.emit(TransportEvent::Open);
        settle().await;
        assert_ok!(client.send("ping", json!({"n": 3})));
        settle().await;

        assert_eq!(sent_numbers(&transport), vec![1, 2, 3]);
        assert_eq!(client.stats().queued_messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_messages_reach_matching_subscribers() {
        let (client, transport) = start(5);
        let hits = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&hits);
        let b = Arc::clone(&hits);
        let first = client.subscribe("reservation_confirmed", move |_: &Message| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        client.subscribe("reservation_confirmed", move |_: &Message| {
            b.fetch_add(10, Ordering::SeqCst);
        });
        connect(&client, &transport).await;

        transport.receive(r#"{"type":"reservation_confirmed","data":{},"timestamp":"2024-01-01T00:00:00Z"}"#);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 11);

        assert!(client.unsubscribe(first));
        transport.receive(r#"{"type":"reservation_confirmed","data":{},"timestamp":"2024-01-01T00:00:00Z"}"#);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (client, transport) = start(3);
        let seen = record_statuses(&client);

        assert_ok!(client.connect());
        settle().await;
        assert_eq!(transport.open_count(), 1);

        for _ in 0..5 {
            transport.emit(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            });
            settle().await;
            tokio::time::advance(Duration::from_secs(60)).await;
            settle().await;
        }

        assert_eq!(transport.open_count(), 4, "initial attempt plus 3 retries");
        assert_eq!(client.state(), ConnectionState::Disconnected);
        let gave_up: Vec<_> = statuses(&seen).into_iter().filter(|s| s.gave_up).collect();
        assert_eq!(gave_up.len(), 1);
        assert_eq!(gave_up.first().map(|s| s.reconnect_attempts), Some(3));

        // Sends keep queuing after a give-up.
        assert_ok!(client.send("ping", json!({"n": 1})));
        settle().await;
        assert_eq!(transport.open_count(), 4);
        assert_eq!(client.stats().queued_messages, 1);

        // An explicit connect starts a fresh sequence.
        assert_ok!(client.connect());
        settle().await;
        assert_eq!(transport.open_count(), 5);
        assert_eq!(client.stats().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_delays_double() {
        let (client, transport) = start(5);
        assert_ok!(client.connect());
        settle().await;

        for (attempt, delay_ms) in [(1_u32, 1_000_u64), (2, 2_000), (3, 4_000)] {
            let before = transport.open_count();
            transport.emit(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
            });
            settle().await;
            assert_eq!(client.stats().reconnect_attempts, attempt);

            tokio::time::advance(Duration::from_millis(delay_ms - 1)).await;
            settle().await;
            assert_eq!(transport.open_count(), before, "too early for attempt {attempt}");

            tokio::time::advance(Duration::from_millis(1)).await;
            settle().await;
            assert_eq!(transport.open_count(), before + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_forced_to_reconnect() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        for _ in 0..21 {
            tokio::time::advance(Duration::from_millis(100)).await;
            settle().await;
        }

        let probes = sent_messages(&transport)
            .iter()
            .filter(|m| m.is_heartbeat())
            .count();
        assert_eq!(probes, 1);
        assert_eq!(transport.closed(), vec![CLIENT_RESET_CLOSURE]);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.stats().reconnect_attempts, 1);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_traffic_keeps_connection_alive() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(500)).await;
            transport.receive(r#"{"type":"heartbeat","data":null,"timestamp":"2024-01-01T00:00:00Z"}"#);
            settle().await;
        }

        assert!(client.is_connected());
        assert!(transport.closed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_is_terminal() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        assert_ok!(client.disconnect());
        settle().await;
        assert_eq!(transport.closed(), vec![NORMAL_CLOSURE]);

        tokio::time::advance(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // Queued, not reconnected.
        assert_ok!(client.send("ping", json!({"n": 1})));
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.stats().queued_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        transport.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
        settle().await;
        assert_eq!(client.stats().reconnect_attempts, 1);

        assert_ok!(client.disconnect());
        settle().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn server_normal_close_does_not_reconnect() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        transport.emit(TransportEvent::Close {
            code: NORMAL_CLOSURE,
            reason: "bye".to_string(),
        });
        settle().await;
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_triggers_reconnect() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        transport.emit(TransportEvent::Error("reset by peer".to_string()));
        settle().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closed(), vec![CLIENT_RESET_CLOSURE]);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_live_send_is_requeued() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        transport.fail_sends(true);
        assert_ok!(client.send("ping", json!({"n": 7})));
        settle().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.stats().queued_messages, 1);

        transport.fail_sends(false);
        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        transport.emit(TransportEvent::Open);
        settle().await;
        assert_eq!(sent_numbers(&transport), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_is_appended_to_target() {
        let (client, transport) = start_with(config(5), StaticCredentials::new("abc"));
        assert_ok!(client.connect());
        settle().await;

        let opened = transport.opened();
        let Some(target) = opened.first() else {
            panic!("expected an open");
        };
        assert_eq!(target.as_str(), "ws://realtime.test/ws?token=abc");
    }

    #[tokio::test(start_paused = true)]
    async fn credential_failure_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let provider = move || -> CredentialFuture {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AuthError::Unavailable("expired".to_string()))
                } else {
                    Ok(Some("fresh".to_string()))
                }
            }
            .boxed()
        };
        let (client, transport) = start_with(config(5), provider);

        assert_ok!(client.connect());
        settle().await;
        assert_eq!(transport.open_count(), 0);
        assert_eq!(client.stats().reconnect_attempts, 1);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_and_garbage_never_reach_subscribers() {
        let (client, transport) = start(5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.subscribe(EventFilter::All, move |m: &Message| {
            if let Ok(mut seen) = sink.lock() {
                seen.push(m.event_type().as_str().to_string());
            }
        });
        connect(&client, &transport).await;

        transport.receive(r#"{"type":"heartbeat","data":null,"timestamp":"2024-01-01T00:00:00Z"}"#);
        transport.receive("not json at all");
        transport.receive(r#"{"type":"waitlist_update","data":{"position":3},"timestamp":"2024-01-01T00:00:00Z"}"#);
        settle().await;

        let seen = seen.lock().map(|s| s.clone()).unwrap_or_default();
        assert!(!seen.iter().any(|t| t == "heartbeat"));
        assert!(seen.iter().any(|t| t == "waitlist_update"));
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn status_events_follow_transitions() {
        let (client, transport) = start(5);
        let seen = record_statuses(&client);
        connect(&client, &transport).await;
        assert_ok!(client.disconnect());
        settle().await;

        let states: Vec<_> = statuses(&seen).iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
        assert_eq!(
            statuses(&seen).last().and_then(|s| s.reason.clone()),
            Some(DisconnectReason::Requested)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let (client, transport) = start(5);
        assert_ok!(client.connect());
        assert_ok!(client.connect());
        settle().await;
        transport.emit(TransportEvent::Open);
        settle().await;
        assert_ok!(client.connect());
        settle().await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out_and_retries() {
        let (client, transport) = start_with(
            config(5).with_connect_timeout(Duration::from_secs(2)),
            NoCredentials,
        );
        let seen = record_statuses(&client);
        assert_ok!(client.send("ping", json!({"n": 1})));
        settle().await;
        assert_eq!(transport.open_count(), 1);

        tokio::time::advance(Duration::from_millis(1_999)).await;
        settle().await;
        assert_eq!(client.state(), ConnectionState::Connecting);

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.stats().reconnect_attempts, 1);
        assert_eq!(transport.closed(), vec![CLIENT_RESET_CLOSURE]);
        assert!(
            statuses(&seen)
                .iter()
                .any(|s| s.reason == Some(DisconnectReason::ConnectTimeout))
        );

        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(transport.open_count(), 2);
        transport.emit(TransportEvent::Open);
        settle().await;
        assert_eq!(sent_numbers(&transport), vec![1]);

        // The deadline is disarmed once connected.
        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(1_000)).await;
            transport.receive(r#"{"type":"heartbeat","data":null,"timestamp":"2024-01-01T00:00:00Z"}"#);
            settle().await;
        }
        assert!(client.is_connected());
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_status_frames_are_not_delivered() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;
        let seen = record_statuses(&client);

        transport.receive(
            r#"{"type":"connection_status","data":{"state":"disconnected","reconnectAttempts":5,"gaveUp":true},"timestamp":"2024-01-01T00:00:00Z"}"#,
        );
        settle().await;

        assert!(client.is_connected());
        assert!(statuses(&seen).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn coming_online_resets_backoff() {
        let (client, transport) = start(5);
        assert_ok!(client.connect());
        settle().await;

        transport.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
        settle().await;
        tokio::time::advance(Duration::from_millis(1_000)).await;
        settle().await;
        transport.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
        settle().await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(client.stats().reconnect_attempts, 2);

        assert_ok!(client.notify_environment(EnvironmentEvent::Network(NetworkStatus::Offline)));
        settle().await;
        assert_ok!(client.notify_environment(EnvironmentEvent::Network(NetworkStatus::Online)));
        settle().await;
        assert_eq!(transport.open_count(), 3, "online connects without waiting");
        assert_eq!(client.stats().reconnect_attempts, 0);

        // The next failure waits the base delay again.
        transport.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
        settle().await;
        assert_eq!(client.stats().reconnect_attempts, 1);
        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(transport.open_count(), 3);
        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(transport.open_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_disconnects_and_online_reconnects() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        assert_ok!(client.notify_environment(EnvironmentEvent::Network(NetworkStatus::Offline)));
        settle().await;
        assert_eq!(transport.closed(), vec![NORMAL_CLOSURE]);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);

        assert_ok!(client.notify_environment(EnvironmentEvent::Network(NetworkStatus::Online)));
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_defers_reconnect_until_visible() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        assert_ok!(client.notify_environment(EnvironmentEvent::Visibility(Visibility::Hidden)));
        settle().await;
        assert!(client.is_connected(), "hiding keeps the connection");

        transport.emit(TransportEvent::Close {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
        });
        settle().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(transport.open_count(), 1);

        assert_ok!(client.notify_environment(EnvironmentEvent::Visibility(Visibility::Visible)));
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn environment_stream_is_forwarded() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        let events = futures_util::stream::iter([EnvironmentEvent::Network(NetworkStatus::Offline)]);
        let listener = spawn_environment_listener(client.clone(), events);
        assert_ok!(listener.await);
        settle().await;

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(transport.closed(), vec![NORMAL_CLOSURE]);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_counts() {
        let (client, transport) = start(5);
        client.subscribe("notification", |_: &Message| {});
        assert_ok!(client.send("chat_message", json!({"text": "hi"})));
        settle().await;

        let stats = client.stats();
        assert_eq!(
            stats,
            ClientStats {
                is_connected: false,
                reconnect_attempts: 0,
                queued_messages: 1,
                subscription_count: 1,
            }
        );
        let value = assert_ok!(serde_json::to_value(stats));
        assert_eq!(value.get("queuedMessages"), Some(&json!(1)));

        transport.emit(TransportEvent::Open);
        settle().await;
        assert!(client.stats().is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_after_shutdown_fail() {
        let (client, transport) = start(5);
        connect(&client, &transport).await;

        client.shutdown().await;
        assert_eq!(transport.closed(), vec![NORMAL_CLOSURE]);
        assert!(matches!(client.connect(), Err(RealtimeError::ClientClosed)));
        assert_err!(client.send("ping", json!({})));
    }
}
