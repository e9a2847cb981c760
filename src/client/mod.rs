//! Consumer-facing client handle.
//!
//! [`RealtimeClient`] is a cheap, cloneable handle to one controller task.
//! Create it once at startup with [`RealtimeClient::init`] and hand clones
//! to every feature that needs to send or subscribe.
//!
//! Calls never block on the network. `connect`, `disconnect`, `send` and
//! `notify_environment` enqueue a command for the controller task and
//! return; their effects show up later as transport traffic and
//! `connection_status` events.

pub mod backoff;
pub(crate) mod controller;
pub mod environment;
pub mod heartbeat;

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::CredentialProvider;
use crate::config::ClientConfig;
use crate::domain::{
    ConnectionState, ConnectionStatus, EventFilter, EventType, Message, SubscriptionId,
    SubscriptionRouter,
};
use crate::error::RealtimeError;
use crate::transport::{Transport, WebSocketTransport};
use controller::{Command, Controller, SharedStats};

pub use backoff::ReconnectPolicy;
pub use environment::{
    EnvironmentEvent, NetworkStatus, Visibility, spawn_environment_listener,
};
pub use heartbeat::LivenessPolicy;

/// Point-in-time view of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// `true` while the transport is open.
    pub is_connected: bool,
    /// Consecutive failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Messages waiting for the next open.
    pub queued_messages: usize,
    /// Live subscriptions, including status listeners.
    pub subscription_count: usize,
}

#[derive(Debug)]
struct ClientInner {
    commands: mpsc::UnboundedSender<Command>,
    router: Arc<SubscriptionRouter>,
    stats: Arc<SharedStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the real-time connection.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    inner: Arc<ClientInner>,
}

impl RealtimeClient {
    /// Validates `config` and spawns the controller task on the current
    /// tokio runtime. The client starts `Disconnected`; call
    /// [`Self::connect`] or just [`Self::send`].
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidConfig`] if `config` fails
    /// [`ClientConfig::validate`].
    pub fn init<T, C>(config: ClientConfig, transport: T, credentials: C) -> Result<Self, RealtimeError>
    where
        T: Transport,
        C: CredentialProvider,
    {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let router = Arc::new(SubscriptionRouter::new());
        let stats = Arc::new(SharedStats::default());

        let controller = Controller::new(
            config,
            transport,
            Arc::new(credentials),
            Arc::clone(&router),
            Arc::clone(&stats),
            commands_rx,
        );
        let task = tokio::spawn(controller.run());

        Ok(Self {
            inner: Arc::new(ClientInner {
                commands: commands_tx,
                router,
                stats,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// [`Self::init`] with a [`WebSocketTransport`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::init`].
    pub fn websocket<C: CredentialProvider>(
        config: ClientConfig,
        credentials: C,
    ) -> Result<Self, RealtimeError> {
        Self::init(config, WebSocketTransport::new(), credentials)
    }

    fn command(&self, command: Command) -> Result<(), RealtimeError> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| RealtimeError::ClientClosed)
    }

    /// Starts connecting. A no-op while already connecting or connected.
    /// Clears an earlier [`Self::disconnect`] and a give-up.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ClientClosed`] after [`Self::shutdown`].
    pub fn connect(&self) -> Result<(), RealtimeError> {
        self.command(Command::Connect)
    }

    /// Closes the connection and stops all automatic reconnection until
    /// the next [`Self::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ClientClosed`] after [`Self::shutdown`].
    pub fn disconnect(&self) -> Result<(), RealtimeError> {
        self.command(Command::Disconnect)
    }

    /// Sends `{type, data}` now if connected, otherwise queues it for the
    /// next open.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ClientClosed`] after [`Self::shutdown`].
    pub fn send(
        &self,
        event_type: impl Into<EventType>,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        self.send_message(Message::new(event_type, data))
    }

    /// Sends a fully built [`Message`], e.g. one carrying correlation ids.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ClientClosed`] after [`Self::shutdown`].
    pub fn send_message(&self, message: Message) -> Result<(), RealtimeError> {
        self.command(Command::Send(message))
    }

    /// Registers `callback` for inbound messages passing `filter`.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.inner.router.subscribe(filter, callback)
    }

    /// Like [`Self::subscribe`], with an extra per-message predicate.
    pub fn subscribe_where<F, P>(
        &self,
        filter: impl Into<EventFilter>,
        callback: F,
        predicate: P,
    ) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
        P: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.inner.router.subscribe_where(filter, callback, predicate)
    }

    /// Typed listener for the `connection_status` channel.
    pub fn on_status<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.subscribe(EventType::ConnectionStatus, move |message: &Message| {
            if let Some(status) = ConnectionStatus::from_message(message) {
                callback(&status);
            }
        })
    }

    /// Removes a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.router.unsubscribe(id)
    }

    /// Reports a visibility or network change.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ClientClosed`] after [`Self::shutdown`].
    pub fn notify_environment(&self, event: EnvironmentEvent) -> Result<(), RealtimeError> {
        self.command(Command::Environment(event))
    }

    /// Current controller state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.stats.state()
    }

    /// `true` while the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Snapshot of connection counters. Reflects every command the
    /// controller has processed so far.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            is_connected: self.is_connected(),
            reconnect_attempts: self.inner.stats.reconnect_attempts(),
            queued_messages: self.inner.stats.queued_messages(),
            subscription_count: self.inner.router.len(),
        }
    }

    /// Closes the connection, stops the controller task and waits for it.
    /// Every later call on any clone returns [`RealtimeError::ClientClosed`].
    pub async fn shutdown(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.command(Command::Shutdown(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "controller task failed");
            }
        }
    }
}
