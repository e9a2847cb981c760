//! Page visibility and network reachability signals.
//!
//! The host application (a desktop shell, a mobile wrapper, a test) owns
//! the actual OS hooks. It turns them into [`EnvironmentEvent`]s and hands
//! them to [`super::RealtimeClient::notify_environment`], or pipes a whole
//! stream through [`spawn_environment_listener`].

use futures_util::{Stream, StreamExt};
use tokio::task::JoinHandle;

use super::RealtimeClient;

/// Whether the UI is currently on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Foreground.
    #[default]
    Visible,
    /// Background / minimized.
    Hidden,
}

/// Whether the host believes the network is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    /// Reachable.
    #[default]
    Online,
    /// Unreachable.
    Offline,
}

/// A single environment transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    /// Visibility changed.
    Visibility(Visibility),
    /// Network reachability changed.
    Network(NetworkStatus),
}

/// What the controller should do in response to an environment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentReaction {
    /// Nothing.
    None,
    /// Connect now if not connected, skipping the backoff wait.
    ReconnectNow,
    /// Reset the backoff counter, then connect now if not connected.
    ResetAndReconnect,
    /// Close the connection without entering the reconnect loop.
    ForceDisconnect,
}

/// Last known environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvironmentState {
    /// Last reported visibility.
    pub visibility: Visibility,
    /// Last reported network status.
    pub network: NetworkStatus,
}

impl EnvironmentState {
    /// Records `event` and returns the reaction it calls for.
    ///
    /// Going hidden never disconnects. Repeated offline reports only force
    /// a disconnect once.
    pub fn apply(&mut self, event: EnvironmentEvent) -> EnvironmentReaction {
        match event {
            EnvironmentEvent::Visibility(Visibility::Hidden) => {
                self.visibility = Visibility::Hidden;
                EnvironmentReaction::None
            }
            EnvironmentEvent::Visibility(Visibility::Visible) => {
                self.visibility = Visibility::Visible;
                if self.is_online() {
                    EnvironmentReaction::ReconnectNow
                } else {
                    EnvironmentReaction::None
                }
            }
            EnvironmentEvent::Network(NetworkStatus::Offline) => {
                let was_online = self.is_online();
                self.network = NetworkStatus::Offline;
                if was_online {
                    EnvironmentReaction::ForceDisconnect
                } else {
                    EnvironmentReaction::None
                }
            }
            EnvironmentEvent::Network(NetworkStatus::Online) => {
                self.network = NetworkStatus::Online;
                EnvironmentReaction::ResetAndReconnect
            }
        }
    }

    /// Returns `true` unless the network was reported offline.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.network == NetworkStatus::Online
    }

    /// Returns `true` while the UI is hidden.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.visibility == Visibility::Hidden
    }
}

/// Forwards every event from `events` to `client` until the stream ends or
/// the client shuts down.
pub fn spawn_environment_listener<S>(client: RealtimeClient, events: S) -> JoinHandle<()>
where
    S: Stream<Item = EnvironmentEvent> + Send + 'static,
{
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            tracing::debug!(?event, "environment changed");
            if client.notify_environment(event).is_err() {
                break;
            }
        }
    })
}
