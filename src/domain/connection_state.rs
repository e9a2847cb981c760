//! Connection lifecycle state and the status payload published on the
//! reserved `connection_status` channel.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::{EventType, Message};

/// State of the connection controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport, no pending attempt in flight.
    Disconnected,
    /// Credentials are being resolved or the transport is handshaking.
    Connecting,
    /// The transport reported `open`.
    Connected,
    /// A scheduled reconnect fired; the next step is `Connecting`.
    Reconnecting,
}

impl ConnectionState {
    /// Compact encoding used by the shared stats cell.
    #[must_use]
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
        }
    }

    /// Inverse of [`Self::as_u8`]; unknown values decode as `Disconnected`.
    #[must_use]
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Why the connection left (or failed to reach) `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The application called `disconnect()`.
    Requested,
    /// The server closed the connection with a normal-closure code.
    ClosedNormally,
    /// The transport closed with an abnormal code.
    ClosedAbnormally {
        /// Close code reported by the transport.
        code: u16,
    },
    /// The transport reported an error.
    TransportError {
        /// Transport error description.
        message: String,
    },
    /// No liveness signal within the heartbeat timeout.
    HeartbeatTimeout,
    /// The connection did not open within the connect timeout.
    ConnectTimeout,
    /// The credential collaborator failed.
    CredentialsUnavailable,
    /// The environment reported the network as offline.
    NetworkOffline,
}

/// Payload of every `connection_status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// State after the transition.
    pub state: ConnectionState,
    /// Reconnection counter after the transition.
    pub reconnect_attempts: u32,
    /// `true` exactly once per exhausted reconnect sequence.
    pub gave_up: bool,
    /// Cause, when leaving `Connected` or failing to reach it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

impl ConnectionStatus {
    /// Wraps the status in a `connection_status` message.
    #[must_use]
    pub fn to_message(&self) -> Message {
        let data = serde_json::to_value(self).unwrap_or_default();
        Message::new(EventType::ConnectionStatus, data)
    }

    /// Extracts a status from a `connection_status` message.
    ///
    /// Returns `None` for any other message type or a malformed payload.
    #[must_use]
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.event_type() != &EventType::ConnectionStatus {
            return None;
        }
        serde_json::from_value(message.data().clone()).ok()
    }
}
