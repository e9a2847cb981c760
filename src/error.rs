//! Client error types.
//!
//! [`RealtimeError`] is the central error type for the crate. Connectivity
//! problems are deliberately absent from the public surface: they are
//! recovered by the reconnection policy and reported as
//! [`crate::domain::ConnectionStatus`] events instead.

/// Failures raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport could not start opening a connection.
    #[error("transport open failed: {0}")]
    Open(String),

    /// The payload could not be handed to the transport.
    #[error("transport send failed: {0}")]
    Send(String),

    /// The transport is not open.
    #[error("transport is not open")]
    NotOpen,
}

/// Failures raised by a [`crate::auth::CredentialProvider`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The credential source is temporarily unavailable (e.g. a session
    /// refresh is in flight).
    #[error("credentials unavailable: {0}")]
    Unavailable(String),

    /// The credential source rejected the request.
    #[error("credential resolution failed: {0}")]
    Failed(String),
}

/// Crate-level error enum.
///
/// # Error Categories
///
/// | Variant         | Raised by                         |
/// |-----------------|-----------------------------------|
/// | `InvalidConfig` | [`crate::config::ClientConfig`]   |
/// | `InvalidUrl`    | configuration / connection target |
/// | `Json`          | message encoding                  |
/// | `Transport`     | transport collaborator            |
/// | `Auth`          | credential collaborator           |
/// | `ClientClosed`  | any call after `shutdown()`       |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The connection target is not a valid URL.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport collaborator failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Credential collaborator failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The client has been shut down and no longer accepts calls.
    #[error("realtime client is shut down")]
    ClientClosed,
}

impl RealtimeError {
    /// Returns `true` when the error is recovered by reconnecting rather
    /// than by changing the calling code.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Auth(_))
    }
}
