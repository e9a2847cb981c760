//! Transport seam: any duplex message transport the controller can drive.
//!
//! The controller never touches sockets. It calls [`Transport::open`],
//! [`Transport::send`] and [`Transport::close`], and reacts to the
//! [`TransportEvent`]s the implementation reports on the channel it was
//! handed at open time. Each open gets a fresh channel, so events from a
//! previous connection can never leak into the next one.

#[cfg(test)]
pub(crate) mod mock;
pub mod websocket;

use tokio::sync::mpsc;
use url::Url;

use crate::error::TransportError;

pub use websocket::WebSocketTransport;

/// Close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a connection vanished without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code the client uses when it abandons a connection it considers
/// dead (missed heartbeats, failed writes).
pub const CLIENT_RESET_CLOSURE: u16 = 4000;

/// Lifecycle and data events emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed; sends are now accepted.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The connection closed.
    Close {
        /// Close code (`1000` = normal).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The transport failed. A `Close` may or may not follow.
    Error(String),
}

/// Sender half handed to [`Transport::open`].
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

/// Duplex message transport driven by the connection controller.
///
/// All methods are non-blocking: `open` starts the handshake and returns,
/// `send` hands the payload off, `close` requests closure. Outcomes are
/// reported asynchronously through [`TransportEvents`].
pub trait Transport: Send + 'static {
    /// Begins connecting to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Open`] if the attempt could not even be
    /// started. Handshake failures are reported as events instead.
    fn open(&mut self, target: &Url, events: TransportEvents) -> Result<(), TransportError>;

    /// Hands a serialized payload to the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotOpen`] or [`TransportError::Send`] if
    /// the payload was not accepted.
    fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Closes the current connection, if any, with `code` and `reason`.
    fn close(&mut self, code: u16, reason: &str);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self, target: &Url, events: TransportEvents) -> Result<(), TransportError> {
        (**self).open(target, events)
    }

    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        (**self).send(payload)
    }

    fn close(&mut self, code: u16, reason: &str) {
        (**self).close(code, reason);
    }
}
