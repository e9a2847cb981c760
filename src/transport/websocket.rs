//! [`Transport`] over `tokio-tungstenite`.
//!
//! Each open spawns one task that owns the socket: it forwards queued
//! outbound frames to the sink and inbound text frames to the event channel.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use url::Url;

use super::{ABNORMAL_CLOSURE, Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

/// Close code used when the peer sent a close frame without a code.
const NO_STATUS_RECEIVED: u16 = 1005;

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

/// WebSocket transport.
#[derive(Debug, Default)]
pub struct WebSocketTransport {
    outbound: Option<mpsc::UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Creates an idle transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Text({} bytes)", text.len()),
            Self::Close { code, .. } => write!(f, "Close({code})"),
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&mut self, target: &Url, events: TransportEvents) -> Result<(), TransportError> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        match target.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::Open(format!(
                    "unsupported scheme {other:?}"
                )));
            }
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        self.outbound = Some(outbound_tx);
        self.task = Some(tokio::spawn(run_socket(
            target.as_str().to_string(),
            outbound_rx,
            events,
        )));
        Ok(())
    }

    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        let Some(outbound) = self.outbound.as_ref() else {
            return Err(TransportError::NotOpen);
        };
        outbound
            .send(Outgoing::Text(payload))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.send(Outgoing::Close {
                code,
                reason: reason.to_string(),
            });
        }
        // The socket task finishes on its own after sending the close frame,
        // or right away if the handshake is still pending.
        self.task = None;
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    target: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Outgoing>,
    events: TransportEvents,
) {
    // A close requested mid-handshake abandons the attempt.
    let handshake = tokio::select! {
        result = connect_async(target.as_str()) => result,
        outgoing = outbound_rx.recv() => {
            tracing::debug!(?outgoing, "websocket handshake abandoned");
            return;
        }
    };
    let socket = match handshake {
        Ok((socket, _)) => socket,
        Err(err) => {
            tracing::debug!(error = %err, "websocket handshake failed");
            let _ = events.send(TransportEvent::Error(err.to_string()));
            let _ = events.send(TransportEvent::Close {
                code: ABNORMAL_CLOSURE,
                reason: "handshake failed".to_string(),
            });
            return;
        }
    };
    let _ = events.send(TransportEvent::Open);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Text(text)) => {
                        if let Err(err) = sink.send(WsMessage::text(text)).await {
                            let _ = events.send(TransportEvent::Error(err.to_string()));
                            let _ = events.send(TransportEvent::Close {
                                code: ABNORMAL_CLOSURE,
                                reason: "write failed".to_string(),
                            });
                            break;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: code.into(),
                            reason: reason.into(),
                        };
                        let _ = sink.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                    None => {
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text.as_str().to_string()));
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => tracing::warn!(len = bytes.len(), "dropping non-utf8 binary frame"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                            .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                        let _ = events.send(TransportEvent::Close { code, reason });
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        let _ = events.send(TransportEvent::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: "read failed".to_string(),
                        });
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Close {
                            code: ABNORMAL_CLOSURE,
                            reason: "stream ended".to_string(),
                        });
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("websocket task finished");
}
