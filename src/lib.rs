//! # tablewire
//!
//! Real-time update client for the reservation marketplace.
//!
//! Keeps one persistent duplex connection to the realtime endpoint, survives
//! network instability, and fans inbound events (reservation status,
//! waitlist position, chat, notifications, live availability) out to any
//! number of independent subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Application features
//!     │  subscribe / send / connect / disconnect
//!     ├── RealtimeClient (client/)
//!     │
//!     ├── Controller task (client/controller)
//!     │     ├── HeartbeatMonitor, ReconnectPolicy
//!     │     ├── OutboundQueue (domain/)
//!     │     └── SubscriptionRouter (domain/)
//!     │
//!     ├── CredentialProvider (auth)
//!     └── Transport (transport/) ── WebSocket
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use tablewire::{ClientConfig, RealtimeClient, StaticCredentials};
//!
//! # async fn demo() -> Result<(), tablewire::RealtimeError> {
//! let config = ClientConfig::new("wss://api.example.com/ws")?;
//! let client = RealtimeClient::websocket(config, StaticCredentials::new("token"))?;
//!
//! client.subscribe("reservation_confirmed", |message: &tablewire::Message| {
//!     println!("confirmed: {}", message.data());
//! });
//! client.on_status(|status| println!("connection is {}", status.state));
//!
//! client.connect()?;
//! client.send("chat_message", json!({"text": "running 5 minutes late"}))?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod transport;

pub use auth::{CredentialProvider, NoCredentials, StaticCredentials};
pub use client::{ClientStats, RealtimeClient};
pub use config::ClientConfig;
pub use domain::{
    ConnectionState, ConnectionStatus, EventFilter, EventType, Message, SubscriptionId,
};
pub use error::RealtimeError;
