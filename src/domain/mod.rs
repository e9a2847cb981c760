//! Domain layer: message model, connection state, subscriptions and the
//! outbound queue.
//!
//! Nothing in here performs I/O. The controller in [`crate::client`] drives
//! these types from transport events, timers and consumer calls.

pub mod connection_state;
pub mod message;
pub mod outbound_queue;
pub mod predicates;
pub mod router;
pub mod subscription_id;

pub use connection_state::{ConnectionState, ConnectionStatus, DisconnectReason};
pub use message::{CorrelationIds, EventFilter, EventType, Message};
pub use outbound_queue::OutboundQueue;
pub use router::{Callback, Predicate, SubscriptionRouter};
pub use subscription_id::SubscriptionId;
