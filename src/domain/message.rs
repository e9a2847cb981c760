//! Wire message envelope and the event type catalogue.
//!
//! Every frame exchanged with the server is a JSON object of the shape
//! `{ "type", "data", "timestamp", "userId"?, "restaurantId"?,
//! "reservationId"?, "orderId"? }`. The `type` field is the only dispatch
//! key; unknown types survive as [`EventType::Other`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for real-time events.
///
/// Serialized as its snake_case wire string. Strings that do not name a
/// known event are preserved verbatim in [`EventType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A reservation request was accepted by the restaurant.
    ReservationConfirmed,
    /// Reservation details (time, party size, table) changed.
    ReservationUpdated,
    /// A reservation was cancelled by either side.
    ReservationCancelled,
    /// The caller's position on a waitlist moved.
    WaitlistUpdate,
    /// Live availability changed for a restaurant.
    TableAvailable,
    /// Delivery / takeout order status changed.
    OrderStatus,
    /// Chat between diner and restaurant.
    ChatMessage,
    /// Generic user notification.
    Notification,
    /// Reserved channel carrying [`super::ConnectionStatus`] updates.
    ConnectionStatus,
    /// Reserved liveness probe; never delivered to subscribers.
    Heartbeat,
    /// Any type this client does not know about.
    Other(String),
}

impl EventType {
    /// Returns the wire representation of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ReservationConfirmed => "reservation_confirmed",
            Self::ReservationUpdated => "reservation_updated",
            Self::ReservationCancelled => "reservation_cancelled",
            Self::WaitlistUpdate => "waitlist_update",
            Self::TableAvailable => "table_available",
            Self::OrderStatus => "order_status",
            Self::ChatMessage => "chat_message",
            Self::Notification => "notification",
            Self::ConnectionStatus => "connection_status",
            Self::Heartbeat => "heartbeat",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "reservation_confirmed" => Self::ReservationConfirmed,
            "reservation_updated" => Self::ReservationUpdated,
            "reservation_cancelled" => Self::ReservationCancelled,
            "waitlist_update" => Self::WaitlistUpdate,
            "table_available" => Self::TableAvailable,
            "order_status" => Self::OrderStatus,
            "chat_message" => Self::ChatMessage,
            "notification" => Self::Notification,
            "connection_status" => Self::ConnectionStatus,
            "heartbeat" => Self::Heartbeat,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match Self::from(s.as_str()) {
            Self::Other(_) => Self::Other(s),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which event types a subscription is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every inbound message regardless of type (`"all"`).
    All,
    /// Only messages of exactly this type.
    Only(EventType),
}

impl EventFilter {
    /// Returns `true` if a message of `event_type` passes this filter.
    #[must_use]
    pub fn matches(&self, event_type: &EventType) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == event_type,
        }
    }
}

impl From<EventType> for EventFilter {
    fn from(event_type: EventType) -> Self {
        Self::Only(event_type)
    }
}

impl From<&str> for EventFilter {
    fn from(s: &str) -> Self {
        if s == "all" {
            Self::All
        } else {
            Self::Only(EventType::from(s))
        }
    }
}

/// Optional domain identifiers attached to a message at the top level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationIds {
    /// Diner the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Restaurant the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant_id: Option<String>,
    /// Reservation the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    /// Order the event concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Immutable real-time message.
///
/// Constructed by [`Message::new`] for outbound traffic or decoded by
/// [`Message::from_wire`] for inbound traffic. Subscribers only ever see
/// shared references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    correlation: CorrelationIds,
}

impl Message {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<EventType>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
            correlation: CorrelationIds::default(),
        }
    }

    /// Creates the reserved liveness probe.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(EventType::Heartbeat, serde_json::json!({}))
    }

    /// Returns a copy carrying the given correlation identifiers.
    #[must_use]
    pub fn with_correlation(mut self, correlation: CorrelationIds) -> Self {
        self.correlation = correlation;
        self
    }

    /// Message type (the dispatch key).
    #[must_use]
    pub const fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Variant-specific payload.
    #[must_use]
    pub const fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Creation time as reported by the producer.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Correlation identifiers, all optional.
    #[must_use]
    pub const fn correlation(&self) -> &CorrelationIds {
        &self.correlation
    }

    /// Returns `true` for the reserved liveness probe type.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.event_type == EventType::Heartbeat
    }

    /// Encodes the message as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if `data` cannot be serialized.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a JSON text frame.
    ///
    /// A missing `timestamp` is replaced by the receive time and a missing
    /// `data` by `null`.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if the frame is not a JSON object with
    /// a string `type` field.
    pub fn from_wire(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
