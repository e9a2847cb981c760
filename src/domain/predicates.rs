//! Ready-made subscription predicates over [`super::CorrelationIds`].
//!
//! ```
//! use tablewire::domain::{predicates, EventType, SubscriptionRouter};
//!
//! let router = SubscriptionRouter::new();
//! router.subscribe_where(
//!     EventType::ReservationUpdated,
//!     |m| println!("my reservation changed: {}", m.data()),
//!     predicates::for_reservation("res-42"),
//! );
//! ```

use super::Message;

/// Matches messages whose `reservationId` equals `id`.
pub fn for_reservation(id: impl Into<String>) -> impl Fn(&Message) -> bool + Send + Sync + 'static {
    let id = id.into();
    move |m: &Message| m.correlation().reservation_id.as_deref() == Some(id.as_str())
}

/// Matches messages whose `restaurantId` equals `id`.
pub fn for_restaurant(id: impl Into<String>) -> impl Fn(&Message) -> bool + Send + Sync + 'static {
    let id = id.into();
    move |m: &Message| m.correlation().restaurant_id.as_deref() == Some(id.as_str())
}

/// Matches messages whose `userId` equals `id`.
pub fn for_user(id: impl Into<String>) -> impl Fn(&Message) -> bool + Send + Sync + 'static {
    let id = id.into();
    move |m: &Message| m.correlation().user_id.as_deref() == Some(id.as_str())
}

/// Matches messages whose `orderId` equals `id`.
pub fn for_order(id: impl Into<String>) -> impl Fn(&Message) -> bool + Send + Sync + 'static {
    let id = id.into();
    move |m: &Message| m.correlation().order_id.as_deref() == Some(id.as_str())
}
