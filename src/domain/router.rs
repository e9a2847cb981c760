//! Fan-out of inbound messages to application subscribers.
//!
//! [`SubscriptionRouter`] maps [`SubscriptionId`]s to a type filter, a
//! callback and an optional predicate. It is shared between the consumer
//! handle (subscribe / unsubscribe) and the controller task (dispatch).
//!
//! Dispatch never holds the lock while user code runs: matching entries are
//! snapshotted first, so a callback may subscribe or unsubscribe (itself or
//! others) without corrupting the iteration.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use super::SubscriptionId;
use super::message::{EventFilter, Message};

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Per-message filter evaluated after the type filter.
pub type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

struct Subscription {
    filter: EventFilter,
    callback: Callback,
    predicate: Option<Predicate>,
}

/// Registry of subscriptions keyed by id.
#[derive(Default)]
pub struct SubscriptionRouter {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
}

impl fmt::Debug for SubscriptionRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRouter")
            .field("subscriptions", &self.len())
            .finish()
    }
}

impl SubscriptionRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for messages passing `filter`.
    ///
    /// Pass `"all"` (or [`EventFilter::All`]) to receive every message.
    pub fn subscribe<F>(&self, filter: impl Into<EventFilter>, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.insert(filter.into(), Arc::new(callback), None)
    }

    /// Registers `callback` for messages passing both `filter` and
    /// `predicate`.
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
        self.insert(filter.into(), Arc::new(callback), Some(Arc::new(predicate)))
    }

    fn insert(
        &self,
        filter: EventFilter,
        callback: Callback,
        predicate: Option<Predicate>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut map = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        map.insert(
            id,
            Subscription {
                filter,
                callback,
                predicate,
            },
        );
        tracing::debug!(subscription_id = %id, total = map.len(), "subscription added");
        id
    }

    /// Removes exactly the registration `id`.
    ///
    /// Returns `false` if it was already gone; calling this repeatedly is a
    /// harmless no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            tracing::debug!(subscription_id = %id, "subscription removed");
        }
        removed
    }

    /// Returns `true` if `id` is still registered.
    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `message` to every matching subscriber.
    ///
    /// A subscriber matches when its filter accepts the message type and its
    /// predicate, if any, returns `true`. Panics raised by predicates or
    /// callbacks are caught and logged; the remaining subscribers still
    /// receive the message. Heartbeats are never delivered.
    ///
    /// Returns the number of callbacks that were invoked.
    pub fn dispatch(&self, message: &Message) -> usize {
        if message.is_heartbeat() {
            return 0;
        }

        let snapshot: Vec<(SubscriptionId, Callback, Option<Predicate>)> = {
            let map = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            map.iter()
                .filter(|(_, sub)| sub.filter.matches(message.event_type()))
                .map(|(id, sub)| {
                    (
                        *id,
                        Arc::clone(&sub.callback),
                        sub.predicate.as_ref().map(Arc::clone),
                    )
                })
                .collect()
        };

        let mut delivered = 0;
        for (id, callback, predicate) in snapshot {
            // An earlier callback in this round may have removed it.
            if !self.contains(id) {
                continue;
            }

            if let Some(predicate) = predicate {
                match catch_unwind(AssertUnwindSafe(|| predicate(message))) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(_) => {
                        tracing::error!(
                            subscription_id = %id,
                            event_type = %message.event_type(),
                            "subscriber predicate panicked"
                        );
                        continue;
                    }
                }
            }

            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                tracing::error!(
                    subscription_id = %id,
                    event_type = %message.event_type(),
                    "subscriber callback panicked"
                );
                continue;
            }
            delivered += 1;
        }
        delivered
    }
}
