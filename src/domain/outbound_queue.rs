//! Buffer for messages produced while the connection is down.
//!
//! Entries leave the queue only after the transport accepted them, in
//! exactly the order they were enqueued.

use std::collections::VecDeque;

use super::Message;

/// FIFO of outbound messages awaiting a connection.
///
/// Unbounded by default. With a capacity set, enqueueing into a full queue
/// drops the oldest entry.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<Message>,
    capacity: Option<usize>,
}

impl OutboundQueue {
    /// Creates an unbounded queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue holding at most `capacity` entries (`0` = unbounded).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    /// Appends `message` to the tail.
    ///
    /// Returns the evicted head when the queue was full.
    pub fn enqueue(&mut self, message: Message) -> Option<Message> {
        let evicted = match self.capacity {
            Some(cap) if self.entries.len() >= cap => self.entries.pop_front(),
            _ => None,
        };
        if let Some(dropped) = &evicted {
            tracing::warn!(
                event_type = %dropped.event_type(),
                capacity = self.capacity.unwrap_or_default(),
                "outbound queue full, dropping oldest message"
            );
        }
        self.entries.push_back(message);
        evicted
    }

    /// Drains head-to-tail through `send`.
    ///
    /// Each entry is removed only after `send` returned `Ok`. The first
    /// error stops the drain and leaves that entry and everything behind it
    /// queued, in order.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `send`.
    pub fn flush<E>(&mut self, mut send: impl FnMut(&Message) -> Result<(), E>) -> Result<usize, E> {
        let mut sent = 0;
        while let Some(head) = self.entries.front() {
            send(head)?;
            self.entries.pop_front();
            sent += 1;
        }
        Ok(sent)
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured bound, if any.
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
