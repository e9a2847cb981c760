//! Scriptable in-memory transport for controller tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use url::Url;

use super::{Transport, TransportEvent, TransportEvents};
use crate::error::TransportError;

#[derive(Debug, Default)]
struct Recorded {
    opened: Vec<Url>,
    sent: Vec<String>,
    closed: Vec<u16>,
    events: Option<TransportEvents>,
    fail_sends: bool,
}

/// Records every call and lets the test play the server side.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl MockTransport {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` on the channel of the most recent open.
    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.lock().events.as_ref() {
            let _ = events.send(event);
        }
    }

    /// Delivers an inbound text frame.
    pub(crate) fn receive(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    pub(crate) fn opened(&self) -> Vec<Url> {
        self.lock().opened.clone()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub(crate) fn closed(&self) -> Vec<u16> {
        self.lock().closed.clone()
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }
}

impl Transport for MockTransport {
    fn open(&mut self, target: &Url, events: TransportEvents) -> Result<(), TransportError> {
        let mut recorded = self.lock();
        recorded.opened.push(target.clone());
        recorded.events = Some(events);
        Ok(())
    }

    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        let mut recorded = self.lock();
        if recorded.fail_sends {
            return Err(TransportError::Send("scripted failure".to_string()));
        }
        recorded.sent.push(payload);
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        let mut recorded = self.lock();
        recorded.closed.push(code);
        recorded.events = None;
    }
}
