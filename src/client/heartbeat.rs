//! Heartbeat liveness monitoring.
//!
//! While connected the monitor ticks every `interval`. Each tick either asks
//! the controller to send a probe or, if nothing proving liveness arrived
//! within `2 * interval`, reports the connection as silently dead. A stale
//! socket held open by a proxy never produces a transport close, so the
//! controller must act on [`HeartbeatAction::Expired`] itself.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Which inbound traffic counts as a liveness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessPolicy {
    /// Any inbound frame refreshes liveness.
    #[default]
    AnyTraffic,
    /// Only `heartbeat` frames refresh liveness.
    HeartbeatOnly,
}

/// What the controller should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a heartbeat probe.
    SendProbe,
    /// No liveness signal within the timeout; force a reconnect.
    Expired {
        /// Time since the last liveness signal.
        silent_for: Duration,
    },
}

/// Liveness bookkeeping plus the tick timer.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    policy: LivenessPolicy,
    ticker: Option<Interval>,
    last_seen: Option<Instant>,
    last_sent: Option<Instant>,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub const fn new(interval: Duration, policy: LivenessPolicy) -> Self {
        Self {
            interval,
            policy,
            ticker: None,
            last_seen: None,
            last_sent: None,
        }
    }

    /// Silence threshold after which the connection is declared dead.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.interval.saturating_mul(2)
    }

    /// Starts ticking. The open itself counts as a liveness signal.
    pub fn start(&mut self, now: Instant) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(now + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.last_seen = Some(now);
        self.last_sent = None;
    }

    /// Stops ticking immediately; pending ticks are discarded.
    pub fn stop(&mut self) {
        self.ticker = None;
        self.last_seen = None;
        self.last_sent = None;
    }

    /// Returns `true` between [`Self::start`] and [`Self::stop`].
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Records inbound traffic. Ignored while stopped.
    pub fn observe(&mut self, now: Instant, is_heartbeat: bool) {
        if !self.is_running() {
            return;
        }
        if is_heartbeat || self.policy == LivenessPolicy::AnyTraffic {
            self.last_seen = Some(now);
        }
    }

    /// Waits for the next tick. Never resolves while stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.ticker.as_mut() {
            Some(ticker) => ticker.tick().await,
            None => std::future::pending().await,
        }
    }

    /// Decides what a tick at `now` means.
    ///
    /// Returns `None` when stopped, which makes a late tick a no-op.
    pub fn on_tick(&mut self, now: Instant) -> Option<HeartbeatAction> {
        if !self.is_running() {
            return None;
        }
        let last_seen = self.last_seen.unwrap_or(now);
        let silent_for = now.saturating_duration_since(last_seen);
        if silent_for >= self.timeout() {
            return Some(HeartbeatAction::Expired { silent_for });
        }
        self.last_sent = Some(now);
        Some(HeartbeatAction::SendProbe)
    }

    /// Time the most recent probe was requested.
    #[must_use]
    pub const fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }
}
