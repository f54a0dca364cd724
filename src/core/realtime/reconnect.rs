//! Single-flight reconnection bookkeeping.
//!
//! The supervisor only decides; the client runs the actual attempts. Counters
//! are reset on every successful `connected` transition.

use std::time::Duration;

use parking_lot::Mutex;

use super::base::ReconnectionConfig;

/// Snapshot of the supervisor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectCounters {
    /// Attempts made since the last successful connect
    pub attempts: u32,
    /// An attempt is waiting or negotiating
    pub in_flight: bool,
    /// Reconnection intent; false once the caller disconnects or attempts run out
    pub should_reconnect: bool,
}

/// Outcome of a scheduling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Nothing to do: no intent, an attempt is already running or nothing to replay
    Skip,
    /// The attempt cap was hit; intent is now latched off
    Exhausted,
    /// Run `attempt` after waiting `delay`
    Attempt { attempt: u32, delay: Duration },
}

pub struct ReconnectionSupervisor {
    config: ReconnectionConfig,
    counters: Mutex<ReconnectCounters>,
}

impl ReconnectionSupervisor {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            counters: Mutex::new(ReconnectCounters::default()),
        }
    }

    pub fn counters(&self) -> ReconnectCounters {
        *self.counters.lock()
    }

    pub fn should_reconnect(&self) -> bool {
        self.counters.lock().should_reconnect
    }

    /// A fresh `connect()`: enable reconnection and start counting from zero.
    pub fn arm(&self) {
        *self.counters.lock() = ReconnectCounters {
            should_reconnect: true,
            ..Default::default()
        };
    }

    /// Caller-initiated stop.
    pub fn disarm(&self) {
        *self.counters.lock() = ReconnectCounters::default();
    }

    /// The peer reached `connected`.
    pub fn on_connected(&self) {
        let mut counters = self.counters.lock();
        counters.attempts = 0;
        counters.in_flight = false;
    }

    /// Drop the in-flight mark of an attempt whose task already finished.
    pub fn release(&self) {
        self.counters.lock().in_flight = false;
    }

    /// Request a reconnect attempt.
    ///
    /// `can_replay` tells whether a previous stream and API key exist.
    pub fn schedule(&self, can_replay: bool) -> ReconnectDecision {
        let mut counters = self.counters.lock();
        if !counters.should_reconnect || counters.in_flight || !can_replay {
            return ReconnectDecision::Skip;
        }

        let attempt = counters.attempts + 1;
        if !self.config.allows_attempt(attempt) {
            counters.should_reconnect = false;
            return ReconnectDecision::Exhausted;
        }

        counters.attempts = attempt;
        counters.in_flight = true;
        ReconnectDecision::Attempt {
            attempt,
            delay: self.config.delay_for_attempt(attempt),
        }
    }

    /// The running attempt failed: clear the in-flight mark and decide on the
    /// next one immediately.
    pub fn attempt_failed(&self) -> ReconnectDecision {
        self.release();
        self.schedule(true)
    }
}
