// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Periodic housekeeping decisions: when to emit SYNCH, when a
//! retransmission timeout has elapsed, when to send a keepalive.
//!
//! [`crate::engine::Engine::housekeeping`] is the single entry point a
//! caller drives on a timer tick; this module holds the timers
//! themselves and the pure decisions, so the orchestration in
//! `engine.rs` stays a thin loop over peers and conduits.

use crate::config::{KEEPALIVE_INTERVAL_MS, SYNCH_INTERVAL_MS};
use crate::time::Millis;

/// Per-conduit housekeeping timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConduitTimers {
    last_synch_sent_ms: Millis,
}

impl ConduitTimers {
    /// `true` if a SYNCH should be (re-)emitted for a conduit whose
    /// transmit window has unacknowledged data, given the current
    /// time.
    pub fn synch_due(&self, now: Millis) -> bool {
        now.wrapping_sub(self.last_synch_sent_ms) >= SYNCH_INTERVAL_MS
    }

    /// Record that a SYNCH was just emitted.
    pub fn mark_synch_sent(&mut self, now: Millis) {
        self.last_synch_sent_ms = now;
    }
}

/// Per-peer keepalive timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepaliveTimer {
    last_activity_ms: Millis,
}

impl KeepaliveTimer {
    /// Record any outbound activity towards this peer, resetting the
    /// keepalive clock.
    pub fn mark_activity(&mut self, now: Millis) {
        self.last_activity_ms = now;
    }

    /// `true` if this otherwise-idle peer is due a keepalive beacon.
    pub fn keepalive_due(&self, now: Millis) -> bool {
        now.wrapping_sub(self.last_activity_ms) >= KEEPALIVE_INTERVAL_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synch_due_after_interval_elapses() {
        let mut t = ConduitTimers::default();
        assert!(!t.synch_due(SYNCH_INTERVAL_MS - 1));
        assert!(t.synch_due(SYNCH_INTERVAL_MS));
        t.mark_synch_sent(SYNCH_INTERVAL_MS);
        assert!(!t.synch_due(SYNCH_INTERVAL_MS + 1));
        assert!(t.synch_due(SYNCH_INTERVAL_MS * 2));
    }

    #[test]
    fn keepalive_due_after_interval_elapses() {
        let mut t = KeepaliveTimer::default();
        assert!(t.keepalive_due(KEEPALIVE_INTERVAL_MS));
        t.mark_activity(100);
        assert!(!t.keepalive_due(100 + KEEPALIVE_INTERVAL_MS - 1));
        assert!(t.keepalive_due(100 + KEEPALIVE_INTERVAL_MS));
    }
}
