// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Read-only telemetry snapshot.
//!
//! A small set of counters the engine maintains internally and exposes
//! through [`crate::engine::Engine::telemetry`], scaled down from the
//! grounding repo's `MetricsSnapshot`/admin-API pattern to what a
//! single-peer embedded engine can usefully report.

/// Point-in-time counters describing engine activity since `init`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    /// Samples delivered to a local subscription handler.
    pub delivered: u64,
    /// Samples discarded: no matching subscriber, a duplicate or
    /// out-of-order arrival on a reliable conduit held back rather than
    /// delivered, or dropped due to resource exhaustion.
    pub discarded: u64,
    /// SYNCH messages sent.
    pub synch_sent: u64,
    /// Out-of-order or duplicate samples observed on a reliable
    /// conduit.
    pub oooc: u64,
    /// ACKNACK messages sent.
    pub acknack_sent: u64,
}

impl Telemetry {
    pub(crate) fn record_delivered(&mut self) {
        self.delivered += 1;
    }

    pub(crate) fn record_discarded(&mut self) {
        self.discarded += 1;
    }

    pub(crate) fn record_synch_sent(&mut self) {
        self.synch_sent += 1;
    }

    pub(crate) fn record_oooc(&mut self) {
        self.oooc += 1;
    }

    pub(crate) fn record_acknack_sent(&mut self) {
        self.acknack_sent += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let mut t = Telemetry::default();
        assert_eq!(t.delivered, 0);
        t.record_delivered();
        t.record_delivered();
        t.record_discarded();
        assert_eq!(t.delivered, 2);
        assert_eq!(t.discarded, 1);
    }
}
