// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration - compile-time limits and runtime parameters.
//!
//! Mirrors the two-level split used throughout the grounding codebase: a
//! set of `pub const` compile-time limits that size every statically
//! allocated table in the engine, plus a small runtime [`Config`] value
//! built once at [`crate::engine::Engine::init`].
//!
//! **Never hardcode these elsewhere.** Every array in `peer`, `heap`,
//! `window`, `pubsub` and `declare` is sized from one of the constants
//! below. The runtime counterpart ([`crate::engine::Config`]) lives
//! next to [`crate::engine::Engine`] since it is only ever constructed
//! alongside one.

/// Maximum number of peers tracked simultaneously (sizes the peer arena
/// and the min-sequence heap).
pub const MAX_PEERS: usize = 8;

/// Number of outgoing reliable unicast conduits.
pub const N_OUT_CONDUITS: usize = 1;

/// Number of outgoing reliable multi-destination conduits (`mconduit`s).
pub const N_OUT_MCONDUITS: usize = 1;

/// Maximum number of destination peers tracked per `mconduit`.
pub const MAX_MCONDUIT_DESTS: usize = MAX_PEERS;

/// Maximum number of multicast groups a [`crate::engine::Config`] may ask
/// [`crate::engine::Engine::init`] to join. Independent of
/// [`N_OUT_MCONDUITS`] (see the specification's Open Questions): group
/// membership is a transport-level concern, `N_OUT_MCONDUITS` sizes the
/// engine's own per-mconduit destination-set tables.
pub const MAX_MULTICAST_GROUPS: usize = 4;

/// Number of per-peer receive-side sequence trackers kept for reliable
/// conduits, sized to whichever of [`N_OUT_CONDUITS`]/[`N_OUT_MCONDUITS`]
/// is larger since an inbound conduit ID is looked up the same way
/// regardless of whether this instance addresses it as unicast or
/// multi-destination on the send side.
pub const RX_CONDUIT_SLOTS: usize = if N_OUT_CONDUITS > N_OUT_MCONDUITS {
    N_OUT_CONDUITS
} else {
    N_OUT_MCONDUITS
};

/// Maximum resource ID value the wire codec will encode/decode.
///
/// Determines `RID_WIRE_WIDTH` below (1-9 bytes, 7 bits per byte).
pub const ZHE_MAX_RID: u64 = 0x3_FFFF_FFFF; // 34 bits -> 5-byte varint ceiling

/// Maximum URI length for URI-named resources. Zero disables URI
/// resources entirely (plain numeric RIDs only).
pub const ZHE_MAX_URISPACE: usize = 64;

/// Transport MTU; sizes every per-conduit output buffer.
pub const TRANSPORT_MTU: usize = 1024;

/// Lease duration in milliseconds: a peer not heard from within this
/// window is expired.
pub const LEASE_DURATION_MS: u32 = 10_000;

/// Interval in milliseconds between SYNCH emissions on a reliable
/// conduit with unacknowledged tail data.
pub const SYNCH_INTERVAL_MS: u32 = 1_000;

/// Width, in bits, of the modular sequence-number space. 32 gives the
/// widest window before wraparound; embedded deployments tight on RAM
/// can shrink this (e.g. 14) to exercise wraparound sooner, since
/// [`crate::seq`]'s comparisons are derived from this constant rather
/// than hardcoded to `u32`'s full range.
pub const SEQNUM_WIDTH: u32 = 32;

/// Maximum number of local publications.
pub const MAX_PUBS: usize = 8;

/// Maximum number of local subscriptions.
pub const MAX_SUBS: usize = 8;

/// Maximum number of (resource ID, peer) remote-subscription entries
/// tracked from committed DECL-SUB declarations.
pub const MAX_REMOTE_SUBS: usize = MAX_PEERS * MAX_SUBS;

/// Maximum number of RID<->URI bindings admitted from committed DECL-RES
/// declarations, across every peer.
pub const MAX_URI_BINDINGS: usize = MAX_REMOTE_SUBS;

/// Number of serialized-message slots retained per conduit's transmit
/// window before `write` starts returning `false`.
pub const WINDOW_ENTRIES: usize = 64;

/// Total bytes of ring storage per conduit's transmit window.
pub const WINDOW_BYTES: usize = TRANSPORT_MTU * 8;

/// Interval in milliseconds between keepalive beacons on an otherwise
/// idle operational peer.
pub const KEEPALIVE_INTERVAL_MS: u32 = LEASE_DURATION_MS / 4;

/// Grace period, in milliseconds, a peer spends in the `Draining` state
/// (CLOSE received/sent, or lease expired) before its slot is freed.
pub const DRAIN_GRACE_MS: u32 = 1_000;

/// Maximum number of window entries retransmitted in response to a
/// single ACKNACK mask (the mask itself only ever names up to 32
/// sequence numbers, but a conservative burst cap keeps retransmission
/// off the stack small).
pub const MAX_RETRANSMIT_BURST: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MAX_MCONDUIT_DESTS >= 1);
        assert!(WINDOW_BYTES >= TRANSPORT_MTU);
        assert!(KEEPALIVE_INTERVAL_MS < LEASE_DURATION_MS);
    }
}
