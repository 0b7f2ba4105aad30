// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Message structures for every kind in [`super::header::MessageKind`].
//!
//! Messages borrow their variable-length fields (URIs, payloads) from
//! the buffer they were decoded out of, so decoding never copies or
//! allocates.

use super::types::{CommitId, ConduitId, PeerId, ResourceId, SubMode};
use crate::seq::Seq;

/// A decoded wire message, borrowing from the packet buffer it came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<'a> {
    /// "Is anyone listening."
    Scout,
    /// "I am here."
    Hello {
        /// Advertiser's peer ID.
        peer_id: PeerId,
    },
    /// Session establishment request.
    Open {
        /// Opener's peer ID.
        peer_id: PeerId,
        /// Requested lease duration, milliseconds.
        lease_duration_ms: u32,
    },
    /// Session establishment response.
    Accept {
        /// Acceptor's own peer ID.
        peer_id: PeerId,
        /// The opener's peer ID, echoed back for correlation.
        opener_id: PeerId,
        /// Granted lease duration, milliseconds.
        lease_duration_ms: u32,
    },
    /// Session teardown.
    Close {
        /// Closer's peer ID.
        peer_id: PeerId,
        /// Reason code (0 = normal, 1 = reliability violation,
        /// 2 = duplicate ID).
        reason: u8,
    },
    /// Announce the current transmit tail on a conduit.
    Synch {
        /// Conduit this applies to.
        conduit: ConduitId,
        /// First unacknowledged sequence number.
        seqbase: Seq,
    },
    /// Acknowledge/negative-acknowledge receipt on a conduit.
    AckNack {
        /// Conduit this applies to.
        conduit: ConduitId,
        /// Cumulative ack base: every sequence number before this was
        /// received.
        seqbase: Seq,
        /// Bitmask of sequence numbers after `seqbase` that are
        /// missing (bit 0 = `seqbase`, bit 1 = `seqbase + 1`, ...).
        mask: u32,
    },
    /// Bind a URI to a resource ID within a declaration transaction.
    DeclRes {
        /// Transaction this belongs to.
        commit: CommitId,
        /// Resource ID being bound.
        rid: ResourceId,
        /// URI being bound, or empty if this resource has no URI.
        uri: &'a [u8],
    },
    /// Announce a publication within a declaration transaction.
    DeclPub {
        /// Transaction this belongs to.
        commit: CommitId,
        /// Resource ID being published.
        rid: ResourceId,
    },
    /// Announce a subscription within a declaration transaction.
    DeclSub {
        /// Transaction this belongs to.
        commit: CommitId,
        /// Resource ID being subscribed to.
        rid: ResourceId,
        /// Requested delivery mode.
        mode: SubMode,
    },
    /// Commit a declaration transaction.
    DeclCommit {
        /// Transaction being committed.
        commit: CommitId,
    },
    /// Result of a committed declaration transaction.
    DeclResult {
        /// Transaction this is the result of.
        commit: CommitId,
        /// Status code (0 = ok, nonzero = rejected).
        status: u8,
        /// Resource ID the result applies to.
        rid: ResourceId,
    },
    /// Best-effort data on a resource ID.
    Data {
        /// Target resource ID.
        rid: ResourceId,
        /// Payload bytes.
        payload: &'a [u8],
    },
    /// Reliable data on a conduit.
    MData {
        /// Conduit this was sent on.
        conduit: ConduitId,
        /// Sequence number within the conduit.
        seq: Seq,
        /// Target resource ID.
        rid: ResourceId,
        /// Payload bytes.
        payload: &'a [u8],
    },
    /// Reliable data for a URI-named resource not yet bound to a RID.
    WData {
        /// Conduit this was sent on.
        conduit: ConduitId,
        /// Sequence number within the conduit.
        seq: Seq,
        /// Target URI.
        uri: &'a [u8],
        /// Payload bytes.
        payload: &'a [u8],
    },
    /// Idle-peer lease refresh; carries no fields.
    KeepAlive,
}
