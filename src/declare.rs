// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Declaration engine: the two-phase commit that admits
//! DECL-RES/DECL-PUB/DECL-SUB into the routing table.
//!
//! A peer's packet may carry several declarations followed by a single
//! DECL-COMMIT. This mirrors the reference implementation's
//! stage/precommit/commit split (`zhe_rsub_register` /
//! `zhe_rsub_precommit` / `zhe_rsub_commit` / `zhe_rsub_precommit_curpkt_abort`):
//! declarations are staged as they are parsed, validated as a batch
//! once the commit ID is known, and only then admitted atomically so a
//! malformed tail of the packet can never leave the routing table
//! half-updated.

use heapless::Vec;

use crate::config::{MAX_PUBS, MAX_SUBS, ZHE_MAX_RID, ZHE_MAX_URISPACE};
use crate::error::{Error, Result};
use crate::wire::types::{CommitId, ResourceId, SubMode};

/// Maximum declarations staged for one in-flight transaction.
pub const MAX_STAGED: usize = MAX_PUBS + MAX_SUBS;

/// Error bits accumulated by [`DeclareEngine::precommit`] and carried in
/// a DECL-RESULT's status byte.
pub mod errbits {
    /// RID is zero or exceeds [`crate::config::ZHE_MAX_RID`].
    pub const RID_OUT_OF_RANGE: u8 = 1 << 0;
    /// The same RID was declared with two different [`super::SubMode`]s
    /// within one transaction.
    pub const CONFLICTING_MODE: u8 = 1 << 1;
    /// A DECL-RES's URI exceeds [`crate::config::ZHE_MAX_URISPACE`].
    pub const URI_TOO_LONG: u8 = 1 << 2;
}

/// A URI byte string, capped at [`ZHE_MAX_URISPACE`] and carried by value
/// through staging so a committed `DECL-RES` has real bytes to bind into
/// [`crate::pubsub::UriTable`], not just a validated length.
pub type UriBuf = heapless::Vec<u8, ZHE_MAX_URISPACE>;

/// One declaration awaiting commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decl {
    /// Bind a resource ID to a URI: the declared length (checked against
    /// [`ZHE_MAX_URISPACE`] at precommit) and a capacity-truncated copy of
    /// the bytes themselves, valid once that check has passed.
    Res(ResourceId, usize, UriBuf),
    /// Announce a publication.
    Pub(ResourceId),
    /// Announce a subscription.
    Sub(ResourceId, SubMode),
}

/// Result of [`DeclareEngine::precommit`] once a transaction's
/// structural existence has been confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecommitOutcome {
    /// Every staged declaration validated; safe to [`DeclareEngine::commit`].
    Ok,
    /// At least one declaration failed validation. Carries the first
    /// offending RID and the accumulated error bitmask (see [`errbits`])
    /// for a DECL-RESULT reply. The transaction should be aborted, not
    /// committed.
    Rejected {
        /// First resource ID that failed validation.
        rid: ResourceId,
        /// Bitmask of [`errbits`] describing why.
        bits: u8,
    },
}

struct Staged {
    peeridx: u8,
    commit: CommitId,
    decl: Decl,
}

/// Accumulates declarations for the transactions currently being
/// parsed out of peers' packets.
///
/// Staging is keyed by `(peeridx, commit)`, not `commit` alone: commit
/// IDs are chosen independently by each peer (a single byte per the
/// wire format) and two peers are free to both be mid-transaction
/// under the same ID at once.
#[derive(Default)]
pub struct DeclareEngine {
    staged: Vec<Staged, MAX_STAGED>,
}

impl DeclareEngine {
    /// Build an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage one declaration from `peeridx` under `commit`. Fails with
    /// [`Error::ResourceExhausted`] if the staging area is full.
    pub fn stage(&mut self, peeridx: u8, commit: CommitId, decl: Decl) -> Result<()> {
        self.staged
            .push(Staged { peeridx, commit, decl })
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Validate every declaration staged by `peeridx` under `commit` as
    /// a batch, without admitting them. Fails with
    /// [`Error::DeclarationError`] for a (peer, commit) pair with no
    /// staged declarations at all (an isolated DECL-COMMIT is a
    /// protocol violation distinct from a validation failure, since
    /// there is no offending RID to report in a DECL-RESULT). Otherwise
    /// checks, in staging order: RID range, URI length on DECL-RES, and
    /// conflicting subscription modes for the same RID within this
    /// transaction. The first failure short-circuits with
    /// [`PrecommitOutcome::Rejected`] carrying the offending RID and an
    /// error bitmask (see [`errbits`]); a resource declared both as a
    /// publication and a subscription is left to the caller's routing
    /// table to permit.
    pub fn precommit(&self, peeridx: u8, commit: CommitId) -> Result<PrecommitOutcome> {
        let mut found = false;
        let mut sub_modes: Vec<(ResourceId, SubMode), MAX_STAGED> = Vec::new();
        for s in self
            .staged
            .iter()
            .filter(|s| s.peeridx == peeridx && s.commit == commit)
        {
            found = true;
            let rid = match s.decl {
                Decl::Res(rid, _, _) | Decl::Pub(rid) | Decl::Sub(rid, _) => rid,
            };
            if rid.0 == 0 || rid.0 > ZHE_MAX_RID {
                return Ok(PrecommitOutcome::Rejected {
                    rid,
                    bits: errbits::RID_OUT_OF_RANGE,
                });
            }
            if let Decl::Res(_, uri_len, _) = s.decl {
                if uri_len > ZHE_MAX_URISPACE {
                    return Ok(PrecommitOutcome::Rejected {
                        rid,
                        bits: errbits::URI_TOO_LONG,
                    });
                }
            }
            if let Decl::Sub(_, mode) = s.decl {
                if let Some(&(_, prev)) = sub_modes.iter().find(|(r, _)| *r == rid) {
                    if prev != mode {
                        return Ok(PrecommitOutcome::Rejected {
                            rid,
                            bits: errbits::CONFLICTING_MODE,
                        });
                    }
                } else {
                    let _ = sub_modes.push((rid, mode));
                }
            }
        }
        if !found {
            return Err(Error::DeclarationError);
        }
        Ok(PrecommitOutcome::Ok)
    }

    /// Remove and return every declaration staged by `peeridx` under
    /// `commit`, in staging order, for the caller to admit into the
    /// routing table. Declarations under other transactions are left
    /// untouched (a peer may interleave more than one transaction's
    /// worth of state across retransmitted packets).
    pub fn commit(&mut self, peeridx: u8, commit: CommitId) -> Vec<Decl, MAX_STAGED> {
        let mut out = Vec::new();
        let mut remaining = Vec::new();
        for s in self.staged.drain(..) {
            if s.peeridx == peeridx && s.commit == commit {
                let _ = out.push(s.decl);
            } else {
                let _ = remaining.push(s);
            }
        }
        self.staged = remaining;
        out
    }

    /// Discard every declaration staged by `peeridx` under `commit`
    /// without admitting them, e.g. on a malformed packet tail.
    pub fn abort(&mut self, peeridx: u8, commit: CommitId) {
        let mut remaining = Vec::new();
        for s in self.staged.drain(..) {
            if !(s.peeridx == peeridx && s.commit == commit) {
                let _ = remaining.push(s);
            }
        }
        self.staged = remaining;
    }

    /// Discard every declaration staged by `peeridx` regardless of
    /// commit ID, e.g. when that peer's slot is freed.
    pub fn clear_peer(&mut self, peeridx: u8) {
        let mut remaining = Vec::new();
        for s in self.staged.drain(..) {
            if s.peeridx != peeridx {
                let _ = remaining.push(s);
            }
        }
        self.staged = remaining;
    }

    /// Discard every staged declaration regardless of peer or commit ID.
    pub fn clear(&mut self) {
        self.staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(v: u64) -> ResourceId {
        ResourceId::new(v).unwrap()
    }

    #[test]
    fn commit_returns_only_matching_declarations() {
        let mut e = DeclareEngine::new();
        e.stage(0, CommitId(1), Decl::Pub(rid(1))).unwrap();
        e.stage(0, CommitId(1), Decl::Sub(rid(2), SubMode::Reliable))
            .unwrap();
        e.stage(0, CommitId(2), Decl::Pub(rid(3))).unwrap();

        assert!(e.precommit(0, CommitId(1)).is_ok());
        let admitted = e.commit(0, CommitId(1));
        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted[0], Decl::Pub(rid(1)));

        // commit id 2's declaration is still staged
        assert!(e.precommit(0, CommitId(2)).is_ok());
    }

    #[test]
    fn precommit_rejects_unknown_commit_id() {
        let e = DeclareEngine::new();
        assert_eq!(e.precommit(0, CommitId(9)), Err(Error::DeclarationError));
    }

    #[test]
    fn same_commit_id_from_different_peers_does_not_mix() {
        let mut e = DeclareEngine::new();
        e.stage(0, CommitId(1), Decl::Pub(rid(1))).unwrap();
        e.stage(1, CommitId(1), Decl::Pub(rid(2))).unwrap();

        let from_peer_0 = e.commit(0, CommitId(1));
        assert_eq!(from_peer_0, [Decl::Pub(rid(1))]);
        // peer 1's declaration under the same commit id is untouched
        assert!(e.precommit(1, CommitId(1)).is_ok());
    }

    #[test]
    fn abort_discards_only_its_own_commit() {
        let mut e = DeclareEngine::new();
        e.stage(0, CommitId(1), Decl::Pub(rid(1))).unwrap();
        e.stage(0, CommitId(2), Decl::Pub(rid(2))).unwrap();
        e.abort(0, CommitId(1));
        assert_eq!(e.precommit(0, CommitId(1)), Err(Error::DeclarationError));
        assert!(e.precommit(0, CommitId(2)).is_ok());
    }

    #[test]
    fn clear_peer_discards_every_transaction_for_that_peer() {
        let mut e = DeclareEngine::new();
        e.stage(0, CommitId(1), Decl::Pub(rid(1))).unwrap();
        e.stage(1, CommitId(1), Decl::Pub(rid(2))).unwrap();
        e.clear_peer(0);
        assert_eq!(e.precommit(0, CommitId(1)), Err(Error::DeclarationError));
        assert!(e.precommit(1, CommitId(1)).is_ok());
    }

    #[test]
    fn staging_area_exhaustion_is_reported() {
        let mut e = DeclareEngine::new();
        for i in 0..MAX_STAGED {
            e.stage(0, CommitId(0), Decl::Pub(rid(i as u64 + 1))).unwrap();
        }
        assert_eq!(
            e.stage(0, CommitId(0), Decl::Pub(rid(999))),
            Err(Error::ResourceExhausted)
        );
    }
}
