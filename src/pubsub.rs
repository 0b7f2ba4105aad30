// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Local publication/subscription tables and inbound data routing.
//!
//! Local publications and local subscriptions are independent tables
//! keyed by resource ID: a `subscribe(rid)` that matches a locally
//! `publish`-ed `rid` is never looped back. Only inbound wire
//! DATA/MDATA/WDATA is routed to subscribers (see the loopback
//! resolution in the root of this crate's design notes).

use heapless::Vec;

use crate::config::{MAX_PUBS, MAX_REMOTE_SUBS, MAX_SUBS, MAX_URI_BINDINGS};
use crate::declare::UriBuf;
use crate::error::{Error, Result};
use crate::wire::types::{ConduitId, ResourceId, SubMode};

/// A subscriber callback: given the opaque `arg` supplied at
/// `subscribe` time, the matched resource ID, and the payload bytes.
/// Plain function pointers (no captured closure state) keep
/// subscription storage a fixed-size table with no trait objects and
/// no allocation; callers thread state through `arg`, e.g. an index
/// into their own context array.
pub type Handler = fn(arg: usize, rid: ResourceId, payload: &[u8]);

/// Handle to a local publication, returned by [`PubSubTable::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubHandle(pub u8);

/// Handle to a local subscription, returned by [`PubSubTable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubHandle(pub u8);

struct Publication {
    rid: ResourceId,
    conduit: ConduitId,
    reliable: bool,
}

struct Subscription {
    rid: ResourceId,
    max_size: usize,
    conduit: ConduitId,
    mode: SubMode,
    handler: Handler,
    arg: usize,
}

/// Local pub/sub routing table.
#[derive(Default)]
pub struct PubSubTable {
    pubs: Vec<Option<Publication>, MAX_PUBS>,
    subs: Vec<Option<Subscription>, MAX_SUBS>,
}

impl PubSubTable {
    /// Build an empty table.
    pub fn new() -> Self {
        let mut pubs = Vec::new();
        let mut subs = Vec::new();
        for _ in 0..MAX_PUBS {
            let _ = pubs.push(None);
        }
        for _ in 0..MAX_SUBS {
            let _ = subs.push(None);
        }
        Self { pubs, subs }
    }

    /// Register a local publication on `rid`/`conduit`. Duplicate
    /// declarations of the same `rid` are assumed to be handled by the
    /// caller's declaration engine; this table does not deduplicate.
    pub fn publish(&mut self, rid: ResourceId, conduit: ConduitId, reliable: bool) -> Result<PubHandle> {
        let idx = self
            .pubs
            .iter()
            .position(|p| p.is_none())
            .ok_or(Error::ResourceExhausted)?;
        self.pubs[idx] = Some(Publication {
            rid,
            conduit,
            reliable,
        });
        Ok(PubHandle(idx as u8))
    }

    /// Register a local subscription on `rid`, invoking `handler(arg,
    /// rid, payload)` for every matching inbound message, synchronously
    /// and in registration order relative to other subscribers of the
    /// same `rid`.
    pub fn subscribe(
        &mut self,
        rid: ResourceId,
        max_size: usize,
        conduit: ConduitId,
        mode: SubMode,
        handler: Handler,
        arg: usize,
    ) -> Result<SubHandle> {
        let idx = self
            .subs
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::ResourceExhausted)?;
        self.subs[idx] = Some(Subscription {
            rid,
            max_size,
            conduit,
            mode,
            handler,
            arg,
        });
        Ok(SubHandle(idx as u8))
    }

    /// Remove a publication.
    pub fn unpublish(&mut self, handle: PubHandle) {
        if let Some(slot) = self.pubs.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    /// Remove a subscription.
    pub fn unsubscribe(&mut self, handle: SubHandle) {
        if let Some(slot) = self.subs.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    /// The publication's conduit and reliability, for the writer path
    /// ([`crate::engine::Engine::write`]).
    pub fn publication(&self, handle: PubHandle) -> Option<(ResourceId, ConduitId, bool)> {
        self.pubs
            .get(handle.0 as usize)?
            .as_ref()
            .map(|p| (p.rid, p.conduit, p.reliable))
    }

    /// Every registered local publication, for announcing the full
    /// local state to a newly operational peer.
    pub fn publications(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.pubs.iter().flatten().map(|p| p.rid)
    }

    /// Every registered local subscription, for announcing the full
    /// local state to a newly operational peer.
    pub fn subscriptions(&self) -> impl Iterator<Item = (ResourceId, SubMode)> + '_ {
        self.subs.iter().flatten().map(|s| (s.rid, s.mode))
    }

    /// Deliver `payload` for inbound `rid` to every matching
    /// subscriber, in registration order. Returns the number of
    /// subscribers invoked; zero means the sample is discarded as
    /// unmatched.
    pub fn route(&self, rid: ResourceId, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for sub in self.subs.iter().flatten() {
            if sub.rid == rid {
                if payload.len() <= sub.max_size {
                    (sub.handler)(sub.arg, rid, payload);
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

/// Which operational peers have a committed DECL-SUB for a given
/// resource ID, populated from [`crate::engine::Engine`]'s declaration
/// commit handling. Consulted by the writer path so reliable/best-effort
/// sends target peers that actually asked for the data rather than
/// every operational peer.
#[derive(Default)]
pub struct RemoteSubs {
    entries: Vec<(ResourceId, u8), MAX_REMOTE_SUBS>,
}

impl RemoteSubs {
    /// Build an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peeridx` has declared a subscription to `rid`.
    /// Idempotent. Fails with [`Error::ResourceExhausted`] if the table
    /// is full.
    pub fn add(&mut self, rid: ResourceId, peeridx: u8) -> Result<()> {
        if self.entries.iter().any(|&(r, p)| r == rid && p == peeridx) {
            return Ok(());
        }
        self.entries
            .push((rid, peeridx))
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Drop every entry for `peeridx`, e.g. when that peer's slot is freed.
    pub fn remove_peer(&mut self, peeridx: u8) {
        while let Some(pos) = self.entries.iter().position(|&(_, p)| p == peeridx) {
            self.entries.swap_remove(pos);
        }
    }

    /// Every peer index known to have declared a subscription to `rid`.
    pub fn subscribers_of(&self, rid: ResourceId) -> impl Iterator<Item = u8> + '_ {
        self.entries
            .iter()
            .filter_map(move |&(r, p)| if r == rid { Some(p) } else { None })
    }

    /// Whether any peer has declared a subscription to `rid`.
    pub fn has_any(&self, rid: ResourceId) -> bool {
        self.entries.iter().any(|&(r, _)| r == rid)
    }
}

/// RID<->URI bindings admitted from committed DECL-RES declarations.
/// Consulted by inbound WDATA routing ([`crate::engine::Engine`]) to
/// resolve a URI to a resource ID once bound; a WDATA for an unbound URI
/// has nothing to route to and is discarded.
#[derive(Default)]
pub struct UriTable {
    entries: Vec<(UriBuf, ResourceId), MAX_URI_BINDINGS>,
}

impl UriTable {
    /// Build an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or update a RID<->URI binding. Idempotent: rebinding an
    /// already-bound URI to a different RID overwrites the existing
    /// entry in place rather than growing the table. Fails with
    /// [`Error::ResourceExhausted`] if the table is full and `uri` does
    /// not already have an entry.
    pub fn bind(&mut self, rid: ResourceId, uri: &UriBuf) -> Result<()> {
        if let Some(entry) = self.entries.iter_mut().find(|(u, _)| u == uri) {
            entry.1 = rid;
            return Ok(());
        }
        self.entries
            .push((uri.clone(), rid))
            .map_err(|_| Error::ResourceExhausted)
    }

    /// The resource ID bound to `uri`, if any.
    pub fn rid_for(&self, uri: &[u8]) -> Option<ResourceId> {
        self.entries
            .iter()
            .find(|(u, _)| u.as_slice() == uri)
            .map(|(_, rid)| *rid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_handler(_arg: usize, _rid: ResourceId, _payload: &[u8]) {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn rid(v: u64) -> ResourceId {
        ResourceId::new(v).unwrap()
    }

    #[test]
    fn route_invokes_only_matching_subscribers() {
        CALLS.store(0, Ordering::SeqCst);
        let mut t = PubSubTable::new();
        t.subscribe(rid(1), 64, ConduitId(0), SubMode::BestEffort, counting_handler, 0)
            .unwrap();
        t.subscribe(rid(2), 64, ConduitId(0), SubMode::BestEffort, counting_handler, 0)
            .unwrap();

        let delivered = t.route(rid(1), b"hi");
        assert_eq!(delivered, 1);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_payload_is_not_delivered() {
        CALLS.store(0, Ordering::SeqCst);
        let mut t = PubSubTable::new();
        t.subscribe(rid(1), 2, ConduitId(0), SubMode::BestEffort, counting_handler, 0)
            .unwrap();
        let delivered = t.route(rid(1), b"too long");
        assert_eq!(delivered, 0);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn local_publish_and_subscribe_on_same_rid_do_not_loop_back() {
        CALLS.store(0, Ordering::SeqCst);
        let mut t = PubSubTable::new();
        t.publish(rid(1), ConduitId(0), true).unwrap();
        t.subscribe(rid(1), 64, ConduitId(0), SubMode::Reliable, counting_handler, 0)
            .unwrap();
        // publish() never calls route() itself; only inbound wire data does.
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn table_exhaustion_is_reported() {
        let mut t = PubSubTable::new();
        for i in 0..MAX_PUBS {
            t.publish(rid(i as u64 + 1), ConduitId(0), false).unwrap();
        }
        assert_eq!(
            t.publish(rid(999), ConduitId(0), false),
            Err(Error::ResourceExhausted)
        );
    }

    #[test]
    fn remote_subs_tracks_per_resource_subscribers() {
        let mut r = RemoteSubs::new();
        r.add(rid(1), 0).unwrap();
        r.add(rid(1), 2).unwrap();
        r.add(rid(2), 2).unwrap();

        let mut subs: heapless::Vec<u8, 4> = r.subscribers_of(rid(1)).collect();
        subs.sort_unstable();
        assert_eq!(subs.as_slice(), &[0, 2]);
        assert!(r.has_any(rid(2)));
        assert!(!r.has_any(rid(3)));
    }

    #[test]
    fn remote_subs_add_is_idempotent() {
        let mut r = RemoteSubs::new();
        r.add(rid(1), 0).unwrap();
        r.add(rid(1), 0).unwrap();
        assert_eq!(r.subscribers_of(rid(1)).count(), 1);
    }

    #[test]
    fn remote_subs_remove_peer_drops_every_entry() {
        let mut r = RemoteSubs::new();
        r.add(rid(1), 0).unwrap();
        r.add(rid(2), 0).unwrap();
        r.add(rid(1), 1).unwrap();
        r.remove_peer(0);
        assert_eq!(r.subscribers_of(rid(1)).collect::<heapless::Vec<u8, 4>>().as_slice(), &[1]);
        assert!(!r.has_any(rid(2)));
    }

    fn uri(bytes: &[u8]) -> UriBuf {
        UriBuf::from_slice(bytes).unwrap()
    }

    #[test]
    fn uri_table_resolves_bound_uri_to_its_rid() {
        let mut t = UriTable::new();
        t.bind(rid(1), &uri(b"/sensors/temp")).unwrap();
        assert_eq!(t.rid_for(b"/sensors/temp"), Some(rid(1)));
        assert_eq!(t.rid_for(b"/sensors/humidity"), None);
    }

    #[test]
    fn uri_table_rebind_overwrites_in_place() {
        let mut t = UriTable::new();
        t.bind(rid(1), &uri(b"/a")).unwrap();
        t.bind(rid(2), &uri(b"/a")).unwrap();
        assert_eq!(t.rid_for(b"/a"), Some(rid(2)));
    }

    #[test]
    fn uri_table_exhaustion_is_reported() {
        let mut t = UriTable::new();
        for i in 0..MAX_URI_BINDINGS {
            let u = [i as u8];
            t.bind(rid(i as u64 + 1), &uri(&u)).unwrap();
        }
        assert_eq!(
            t.bind(rid(999), &uri(b"overflow")),
            Err(Error::ResourceExhausted)
        );
    }
}
