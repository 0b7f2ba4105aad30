// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The central engine: owns every peer, conduit, and table, and is the
//! only type application code touches directly.
//!
//! `Engine::poll` is the single dispatch entry point a caller drives
//! from its main loop (or interrupt-driven receive path): it drains one
//! packet from the transport, updates the sender's peer state, and
//! routes the decoded message to the reliability layer, the
//! declaration engine, or pub/sub delivery. `Engine::housekeeping` is
//! the timer-driven counterpart: SYNCH emission, ACKNACK-timeout
//! retransmission, lease expiry, and keepalives.

use heapless::Vec;

use crate::config::{
    MAX_MCONDUIT_DESTS, MAX_MULTICAST_GROUPS, MAX_PEERS, MAX_PUBS, MAX_RETRANSMIT_BURST, MAX_SUBS,
    N_OUT_CONDUITS, N_OUT_MCONDUITS, RX_CONDUIT_SLOTS, TRANSPORT_MTU, WINDOW_ENTRIES,
};
use crate::declare::{Decl, DeclareEngine, PrecommitOutcome, UriBuf, MAX_STAGED};
use crate::error::{Error, Result};
use crate::heap::MinSeqHeap;
use crate::housekeeping::{ConduitTimers, KeepaliveTimer};
use crate::peer::{PeerState, PeerTable};
use crate::pubsub::{Handler, PubHandle, PubSubTable, RemoteSubs, SubHandle, UriTable};
use crate::rx::{RxOutcome, RxTracker};
use crate::seq::Seq;
use crate::telemetry::Telemetry;
use crate::time::Millis;
use crate::transport::Transport;
use crate::trace;
use crate::window::TxWindow;
use crate::wire::types::{CommitId, ConduitId, PeerId, ResourceId, SubMode};
use crate::wire::Message;

/// Upper bound on the messages in one declaration-transaction batch:
/// every publication and subscription the local peer holds, plus the
/// trailing `DECL-COMMIT`.
const MAX_ANNOUNCE_BATCH: usize = MAX_PUBS + MAX_SUBS + 1;

/// Runtime configuration consumed by [`Engine::init`].
pub struct Config<A> {
    /// This instance's peer ID.
    pub own_id: PeerId,
    /// Address peers SCOUT/HELLO on.
    pub scout_addr: A,
    /// Requested lease duration offered in OPEN/ACCEPT.
    pub lease_duration_ms: u32,
    /// Multicast groups [`Engine::init`] joins on the transport before
    /// discovery begins.
    pub joined_groups: Vec<A, MAX_MULTICAST_GROUPS>,
    /// Per-`mconduit` destination sets, fixed at configuration time. A
    /// non-empty entry at index `m` makes `mconduit` `m` a genuine
    /// multi-destination conduit for the engine's lifetime, gated by its
    /// min-sequence heap over exactly those destinations; an empty entry
    /// (the default) falls back to every currently-operational peer, the
    /// same as before this field existed.
    pub mconduit_dests: [Vec<A, MAX_MCONDUIT_DESTS>; N_OUT_MCONDUITS],
}

impl<A: Clone> Config<A> {
    /// Build a `Config` with no joined groups and no fixed mconduit
    /// destinations (every mconduit falls back to all operational
    /// peers). Use [`Config::join_group`]/[`Config::mconduit_dest`] to
    /// populate either.
    pub fn new(own_id: PeerId, scout_addr: A, lease_duration_ms: u32) -> Self {
        Self {
            own_id,
            scout_addr,
            lease_duration_ms,
            joined_groups: Vec::new(),
            mconduit_dests: core::array::from_fn(|_| Vec::new()),
        }
    }

    /// Join `group` at [`Engine::init`] time, in addition to scouting
    /// `scout_addr`. Silently capped at [`MAX_MULTICAST_GROUPS`].
    pub fn join_group(mut self, group: A) -> Self {
        let _ = self.joined_groups.push(group);
        self
    }

    /// Fix `peer_addr` as one of mconduit `mcidx`'s destinations.
    /// Silently capped at [`MAX_MCONDUIT_DESTS`]; a `mcidx` outside
    /// [`N_OUT_MCONDUITS`] is silently ignored.
    pub fn mconduit_dest(mut self, mcidx: usize, peer_addr: A) -> Self {
        if let Some(dests) = self.mconduit_dests.get_mut(mcidx) {
            let _ = dests.push(peer_addr);
        }
        self
    }
}

/// The engine. Generic over the transport capability so the core
/// stays testable with a fake and portable to any medium. Time and
/// peer-ID generation are driver-level concerns (see [`crate::time`]
/// and [`crate::entropy`]) resolved before [`Config`] is built and
/// threaded through as plain `now: Millis` arguments, matching the
/// reference `init(config, transport, now)` entry point.
pub struct Engine<T: Transport> {
    transport: T,
    own_id: PeerId,
    scout_addr: T::Address,
    lease_duration_ms: u32,
    peers: PeerTable<T::Address>,
    windows: [TxWindow<WINDOW_ENTRIES>; N_OUT_CONDUITS],
    /// Which peer index each unicast conduit is currently addressed to,
    /// if any, so an inbound ACKNACK on that conduit can be routed to
    /// [`Self::windows`] instead of the mconduit/heap machinery.
    conduit_peer: [Option<u8>; N_OUT_CONDUITS],
    mwindows: [TxWindow<WINDOW_ENTRIES>; N_OUT_MCONDUITS],
    mheaps: [MinSeqHeap<MAX_PEERS>; N_OUT_MCONDUITS],
    mdests: [Vec<u8, MAX_MCONDUIT_DESTS>; N_OUT_MCONDUITS],
    /// Per-mconduit configured destination addresses, fixed at
    /// [`Engine::init`] time (see [`Config::mconduit_dests`]). An empty
    /// entry at index `m` means mconduit `m` addresses every operational
    /// peer rather than a fixed set; whether entry `m` is empty is also
    /// what decides unicast-vs-mconduit addressing mode for conduit `m`
    /// in [`Self::write`]/[`Self::on_acknack`] — a static, configured
    /// property, not one recomputed from the live target count.
    mconduit_dests: [Vec<T::Address, MAX_MCONDUIT_DESTS>; N_OUT_MCONDUITS],
    /// Receive-side gap tracking for reliable MDATA, one tracker per
    /// (peer, conduit id); resets when a peer's slot is freed.
    rx: [[RxTracker; RX_CONDUIT_SLOTS]; MAX_PEERS],
    declare: DeclareEngine,
    pubsub: PubSubTable,
    remote_subs: RemoteSubs,
    /// RID<->URI bindings admitted from committed DECL-RES declarations,
    /// consulted to route inbound WDATA once bound.
    uri_table: UriTable,
    /// Local declarations registered since the last flush, awaiting a
    /// DECL-PUB/DECL-SUB + DECL-COMMIT broadcast to operational peers.
    pending_decls: Vec<Decl, MAX_STAGED>,
    telemetry: Telemetry,
    conduit_timers: [ConduitTimers; N_OUT_CONDUITS],
    mconduit_timers: [ConduitTimers; N_OUT_MCONDUITS],
    keepalive_timers: [KeepaliveTimer; MAX_PEERS],
    next_commit_id: u8,
}

impl<T: Transport> Engine<T> {
    /// Initialize the engine: bind the transport and prepare all
    /// tables. Does not emit anything on the wire; call
    /// [`Engine::start`] once ready to begin discovery. `now` is the
    /// caller's current monotonic timestamp (see [`crate::time`]).
    pub fn init(cfg: Config<T::Address>, mut transport: T, now: Millis) -> Result<Self> {
        transport.init().map_err(|_| Error::FatalInit)?;
        for group in cfg.joined_groups.iter() {
            transport.join_multicast(group).map_err(|_| Error::FatalInit)?;
        }
        let _ = now;
        Ok(Self {
            transport,
            own_id: cfg.own_id,
            scout_addr: cfg.scout_addr,
            lease_duration_ms: cfg.lease_duration_ms,
            peers: PeerTable::new(),
            windows: core::array::from_fn(|_| TxWindow::new()),
            conduit_peer: core::array::from_fn(|_| None),
            mwindows: core::array::from_fn(|_| TxWindow::new()),
            mheaps: core::array::from_fn(|_| MinSeqHeap::new()),
            mdests: core::array::from_fn(|_| Vec::new()),
            mconduit_dests: cfg.mconduit_dests,
            rx: core::array::from_fn(|_| core::array::from_fn(|_| RxTracker::new())),
            declare: DeclareEngine::new(),
            pubsub: PubSubTable::new(),
            remote_subs: RemoteSubs::new(),
            uri_table: UriTable::new(),
            pending_decls: Vec::new(),
            telemetry: Telemetry::default(),
            conduit_timers: core::array::from_fn(|_| ConduitTimers::default()),
            mconduit_timers: core::array::from_fn(|_| ConduitTimers::default()),
            keepalive_timers: core::array::from_fn(|_| KeepaliveTimer::default()),
            next_commit_id: 0,
        })
    }

    /// This instance's peer ID.
    pub fn own_id(&self) -> &PeerId {
        &self.own_id
    }

    /// A read-only snapshot of activity counters.
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    /// Emit the initial SCOUT to begin discovery.
    pub fn start(&mut self, now: Millis) -> Result<()> {
        self.send_to(&Message::Scout, &self.scout_addr.clone(), now)
    }

    fn send_to(&mut self, msg: &Message, dest: &T::Address, now: Millis) -> Result<()> {
        let mut buf = [0u8; TRANSPORT_MTU];
        let n = msg.encode(&mut buf)?;
        self.transport
            .send(&buf[..n], dest)
            .map_err(|_| Error::TransportError)?;
        let _ = now;
        Ok(())
    }

    /// Pack as many of `msgs` as fit into one datagram each and send
    /// them, in order, to `dest`. A declaration transaction's
    /// `DECL-COMMIT` only takes effect once every `DECL-*` message
    /// staged ahead of it has been dispatched on the receiving side
    /// (see [`Self::dispatch_message`]'s in-packet ordering), so this
    /// keeps a whole transaction in one packet whenever `TRANSPORT_MTU`
    /// allows rather than trickling it out one message per send.
    fn send_batch(&mut self, msgs: &[Message], dest: &T::Address, now: Millis) -> Result<()> {
        let mut buf = [0u8; TRANSPORT_MTU];
        let mut at = 0usize;
        for msg in msgs {
            let mut scratch = [0u8; TRANSPORT_MTU];
            let n = msg.encode(&mut scratch)?;
            if at + n > buf.len() {
                if at > 0 {
                    self.transport
                        .send(&buf[..at], dest)
                        .map_err(|_| Error::TransportError)?;
                    at = 0;
                }
                if n > buf.len() {
                    return Err(Error::BufferTooSmall);
                }
            }
            buf[at..at + n].copy_from_slice(&scratch[..n]);
            at += n;
        }
        if at > 0 {
            self.transport
                .send(&buf[..at], dest)
                .map_err(|_| Error::TransportError)?;
        }
        let _ = now;
        Ok(())
    }

    fn alloc_commit_id(&mut self) -> CommitId {
        let id = CommitId(self.next_commit_id);
        self.next_commit_id = self.next_commit_id.wrapping_add(1);
        id
    }

    // ---- Local pub/sub API ----------------------------------------------

    /// Register a local publication; schedules a DECL-PUB to every
    /// operational peer on the next [`Engine::housekeeping`] pass.
    pub fn publish(&mut self, rid: ResourceId, conduit: ConduitId, reliable: bool) -> Result<PubHandle> {
        let handle = self.pubsub.publish(rid, conduit, reliable)?;
        let _ = self.pending_decls.push(Decl::Pub(rid));
        Ok(handle)
    }

    /// Register a local subscription; schedules a DECL-SUB to every
    /// operational peer on the next [`Engine::housekeeping`] pass.
    pub fn subscribe(
        &mut self,
        rid: ResourceId,
        max_size: usize,
        conduit: ConduitId,
        mode: SubMode,
        handler: Handler,
        arg: usize,
    ) -> Result<SubHandle> {
        let handle = self
            .pubsub
            .subscribe(rid, max_size, conduit, mode, handler, arg)?;
        let _ = self.pending_decls.push(Decl::Sub(rid, mode));
        Ok(handle)
    }

    /// Publish `payload` on `handle`'s resource ID. For a best-effort
    /// publication this sends immediately; for a reliable one it is
    /// appended to the conduit's transmit window first and `false` is
    /// returned if the window is full (the caller should retry after
    /// more ACKs arrive or a lease expires).
    pub fn write(&mut self, handle: PubHandle, payload: &[u8], now: Millis) -> Result<bool> {
        let (rid, conduit, reliable) = self.pubsub.publication(handle).ok_or(Error::NotFound)?;
        if !reliable {
            let targets = self.send_targets(rid, None);
            let msg = Message::Data { rid, payload };
            for &peeridx in targets.iter() {
                if let Some(addr) = self.peers.get(peeridx).and_then(|p| p.addr().cloned()) {
                    let _ = self.send_to(&msg, &addr, now);
                }
            }
            return Ok(true);
        }

        // A conduit's unicast/mconduit addressing mode is fixed at
        // configuration time by `Config::mconduit_dest` (see
        // `self.mconduit_dests`), not recomputed from the live
        // subscriber count on every write: a conduit with no configured
        // mconduit destinations keeps its own window keyed one-to-one to
        // whichever single peer it is currently addressed to, while one
        // with a configured destination set is always gated by the
        // min-sequence heap over its slowest acknowledger, even at a
        // moment when only one destination happens to be live.
        let mcidx = conduit.0 as usize % N_OUT_MCONDUITS.max(1);
        let is_mconduit = self
            .mconduit_dests
            .get(mcidx)
            .map(|d| !d.is_empty())
            .unwrap_or(false);

        if !is_mconduit {
            let cidx = conduit.0 as usize % N_OUT_CONDUITS.max(1);
            let targets = self.send_targets(rid, None);
            let window = self.windows.get_mut(cidx).ok_or(Error::InvalidParameter)?;
            if window.is_full() {
                return Ok(false);
            }

            let mut scratch = [0u8; TRANSPORT_MTU];
            let seq = window.next_seq();
            let msg = Message::MData {
                conduit,
                seq,
                rid,
                payload,
            };
            let n = msg.encode(&mut scratch)?;
            window.write(&scratch[..n])?;

            if let Some(&peeridx) = targets.first() {
                self.conduit_peer[cidx] = Some(peeridx);
                if let Some(addr) = self.peers.get(peeridx).and_then(|p| p.addr().cloned()) {
                    let _ = self.send_to(&msg, &addr, now);
                    self.keepalive_timers[peeridx as usize].mark_activity(now);
                }
            }
            self.conduit_timers[cidx].mark_synch_sent(now);
            return Ok(true);
        }

        let targets = self.send_targets(rid, Some(mcidx));
        let window = self
            .mwindows
            .get_mut(mcidx)
            .ok_or(Error::InvalidParameter)?;
        if window.is_full() {
            return Ok(false);
        }

        // Reserve space for the MData header by encoding directly;
        // the window stores the serialized wire message so
        // retransmission never re-derives it.
        let mut scratch = [0u8; TRANSPORT_MTU];
        let seq = window.next_seq();
        let msg = Message::MData {
            conduit,
            seq,
            rid,
            payload,
        };
        let n = msg.encode(&mut scratch)?;
        window.write(&scratch[..n])?;

        for &peeridx in targets.iter() {
            if let Some(peer) = self.peers.get(peeridx) {
                if let Some(addr) = peer.addr().cloned() {
                    let _ = self.send_to(&msg, &addr, now);
                    self.keepalive_timers[peeridx as usize].mark_activity(now);
                }
            }
        }
        self.mconduit_timers[mcidx].mark_synch_sent(now);
        Ok(true)
    }

    fn peer_indices_operational(&self) -> Vec<u8, MAX_PEERS> {
        self.peers.operational().collect()
    }

    /// Peers to target for a write on `rid`: known remote subscribers
    /// if any committed DECL-SUB has named this resource, otherwise
    /// every operational peer (declarations may simply not have landed
    /// yet — falling back to broadcast keeps early samples from being
    /// silently dropped). When `mconduit_idx` names an mconduit with a
    /// fixed destination set, the result is further narrowed to peers in
    /// that set.
    fn send_targets(&self, rid: ResourceId, mconduit_idx: Option<usize>) -> Vec<u8, MAX_PEERS> {
        let base: Vec<u8, MAX_PEERS> = if self.remote_subs.has_any(rid) {
            self.remote_subs
                .subscribers_of(rid)
                .filter(|&idx| {
                    self.peers
                        .get(idx)
                        .map(|p| p.state() == PeerState::Operational)
                        .unwrap_or(false)
                })
                .collect()
        } else {
            self.peer_indices_operational()
        };
        match mconduit_idx.and_then(|m| self.mdests.get(m)) {
            Some(dests) if !dests.is_empty() => {
                base.into_iter().filter(|idx| dests.contains(idx)).collect()
            }
            _ => base,
        }
    }

    /// Announce every local publication/subscription to a single peer
    /// as one declaration transaction, e.g. right after it becomes
    /// operational. A no-op if there is no local state to announce.
    fn announce_to(&mut self, dest: &T::Address, now: Millis) -> Result<()> {
        let pubs: Vec<ResourceId, MAX_PUBS> = self.pubsub.publications().collect();
        let subs: Vec<(ResourceId, SubMode), MAX_SUBS> = self.pubsub.subscriptions().collect();
        if pubs.is_empty() && subs.is_empty() {
            return Ok(());
        }
        let commit = self.alloc_commit_id();
        let mut batch: Vec<Message, MAX_ANNOUNCE_BATCH> = Vec::new();
        for rid in pubs {
            let _ = batch.push(Message::DeclPub { commit, rid });
        }
        for (rid, mode) in subs {
            let _ = batch.push(Message::DeclSub { commit, rid, mode });
        }
        let _ = batch.push(Message::DeclCommit { commit });
        self.send_batch(&batch, dest, now)
    }

    // ---- Inbound dispatch -------------------------------------------------

    /// Drain at most one inbound packet and dispatch it. Returns `Ok(true)`
    /// if a packet was processed, `Ok(false)` if none was available.
    pub fn poll(&mut self, now: Millis) -> Result<bool> {
        let mut buf = [0u8; TRANSPORT_MTU];
        let (n, src) = match self.transport.try_recv(&mut buf) {
            Ok(v) => v,
            Err(Error::ResourceExhausted) => return Ok(false),
            Err(e) => return Err(e),
        };
        self.handle_packet(&buf[..n], src, now)?;
        Ok(true)
    }

    /// Dispatch every message framed inside one inbound datagram, in
    /// on-the-wire order. A parse error aborts the rest of this packet
    /// only; messages already dispatched keep their effect, and the
    /// sending peer survives.
    fn handle_packet(&mut self, buf: &[u8], src: T::Address, now: Millis) -> Result<()> {
        for decoded in Message::iter_packet(buf) {
            let msg = match decoded {
                Ok(m) => m,
                Err(_) => {
                    trace!(crate::logging::Category::PeerDisc, "malformed packet dropped");
                    break;
                }
            };
            self.dispatch_message(msg, &src, now)?;
        }
        Ok(())
    }

    fn dispatch_message(&mut self, msg: Message, src: &T::Address, now: Millis) -> Result<()> {
        match msg {
            Message::Scout => self.on_scout(src, now),
            Message::Hello { peer_id } => self.on_hello(src, peer_id, now),
            Message::Open {
                peer_id,
                lease_duration_ms,
            } => self.on_open(src, peer_id, lease_duration_ms, now),
            Message::Accept {
                peer_id,
                opener_id,
                lease_duration_ms,
            } => self.on_accept(src, peer_id, opener_id, lease_duration_ms, now),
            Message::Close { peer_id, .. } => self.on_close(&peer_id, now),
            Message::Synch { conduit, seqbase } => self.on_synch(src, conduit, seqbase, now),
            Message::AckNack {
                conduit,
                seqbase,
                mask,
            } => self.on_acknack(src, conduit, seqbase, mask, now),
            Message::DeclPub { commit, rid } => {
                if let Some(idx) = self.peers.find_by_addr(src) {
                    self.declare.stage(idx, commit, Decl::Pub(rid))?;
                }
                Ok(())
            }
            Message::DeclSub { commit, rid, mode } => {
                if let Some(idx) = self.peers.find_by_addr(src) {
                    self.declare.stage(idx, commit, Decl::Sub(rid, mode))?;
                }
                Ok(())
            }
            Message::DeclRes { commit, rid, uri } => {
                if let Some(idx) = self.peers.find_by_addr(src) {
                    let mut buf = UriBuf::new();
                    let take = uri.len().min(buf.capacity());
                    let _ = buf.extend_from_slice(&uri[..take]);
                    self.declare.stage(idx, commit, Decl::Res(rid, uri.len(), buf))?;
                }
                Ok(())
            }
            Message::DeclCommit { commit } => {
                if let Some(idx) = self.peers.find_by_addr(src) {
                    self.on_decl_commit(idx, commit, src, now)
                } else {
                    Ok(())
                }
            }
            Message::DeclResult { .. } => Ok(()),
            Message::Data { rid, payload } => {
                self.route_inbound(rid, payload);
                Ok(())
            }
            Message::MData {
                conduit,
                seq,
                rid,
                payload,
            } => self.on_mdata(src, conduit, seq, rid, payload, now),
            Message::WData {
                conduit,
                seq,
                uri,
                payload,
            } => self.on_wdata(src, conduit, seq, uri, payload, now),
            Message::KeepAlive => {
                if let Some(idx) = self.peers.find_by_addr(src) {
                    let _ = self.peers.touch(idx, now);
                }
                Ok(())
            }
        }
    }

    fn route_inbound(&mut self, rid: ResourceId, payload: &[u8]) {
        let delivered = self.pubsub.route(rid, payload);
        if delivered > 0 {
            for _ in 0..delivered {
                self.telemetry.record_delivered();
            }
        } else {
            self.telemetry.record_discarded();
        }
    }

    /// Inbound reliable data: run it through the sender's receive-side
    /// tracker before delivery so a reordered or dropped packet can
    /// never jump ahead of an earlier one still missing. Unknown
    /// senders (no peer slot, e.g. a stale retransmission after a
    /// lease expired) are dropped silently, matching `route_inbound`'s
    /// treatment of any other undeliverable sample.
    fn on_mdata(
        &mut self,
        src: &T::Address,
        conduit: ConduitId,
        seq: Seq,
        rid: ResourceId,
        payload: &[u8],
        now: Millis,
    ) -> Result<()> {
        let Some(idx) = self.peers.find_by_addr(src) else {
            self.telemetry.record_discarded();
            return Ok(());
        };
        let cidx = conduit.0 as usize % RX_CONDUIT_SLOTS.max(1);
        let Some(tracker) = self
            .rx
            .get_mut(idx as usize)
            .and_then(|row| row.get_mut(cidx))
        else {
            self.route_inbound(rid, payload);
            return Ok(());
        };

        match tracker.on_seq(seq) {
            RxOutcome::Deliver => self.route_inbound(rid, payload),
            RxOutcome::Duplicate => self.telemetry.record_discarded(),
            RxOutcome::Gap {
                nack_seqbase,
                nack_mask,
            } => {
                self.telemetry.record_oooc();
                self.telemetry.record_discarded();
                self.send_to(
                    &Message::AckNack {
                        conduit,
                        seqbase: nack_seqbase,
                        mask: nack_mask,
                    },
                    src,
                    now,
                )?;
                self.telemetry.record_acknack_sent();
            }
        }
        Ok(())
    }

    /// Inbound reliable data for a URI-named resource: resolves `uri`
    /// to a RID via [`Self::uri_table`](the `uri_table` field) before
    /// running it through the same receive-side gap tracker as
    /// [`Self::on_mdata`]. A URI with no committed DECL-RES binding has
    /// nothing to route to yet and is discarded with telemetry, the
    /// same as any other undeliverable sample.
    fn on_wdata(
        &mut self,
        src: &T::Address,
        conduit: ConduitId,
        seq: Seq,
        uri: &[u8],
        payload: &[u8],
        now: Millis,
    ) -> Result<()> {
        let Some(rid) = self.uri_table.rid_for(uri) else {
            self.telemetry.record_discarded();
            return Ok(());
        };
        self.on_mdata(src, conduit, seq, rid, payload, now)
    }

    fn on_scout(&mut self, src: &T::Address, now: Millis) -> Result<()> {
        self.send_to(
            &Message::Hello {
                peer_id: self.own_id.clone(),
            },
            src,
            now,
        )
    }

    fn on_hello(&mut self, src: &T::Address, peer_id: PeerId, now: Millis) -> Result<()> {
        if self.peers.find_by_addr(src).is_none() {
            let idx = self.peers.allocate(src.clone(), now)?;
            self.peers.set_id(idx, peer_id, now)?;
        }
        self.send_to(
            &Message::Open {
                peer_id: self.own_id.clone(),
                lease_duration_ms: self.lease_duration_ms,
            },
            src,
            now,
        )
    }

    fn on_open(&mut self, src: &T::Address, peer_id: PeerId, lease_duration_ms: u32, now: Millis) -> Result<()> {
        // Duplicate OPEN with a conflicting ID: this peer ID is already
        // bound to a different, live address. Refuse rather than
        // silently rebind an established peer's identity.
        if let Some(other_idx) = self.peers.find_by_id(&peer_id) {
            let bound_elsewhere = self.peers.get(other_idx).and_then(|p| p.addr()) != Some(src);
            if bound_elsewhere {
                self.close_peer_for_violation(None, src, 2, now);
                return Ok(());
            }
        }

        let existing = self.peers.find_by_addr(src);
        if let Some(idx) = existing {
            // Simultaneous open: both sides scouted each other and both
            // sent OPEN before either saw an ACCEPT. The lexicographically
            // smaller peer ID is the passive side; the larger one defers
            // to the smaller peer's ACCEPT instead of also accepting here.
            let already_discovering = self
                .peers
                .get(idx)
                .map(|p| p.state() == PeerState::Discovering)
                .unwrap_or(false);
            if already_discovering && self.own_id.as_bytes() > peer_id.as_bytes() {
                trace!(
                    crate::logging::Category::PeerDisc,
                    "simultaneous open lost tie-break, deferring to peer's ACCEPT"
                );
                return Ok(());
            }
        }

        let idx = match existing {
            Some(idx) => idx,
            None => self.peers.allocate(src.clone(), now)?,
        };
        self.peers.set_id(idx, peer_id, now)?;
        let granted = lease_duration_ms.min(self.lease_duration_ms);
        self.peers.mark_operational(idx, granted, now)?;
        self.sync_mconduit_membership(idx, src);
        self.send_to(
            &Message::Accept {
                peer_id: self.own_id.clone(),
                opener_id: self.peers.get(idx).and_then(|p| p.id().cloned()).unwrap_or_else(|| self.own_id.clone()),
                lease_duration_ms: granted,
            },
            src,
            now,
        )?;
        self.announce_to(&src.clone(), now)
    }

    fn on_accept(
        &mut self,
        src: &T::Address,
        peer_id: PeerId,
        _opener_id: PeerId,
        lease_duration_ms: u32,
        now: Millis,
    ) -> Result<()> {
        let idx = match self.peers.find_by_addr(src) {
            Some(idx) => idx,
            None => self.peers.allocate(src.clone(), now)?,
        };
        self.peers.set_id(idx, peer_id, now)?;
        self.peers.mark_operational(idx, lease_duration_ms, now)?;
        self.sync_mconduit_membership(idx, src);
        self.announce_to(&src.clone(), now)
    }

    /// Admit `idx` (addressed at `addr`) into every mconduit it belongs
    /// to: every mconduit whose `mconduit_dests` is empty (the
    /// all-operational-peers fallback), plus any mconduit whose
    /// configured destination set names `addr`. Idempotent — safe to
    /// call more than once for the same peer, e.g. across retried
    /// ACCEPTs.
    fn sync_mconduit_membership(&mut self, idx: u8, addr: &T::Address) {
        for m in 0..N_OUT_MCONDUITS {
            let is_dest = self.mconduit_dests[m].is_empty() || self.mconduit_dests[m].iter().any(|a| a == addr);
            if !is_dest {
                continue;
            }
            if let Some(dests) = self.mdests.get_mut(m) {
                if !dests.is_full() && !dests.iter().any(|&p| p == idx) {
                    let _ = dests.push(idx);
                }
            }
            if let Some(heap) = self.mheaps.get_mut(m) {
                if !heap.contains(idx) {
                    heap.insert(idx, 0);
                }
            }
        }
    }

    fn on_close(&mut self, peer_id: &PeerId, now: Millis) -> Result<()> {
        if let Some(idx) = self.peers.find_by_id(peer_id) {
            let _ = self.peers.begin_drain(idx, now);
        }
        Ok(())
    }

    /// Close `idx` (if known) for a protocol violation that the peer
    /// state table resolves directly to `Free` rather than `Draining`:
    /// a reliability violation forfeits the right to drain its
    /// transmit window first. `reason` is the CLOSE wire code (1 =
    /// reliability violation, 2 = duplicate ID).
    fn close_peer_for_violation(&mut self, idx: Option<u8>, src: &T::Address, reason: u8, now: Millis) {
        trace!(crate::logging::Category::Reliability, "{}", Error::ReliabilityViolation);
        let _ = self.send_to(
            &Message::Close {
                peer_id: self.own_id.clone(),
                reason,
            },
            src,
            now,
        );
        if let Some(idx) = idx {
            self.free_peer(idx);
        }
    }

    fn free_peer(&mut self, idx: u8) {
        self.peers.free(idx);
        for heap in self.mheaps.iter_mut() {
            heap.delete(idx);
        }
        for dests in self.mdests.iter_mut() {
            if let Some(pos) = dests.iter().position(|&p| p == idx) {
                dests.swap_remove(pos);
            }
        }
        for cp in self.conduit_peer.iter_mut() {
            if *cp == Some(idx) {
                *cp = None;
            }
        }
        self.declare.clear_peer(idx);
        self.remote_subs.remove_peer(idx);
        if let Some(row) = self.rx.get_mut(idx as usize) {
            for tracker in row.iter_mut() {
                tracker.reset();
            }
        }
    }

    fn on_synch(&mut self, src: &T::Address, conduit: ConduitId, seqbase: Seq, now: Millis) -> Result<()> {
        if let Some(idx) = self.peers.find_by_addr(src) {
            self.peers.touch(idx, now)?;
            // Report this receiver's own cumulative ack level rather
            // than blindly echoing the sender's announced seqbase: if a
            // gap was already flagged via `on_mdata`'s proactive NACK
            // but the sender's retransmission hasn't landed yet, this
            // keeps reminding it of exactly what's still missing
            // instead of falsely acking up to the sender's base.
            let cidx = conduit.0 as usize % RX_CONDUIT_SLOTS.max(1);
            let reply_base = self
                .rx
                .get(idx as usize)
                .and_then(|row| row.get(cidx))
                .and_then(|t| t.expected())
                .unwrap_or(seqbase);
            self.send_to(
                &Message::AckNack {
                    conduit,
                    seqbase: reply_base,
                    mask: 0,
                },
                src,
                now,
            )?;
            self.telemetry.record_acknack_sent();
        }
        Ok(())
    }

    /// Send pre-encoded wire bytes as-is, bypassing [`Message::encode`]
    /// — used for retransmission, where the window already holds the
    /// original serialized message.
    fn send_raw(&mut self, data: &[u8], dest: &T::Address, now: Millis) -> Result<()> {
        self.transport.send(data, dest).map_err(|_| Error::TransportError)?;
        let _ = now;
        Ok(())
    }

    /// Re-emit every window entry the NACK `mask` (relative to
    /// `seqbase`) names as missing, on the unicast window at `cidx` if
    /// `unicast` else the mconduit window. Collects owned copies before
    /// sending so the window's immutable borrow doesn't overlap the
    /// transport's mutable one.
    fn retransmit_masked_to(
        &mut self,
        unicast: bool,
        cidx: usize,
        seqbase: Seq,
        mask: u32,
        dest: &T::Address,
        now: Millis,
    ) {
        let mut to_send: Vec<heapless::Vec<u8, TRANSPORT_MTU>, MAX_RETRANSMIT_BURST> = Vec::new();
        let window = if unicast {
            self.windows.get(cidx)
        } else {
            self.mwindows.get(cidx)
        };
        if let Some(window) = window {
            for (_, data) in window.retransmit_masked(seqbase, mask) {
                let mut owned: heapless::Vec<u8, TRANSPORT_MTU> = heapless::Vec::new();
                let _ = owned.extend_from_slice(data);
                if to_send.push(owned).is_err() {
                    break;
                }
            }
        }
        for data in to_send.iter() {
            let _ = self.send_raw(data, dest, now);
        }
    }

    fn on_acknack(
        &mut self,
        src: &T::Address,
        conduit: ConduitId,
        seqbase: Seq,
        mask: u32,
        now: Millis,
    ) -> Result<()> {
        let Some(idx) = self.peers.find_by_addr(src) else {
            return Ok(());
        };

        // Same static classification as `write`: a conduit's
        // unicast/mconduit mode is fixed by configuration, not inferred
        // from which peer happens to be sending this ACKNACK.
        let mcidx = conduit.0 as usize % N_OUT_MCONDUITS.max(1);
        let is_mconduit = self
            .mconduit_dests
            .get(mcidx)
            .map(|d| !d.is_empty())
            .unwrap_or(false);

        if !is_mconduit {
            let cidx = conduit.0 as usize % N_OUT_CONDUITS.max(1);
            if self.conduit_peer.get(cidx).copied().flatten() != Some(idx) {
                // ACKNACK from a peer this unicast conduit isn't
                // currently addressed to; nothing to apply it to.
                return Ok(());
            }
            let out_of_range = self
                .windows
                .get(cidx)
                .map(|w| w.requested_out_of_range(seqbase, mask))
                .unwrap_or(false);
            if out_of_range {
                self.close_peer_for_violation(Some(idx), src, 1, now);
                return Ok(());
            }
            if let Some(window) = self.windows.get_mut(cidx) {
                window.ack_through(seqbase);
            }
            if mask != 0 {
                self.retransmit_masked_to(true, cidx, seqbase, mask, src, now);
            }
            return Ok(());
        }

        let out_of_range = self
            .mwindows
            .get(mcidx)
            .map(|w| w.requested_out_of_range(seqbase, mask))
            .unwrap_or(false);
        if out_of_range {
            self.close_peer_for_violation(Some(idx), src, 1, now);
            return Ok(());
        }
        if let Some(heap) = self.mheaps.get_mut(mcidx) {
            if let Some((_, min)) = heap.update_seq(idx, seqbase) {
                if let Some(window) = self.mwindows.get_mut(mcidx) {
                    window.ack_through(min);
                }
            }
        }
        if mask != 0 {
            self.retransmit_masked_to(false, mcidx, seqbase, mask, src, now);
        }
        Ok(())
    }

    fn on_decl_commit(&mut self, peeridx: u8, commit: CommitId, src: &T::Address, now: Millis) -> Result<()> {
        match self.declare.precommit(peeridx, commit) {
            Err(_) => {
                // Isolated DECL-COMMIT with nothing staged: a protocol
                // violation, but per the declaration-error contract the
                // peer survives and this never propagates out of `poll`.
                self.declare.abort(peeridx, commit);
                trace!(crate::logging::Category::Declare, "commit with no staged declarations");
                return Ok(());
            }
            Ok(PrecommitOutcome::Rejected { rid, bits }) => {
                self.declare.abort(peeridx, commit);
                let _ = self.send_to(
                    &Message::DeclResult {
                        commit,
                        status: bits,
                        rid,
                    },
                    src,
                    now,
                );
                return Ok(());
            }
            Ok(PrecommitOutcome::Ok) => {}
        }
        for decl in self.declare.commit(peeridx, commit) {
            match decl {
                // A remote publication needs no local bookkeeping: we
                // simply accept DATA/MDATA for that rid from any peer.
                Decl::Pub(_rid) => {}
                // A remote subscription makes this peer a send target
                // for future writes on that rid (see `write`).
                Decl::Sub(rid, _mode) => {
                    let _ = self.remote_subs.add(rid, peeridx);
                }
                // Admit the RID<->URI binding so `on_wdata` can resolve
                // this URI on the next inbound WDATA.
                Decl::Res(rid, _uri_len, uri) => {
                    let _ = self.uri_table.bind(rid, &uri);
                }
            }
        }
        Ok(())
    }

    /// Broadcast every declaration registered locally since the last
    /// flush as one transaction to every operational peer. A no-op if
    /// nothing is pending or no peer is operational yet (declarations
    /// accumulate until one is).
    fn flush_pending_decls(&mut self, now: Millis) -> Result<()> {
        if self.pending_decls.is_empty() {
            return Ok(());
        }
        let targets = self.peer_indices_operational();
        if targets.is_empty() {
            return Ok(());
        }
        let commit = self.alloc_commit_id();
        let decls: Vec<Decl, MAX_STAGED> = core::mem::take(&mut self.pending_decls);
        let mut batch: Vec<Message, MAX_ANNOUNCE_BATCH> = Vec::new();
        for decl in decls.iter() {
            let msg = match decl {
                Decl::Pub(rid) => Message::DeclPub { commit, rid: *rid },
                Decl::Sub(rid, mode) => Message::DeclSub {
                    commit,
                    rid: *rid,
                    mode: *mode,
                },
                Decl::Res(rid, _, uri) => Message::DeclRes {
                    commit,
                    rid: *rid,
                    uri: uri.as_slice(),
                },
            };
            let _ = batch.push(msg);
        }
        let _ = batch.push(Message::DeclCommit { commit });
        for peeridx in targets {
            let Some(addr) = self.peers.get(peeridx).and_then(|p| p.addr().cloned()) else {
                continue;
            };
            let _ = self.send_batch(&batch, &addr, now);
        }
        Ok(())
    }

    // ---- Housekeeping -------------------------------------------------

    /// Drive periodic housekeeping: SYNCH emission on conduits with an
    /// unacknowledged tail, lease expiry, and keepalives on otherwise
    /// idle peers. Callers should invoke this on a steady tick (e.g.
    /// every `SYNCH_INTERVAL_MS` / 4).
    pub fn housekeeping(&mut self, now: Millis) -> Result<()> {
        for idx in self.peers.expired(now).collect::<Vec<u8, MAX_PEERS>>() {
            self.free_peer(idx);
        }

        self.flush_pending_decls(now)?;

        for (cidx, timers) in self.mconduit_timers.iter_mut().enumerate() {
            let Some(window) = self.mwindows.get(cidx) else {
                continue;
            };
            if window.is_empty() {
                continue;
            }
            if !timers.synch_due(now) {
                continue;
            }
            let seqbase = window.oldest_seq().unwrap_or(0);
            timers.mark_synch_sent(now);
            let msg = Message::Synch {
                conduit: ConduitId(cidx as u8),
                seqbase,
            };
            for peeridx in self.peer_indices_operational() {
                if let Some(addr) = self.peers.get(peeridx).and_then(|p| p.addr().cloned()) {
                    let _ = self.send_to(&msg, &addr, now);
                }
            }
            self.telemetry.record_synch_sent();
        }

        for peeridx in self.peer_indices_operational() {
            let timer = &mut self.keepalive_timers[peeridx as usize];
            if timer.keepalive_due(now) {
                if let Some(addr) = self.peers.get(peeridx).and_then(|p| p.addr().cloned()) {
                    let _ = self.send_to(&Message::KeepAlive, &addr, now);
                }
                timer.mark_activity(now);
            }
        }

        Ok(())
    }

    /// Release the transport and any other resources.
    pub fn shutdown(&mut self) -> Result<()> {
        self.transport.shutdown().map_err(|_| Error::TransportError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NullAddress, NullTransport};

    fn own_id() -> PeerId {
        PeerId::from_slice(&[1]).unwrap()
    }

    #[test]
    fn init_and_start_do_not_error() {
        let cfg = Config::new(own_id(), NullAddress, 1000);
        let mut e = Engine::init(cfg, NullTransport, 0).unwrap();
        e.start(0).unwrap();
    }

    #[test]
    fn publish_and_subscribe_allocate_handles() {
        let cfg = Config::new(own_id(), NullAddress, 1000);
        let mut e = Engine::init(cfg, NullTransport, 0).unwrap();
        let rid = ResourceId::new(1).unwrap();
        let _ph = e.publish(rid, ConduitId(0), false).unwrap();
        fn handler(_a: usize, _r: ResourceId, _p: &[u8]) {}
        let _sh = e
            .subscribe(rid, 64, ConduitId(0), SubMode::BestEffort, handler, 0)
            .unwrap();
    }

    #[test]
    fn housekeeping_on_empty_engine_is_a_noop() {
        let cfg = Config::new(own_id(), NullAddress, 1000);
        let mut e = Engine::init(cfg, NullTransport, 0).unwrap();
        e.housekeeping(0).unwrap();
    }
}
